//! Guard configuration: timeouts, capacity, bypass, rate limits and size caps.
//!
//! Loaded from YAML (`stackguard.yaml` by default). Every key is optional;
//! missing keys fall back to the defaults below. Keys are camelCase to match
//! the wire protocol.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONFIRMATION_TIMEOUT_MS: u64 = 300_000;
pub const DEFAULT_MAX_PENDING: usize = 100;
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 60_000;
pub const DEFAULT_RATE_WINDOW_MS: u64 = 60_000;
pub const DEFAULT_RATE_MAX_REQUESTS: u32 = 100;
pub const DEFAULT_MAX_STRING_LENGTH: usize = 10_000;
pub const DEFAULT_MAX_ARRAY_LENGTH: usize = 1_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// What to do with a call whose parameters trip the security-pattern scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningPolicy {
    /// Any warning rejects the call.
    #[default]
    Reject,
    /// Warnings are reported but the call continues to schema validation.
    Annotate,
}

/// Fixed-window rate limit per (operation, caller).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RateLimitConfig {
    pub window_ms: u64,
    pub max_requests: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: DEFAULT_RATE_WINDOW_MS,
            max_requests: DEFAULT_RATE_MAX_REQUESTS,
        }
    }
}

/// Size caps applied by the sanitizer and the pattern scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SizeLimits {
    /// Characters, not bytes.
    pub max_string_length: usize,
    pub max_array_length: usize,
}

impl Default for SizeLimits {
    fn default() -> Self {
        Self {
            max_string_length: DEFAULT_MAX_STRING_LENGTH,
            max_array_length: DEFAULT_MAX_ARRAY_LENGTH,
        }
    }
}

/// Top-level guard configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GuardConfig {
    pub confirmation_timeout_ms: u64,
    pub max_pending_confirmations: usize,
    pub enable_bypass: bool,
    /// Environments in which confirmation is skipped when `enable_bypass` is set.
    pub bypass_environments: Vec<String>,
    pub sweep_interval_ms: u64,
    pub rate_limit: RateLimitConfig,
    pub limits: SizeLimits,
    pub security_warnings: WarningPolicy,
    /// Events kept by the in-memory audit sink.
    pub audit_retention: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            confirmation_timeout_ms: DEFAULT_CONFIRMATION_TIMEOUT_MS,
            max_pending_confirmations: DEFAULT_MAX_PENDING,
            enable_bypass: false,
            bypass_environments: Vec::new(),
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            rate_limit: RateLimitConfig::default(),
            limits: SizeLimits::default(),
            security_warnings: WarningPolicy::default(),
            audit_retention: crate::audit::DEFAULT_RETENTION,
        }
    }
}

impl GuardConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        // An empty document means "all defaults".
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Reject values that would disable the guard by accident.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.confirmation_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "confirmationTimeoutMs must be greater than zero".into(),
            ));
        }
        if self.max_pending_confirmations == 0 {
            return Err(ConfigError::Invalid(
                "maxPendingConfirmations must be greater than zero".into(),
            ));
        }
        if self.sweep_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "sweepIntervalMs must be greater than zero".into(),
            ));
        }
        if self.rate_limit.window_ms == 0 || self.rate_limit.max_requests == 0 {
            return Err(ConfigError::Invalid(
                "rateLimit window and maxRequests must be greater than zero".into(),
            ));
        }
        if self.limits.max_string_length == 0 || self.limits.max_array_length == 0 {
            return Err(ConfigError::Invalid(
                "size limits must be greater than zero".into(),
            ));
        }
        if self.enable_bypass && self.bypass_environments.is_empty() {
            tracing::warn!(
                "enableBypass is set but bypassEnvironments is empty; bypass never applies"
            );
        }
        Ok(())
    }
}
