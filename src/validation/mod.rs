//! Validation gate: every tool call passes through here first.
//!
//! Three checks, all independent of the confirmation broker:
//! - a heuristic security-pattern scan (`patterns`)
//! - per-operation JSON Schema validation (`schema`)
//! - a fixed-window rate limit per (operation, caller) (`rate_limit`)
//!
//! On success the caller receives a sanitized copy of the parameters
//! (`sanitize`) to forward downstream.

pub mod patterns;
pub mod rate_limit;
pub mod sanitize;
pub mod schema;

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::audit::now_millis;
use crate::config::{GuardConfig, SizeLimits, WarningPolicy};
use rate_limit::{RateLimitWindow, RateLimiter};
use schema::{ParameterSchema, SchemaError};

/// Outcome of `validate_parameters`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sanitized_input: Option<Value>,
    pub errors: Vec<String>,
    pub security_warnings: Vec<String>,
}

impl ValidationResult {
    fn rejected(errors: Vec<String>, security_warnings: Vec<String>) -> Self {
        Self {
            is_valid: false,
            sanitized_input: None,
            errors,
            security_warnings,
        }
    }
}

/// Schema registry + scanner + rate limiter.
pub struct ValidationGate {
    schemas: HashMap<String, ParameterSchema>,
    fallback: ParameterSchema,
    limits: SizeLimits,
    warning_policy: WarningPolicy,
    rate_limiter: RateLimiter,
}

impl ValidationGate {
    /// A gate with no registered schemas.
    pub fn new(config: &GuardConfig) -> Self {
        Self {
            schemas: HashMap::new(),
            fallback: ParameterSchema::PassThrough,
            limits: config.limits,
            warning_policy: config.security_warnings,
            rate_limiter: RateLimiter::new(config.rate_limit),
        }
    }

    /// A gate preloaded with `schema::default_schemas`.
    pub fn with_default_schemas(config: &GuardConfig) -> Result<Self, SchemaError> {
        let mut gate = Self::new(config);
        for (name, schema) in schema::default_schemas() {
            gate.register_schema(name, schema)?;
        }
        Ok(gate)
    }

    /// Register (or replace) the schema for an operation. Startup-time only.
    pub fn register_schema(&mut self, name: &str, schema: Value) -> Result<(), SchemaError> {
        let compiled = ParameterSchema::compile(name, schema)?;
        self.schemas.insert(name.to_string(), compiled);
        Ok(())
    }

    pub fn has_schema(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    /// Scan, then schema-check, then sanitize.
    ///
    /// Under `WarningPolicy::Reject` any scan warning rejects the call and the
    /// schema is never evaluated. Under `Annotate` the warnings ride along on
    /// an otherwise normal result.
    pub fn validate_parameters(&self, tool_name: &str, params: &Value) -> ValidationResult {
        let warnings = patterns::scan(params, self.limits.max_string_length);
        if !warnings.is_empty() && self.warning_policy == WarningPolicy::Reject {
            tracing::warn!(
                tool = tool_name,
                count = warnings.len(),
                "security scan rejected parameters"
            );
            return ValidationResult::rejected(
                vec!["Security validation failed".to_string()],
                warnings,
            );
        }

        if !params.is_object() {
            return ValidationResult::rejected(
                vec!["(root): parameters must be an object".to_string()],
                warnings,
            );
        }

        let schema = self.schemas.get(tool_name).unwrap_or(&self.fallback);
        let field_errors = schema.validate(params);
        if !field_errors.is_empty() {
            tracing::debug!(
                tool = tool_name,
                count = field_errors.len(),
                "schema rejected parameters"
            );
            return ValidationResult::rejected(
                field_errors.iter().map(ToString::to_string).collect(),
                warnings,
            );
        }

        ValidationResult {
            is_valid: true,
            sanitized_input: Some(self.sanitize(params)),
            errors: Vec::new(),
            security_warnings: warnings,
        }
    }

    /// Count one call for (operation, caller) and return whether it is allowed.
    pub fn check_rate_limit(&self, operation: &str, caller: Option<&str>) -> bool {
        self.rate_limiter.check(operation, caller)
    }

    /// `check_rate_limit` against an explicit clock reading (unix millis).
    pub fn check_rate_limit_at(&self, operation: &str, caller: Option<&str>, now_ms: u64) -> bool {
        self.rate_limiter.check_at(operation, caller, now_ms)
    }

    pub fn rate_limit_window(
        &self,
        operation: &str,
        caller: Option<&str>,
    ) -> Option<RateLimitWindow> {
        self.rate_limiter.window(operation, caller)
    }

    /// Drop rolled-over rate windows.
    pub fn prune_rate_windows(&self) -> usize {
        self.rate_limiter.prune_at(now_millis())
    }

    pub fn sanitize(&self, input: &Value) -> Value {
        sanitize::sanitize_value(input, &self.limits)
    }

    /// Run the security-pattern scan alone.
    pub fn scan(&self, input: &Value) -> Vec<String> {
        patterns::scan(input, self.limits.max_string_length)
    }
}
