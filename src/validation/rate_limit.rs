//! Fixed-window rate limiter keyed by `operation:caller`.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;

use crate::audit::now_millis;
use crate::config::RateLimitConfig;

/// Caller id used when the dispatch layer does not supply one.
pub const DEFAULT_CALLER: &str = "default";

/// Request count inside the current window for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitWindow {
    pub request_count: u32,
    /// Unix epoch millis.
    pub window_start: u64,
    pub limited: bool,
}

/// Process-wide window table.
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<String, RateLimitWindow>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Count one call and return whether it is allowed.
    pub fn check(&self, operation: &str, caller: Option<&str>) -> bool {
        self.check_at(operation, caller, now_millis())
    }

    /// `check` against an explicit clock reading.
    pub fn check_at(&self, operation: &str, caller: Option<&str>, now_ms: u64) -> bool {
        let key = window_key(operation, caller);
        let mut windows = self.lock();
        let window = windows.entry(key).or_insert(RateLimitWindow {
            request_count: 0,
            window_start: now_ms,
            limited: false,
        });

        if window.request_count == 0 || self.expired(window, now_ms) {
            *window = RateLimitWindow {
                request_count: 1,
                window_start: now_ms,
                limited: false,
            };
            return true;
        }

        window.request_count = window.request_count.saturating_add(1);
        if window.request_count > self.config.max_requests {
            window.limited = true;
            return false;
        }
        true
    }

    /// Current window for a key, if one exists.
    pub fn window(&self, operation: &str, caller: Option<&str>) -> Option<RateLimitWindow> {
        self.lock().get(&window_key(operation, caller)).copied()
    }

    /// Drop windows that have rolled over. Returns how many were removed.
    pub fn prune_at(&self, now_ms: u64) -> usize {
        let mut windows = self.lock();
        let before = windows.len();
        windows.retain(|_, w| !self.expired(w, now_ms));
        before - windows.len()
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn expired(&self, window: &RateLimitWindow, now_ms: u64) -> bool {
        now_ms.saturating_sub(window.window_start) >= self.config.window_ms
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, RateLimitWindow>> {
        self.windows.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn window_key(operation: &str, caller: Option<&str>) -> String {
    format!("{operation}:{}", caller.unwrap_or(DEFAULT_CALLER))
}
