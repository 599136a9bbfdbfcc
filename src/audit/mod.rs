//! Security audit trail: structured events for every guard decision.
//!
//! The guard never owns the audit store. It writes through the `AuditSink`
//! trait, fire-and-forget: no awaiting, no retries. `MemoryAuditSink` is the
//! in-process implementation used by the binary and the tests; it mirrors
//! every event to `tracing`.

pub mod redact;

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default number of events kept by `MemoryAuditSink`.
pub const DEFAULT_RETENTION: usize = 10_000;

/// Severity shared by audit events and action definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every event type the guard emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    /// Registry built a challenge for a dangerous operation.
    ConfirmationRequested,
    /// Registry checked a response against its challenge.
    ConfirmationResponse,
    /// Broker accepted a challenge into the pending set.
    ConfirmationCreated,
    ConfirmationConfirmed,
    ConfirmationDenied,
    ConfirmationInvalid,
    ConfirmationTimeout,
    ConfirmationCancelled,
    ConfirmationBypassed,
    /// Sweep removed entries whose timers never fired.
    ConfirmationCleanup,
    SecurityViolation,
    ValidationFailure,
    RateLimitExceeded,
}

impl SecurityEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventType::ConfirmationRequested => "confirmation_requested",
            SecurityEventType::ConfirmationResponse => "confirmation_response",
            SecurityEventType::ConfirmationCreated => "confirmation_created",
            SecurityEventType::ConfirmationConfirmed => "confirmation_confirmed",
            SecurityEventType::ConfirmationDenied => "confirmation_denied",
            SecurityEventType::ConfirmationInvalid => "confirmation_invalid",
            SecurityEventType::ConfirmationTimeout => "confirmation_timeout",
            SecurityEventType::ConfirmationCancelled => "confirmation_cancelled",
            SecurityEventType::ConfirmationBypassed => "confirmation_bypassed",
            SecurityEventType::ConfirmationCleanup => "confirmation_cleanup",
            SecurityEventType::SecurityViolation => "security_violation",
            SecurityEventType::ValidationFailure => "validation_failure",
            SecurityEventType::RateLimitExceeded => "rate_limit_exceeded",
        }
    }
}

/// Outcome recorded on an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventResult {
    Success,
    Failure,
    Blocked,
}

/// A structured record of a security-relevant occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
    pub event_type: SecurityEventType,
    pub severity: Severity,
    /// Component that produced the event.
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    pub result: EventResult,
    pub details: Value,
    /// Unix epoch millis.
    pub timestamp: u64,
}

impl SecurityEvent {
    /// Create an event stamped with the current time and empty details.
    pub fn new(
        event_type: SecurityEventType,
        severity: Severity,
        source: &str,
        action: &str,
        result: EventResult,
    ) -> Self {
        Self {
            event_type,
            severity,
            source: source.to_string(),
            user: None,
            action: action.to_string(),
            resource: None,
            result,
            details: Value::Object(Default::default()),
            timestamp: now_millis(),
        }
    }

    pub fn with_user(mut self, user: Option<&str>) -> Self {
        self.user = user.map(str::to_string);
        self
    }

    pub fn with_resource(mut self, resource: &str) -> Self {
        self.resource = Some(resource.to_string());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// Destination for audit events.
///
/// Implementations must not block: the broker calls these while holding its
/// pending-set lock.
pub trait AuditSink: Send + Sync {
    /// Record an event.
    fn log_security_event(&self, event: SecurityEvent);

    /// Record a policy violation. `code` becomes the event's action.
    fn log_security_violation(&self, source: &str, code: &str, severity: Severity, details: Value) {
        self.log_security_event(
            SecurityEvent::new(
                SecurityEventType::SecurityViolation,
                severity,
                source,
                code,
                EventResult::Blocked,
            )
            .with_details(details),
        );
    }

    /// Events of one type with `from_ms <= timestamp <= to_ms`.
    fn events_by_type(
        &self,
        event_type: SecurityEventType,
        from_ms: u64,
        to_ms: u64,
    ) -> Vec<SecurityEvent>;
}

/// Bounded in-memory audit log. Oldest events fall off once `retention` is reached.
pub struct MemoryAuditSink {
    events: Mutex<VecDeque<SecurityEvent>>,
    retention: usize,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }

    pub fn with_retention(retention: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            retention: retention.max(1),
        }
    }

    /// Snapshot of all retained events, oldest first.
    pub fn events(&self) -> Vec<SecurityEvent> {
        self.lock().iter().cloned().collect()
    }

    /// Count of retained events of one type.
    pub fn count(&self, event_type: SecurityEventType) -> usize {
        self.lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<SecurityEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditSink for MemoryAuditSink {
    fn log_security_event(&self, event: SecurityEvent) {
        trace_event(&event);
        let mut events = self.lock();
        while events.len() >= self.retention {
            events.pop_front();
        }
        events.push_back(event);
    }

    fn events_by_type(
        &self,
        event_type: SecurityEventType,
        from_ms: u64,
        to_ms: u64,
    ) -> Vec<SecurityEvent> {
        self.lock()
            .iter()
            .filter(|e| {
                e.event_type == event_type && e.timestamp >= from_ms && e.timestamp <= to_ms
            })
            .cloned()
            .collect()
    }
}

/// Mirror an audit event to tracing at a level matching its severity.
fn trace_event(event: &SecurityEvent) {
    let kind = event.event_type.as_str();
    let user = event.user.as_deref().unwrap_or("-");
    match event.severity {
        Severity::Critical | Severity::High => tracing::warn!(
            event = kind,
            source = %event.source,
            action = %event.action,
            user,
            result = ?event.result,
            "security event"
        ),
        Severity::Medium => tracing::info!(
            event = kind,
            source = %event.source,
            action = %event.action,
            user,
            result = ?event.result,
            "security event"
        ),
        Severity::Low => tracing::debug!(
            event = kind,
            source = %event.source,
            action = %event.action,
            user,
            result = ?event.result,
            "security event"
        ),
    }
}

/// Current unix time in milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
