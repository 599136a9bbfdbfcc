//! Confirmation broker: the stateful half of the confirmation protocol.
//!
//! Holds outstanding challenges, each with its own expiry timer. Four paths
//! can end a challenge: a response, the timer, the periodic sweep, or a
//! cancel. All of them go through `PendingStore::take` under one lock, so
//! exactly one wins and the others are silent no-ops.
//!
//! Timer and sweeper tasks hold a `Weak` reference to the broker's shared
//! state and stop doing work once the broker is dropped.

pub mod display;
pub mod error;
pub mod pending;

use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::actions::{
    ActionRegistry, ConfirmationRequest, ConfirmationResponse, RegistryStatistics,
};
use crate::audit::{now_millis, AuditSink, EventResult, SecurityEvent, SecurityEventType, Severity};
use crate::config::GuardConfig;
pub use display::{ActionDetails, ConfirmationDisplay};
pub use error::{ConfirmationError, ConfirmationResult, RetryHint};
use pending::{PendingConfirmation, PendingStore, TerminalState};

const SOURCE: &str = "confirmation_broker";
const DAY_MS: u64 = 24 * 60 * 60 * 1000;

/// Message returned for responses that match no pending challenge.
pub const UNKNOWN_REQUEST_MESSAGE: &str = "Invalid or expired confirmation request";

/// Broker settings, taken from `GuardConfig`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub confirmation_timeout_ms: u64,
    pub max_pending_confirmations: usize,
    pub enable_bypass: bool,
    pub bypass_environments: Vec<String>,
    pub sweep_interval_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self::from(&GuardConfig::default())
    }
}

impl From<&GuardConfig> for BrokerConfig {
    fn from(config: &GuardConfig) -> Self {
        Self {
            confirmation_timeout_ms: config.confirmation_timeout_ms,
            max_pending_confirmations: config.max_pending_confirmations,
            enable_bypass: config.enable_bypass,
            bypass_environments: config.bypass_environments.clone(),
            sweep_interval_ms: config.sweep_interval_ms,
        }
    }
}

impl BrokerConfig {
    /// Whether `environment` is one of the configured bypass environments.
    pub fn bypasses(&self, environment: Option<&str>) -> bool {
        match environment {
            Some(env) if self.enable_bypass => self.bypass_environments.iter().any(|b| b == env),
            _ => false,
        }
    }
}

/// Result of `process_confirmation_response`.
///
/// Serializes to `{success, allowOperation, error?}`. Callers must gate the
/// downstream call strictly on `allow_operation`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationResolution {
    pub success: bool,
    pub allow_operation: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    outcome: ConfirmationResult<ConfirmationRequest>,
    #[serde(skip)]
    display: Option<ConfirmationDisplay>,
}

impl ConfirmationResolution {
    fn allowed(request: ConfirmationRequest) -> Self {
        Self {
            success: true,
            allow_operation: true,
            error: None,
            outcome: Ok(request),
            display: None,
        }
    }

    fn failed(failure: ConfirmationError, display: Option<ConfirmationDisplay>) -> Self {
        let error = match &failure {
            ConfirmationError::UnknownCorrelation { .. } | ConfirmationError::Timeout { .. } => {
                UNKNOWN_REQUEST_MESSAGE.to_string()
            }
            other => other.to_string(),
        };
        Self {
            success: false,
            allow_operation: false,
            error: Some(error),
            outcome: Err(failure),
            display,
        }
    }

    /// Typed reason for a failed resolution.
    pub fn failure(&self) -> Option<&ConfirmationError> {
        self.outcome.as_ref().err()
    }

    /// The challenge that was confirmed. Its parameters are the ones the
    /// user approved; forward those, not a fresh copy from the caller.
    pub fn approved_request(&self) -> Option<&ConfirmationRequest> {
        self.outcome.as_ref().ok()
    }

    /// The challenge a failed response was aimed at, for re-rendering.
    /// `None` on success and for ids the broker never issued or no longer
    /// remembers.
    pub fn display(&self) -> Option<&ConfirmationDisplay> {
        self.display.as_ref()
    }

    pub fn into_result(self) -> ConfirmationResult<ConfirmationRequest> {
        self.outcome
    }
}

/// Event counts over the last 24 hours, read back from the audit sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentActivity {
    pub created: usize,
    pub confirmed: usize,
    pub denied: usize,
    pub timed_out: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerStatistics {
    pub pending: usize,
    pub registry: RegistryStatistics,
    pub last_24h: RecentActivity,
}

struct Shared {
    registry: Arc<ActionRegistry>,
    audit: Arc<dyn AuditSink>,
    config: BrokerConfig,
    pending: Mutex<PendingStore>,
}

/// Owner of every outstanding confirmation challenge. Cheap to clone.
#[derive(Clone)]
pub struct ConfirmationBroker {
    shared: Arc<Shared>,
}

impl ConfirmationBroker {
    pub fn new(
        registry: Arc<ActionRegistry>,
        audit: Arc<dyn AuditSink>,
        config: BrokerConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry,
                audit,
                config,
                pending: Mutex::new(PendingStore::new()),
            }),
        }
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.shared.registry
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.shared.config
    }

    /// Whether `tool_name` must be confirmed before it runs in `environment`.
    pub fn requires_confirmation(&self, tool_name: &str, environment: Option<&str>) -> bool {
        let shared = &self.shared;
        if shared.config.bypasses(environment) {
            shared.audit.log_security_event(
                SecurityEvent::new(
                    SecurityEventType::ConfirmationBypassed,
                    Severity::Medium,
                    SOURCE,
                    tool_name,
                    EventResult::Success,
                )
                .with_details(json!({
                    "environment": environment,
                    "dangerous": shared.registry.is_dangerous_action(tool_name),
                })),
            );
            return false;
        }
        shared.registry.is_dangerous_action(tool_name)
    }

    /// Issue a challenge for `tool_name`.
    ///
    /// `Ok(None)` means the operation is not dangerous. Fails with
    /// `CapacityExceeded`, before touching any state, when the pending set is
    /// full, and with `DuplicateCorrelation` if the new id is already pending.
    pub async fn create_confirmation_request(
        &self,
        tool_name: &str,
        parameters: &Map<String, Value>,
        user: Option<&str>,
        environment: Option<&str>,
    ) -> ConfirmationResult<Option<ConfirmationRequest>> {
        let shared = &self.shared;
        let limit = shared.config.max_pending_confirmations;
        let mut pending = shared.pending.lock().await;

        if pending.len() >= limit {
            shared.audit.log_security_violation(
                SOURCE,
                "confirmation_capacity_exceeded",
                Severity::High,
                json!({
                    "tool": tool_name,
                    "user": user,
                    "pending": pending.len(),
                    "limit": limit,
                }),
            );
            return Err(ConfirmationError::CapacityExceeded { limit });
        }

        let Some(request) = shared
            .registry
            .generate_confirmation_request(tool_name, parameters, None)
        else {
            return Ok(None);
        };

        let correlation_id = request.correlation_id().to_string();
        let timeout_ms = shared.config.confirmation_timeout_ms;
        let mut entry = PendingConfirmation::new(request.clone(), user, timeout_ms);
        entry.arm(spawn_expiry(
            Arc::downgrade(&self.shared),
            correlation_id.clone(),
            Duration::from_millis(timeout_ms),
        ));
        if let Err(mut rejected) = pending.insert(entry) {
            rejected.disarm();
            drop(pending);
            shared.audit.log_security_violation(
                SOURCE,
                "duplicate_correlation_id",
                Severity::High,
                json!({ "tool": tool_name, "user": user, "correlationId": correlation_id }),
            );
            return Err(ConfirmationError::DuplicateCorrelation { correlation_id });
        }
        let count = pending.len();

        shared.audit.log_security_event(
            SecurityEvent::new(
                SecurityEventType::ConfirmationCreated,
                Severity::Medium,
                SOURCE,
                tool_name,
                EventResult::Success,
            )
            .with_user(user)
            .with_resource(&correlation_id)
            .with_details(json!({
                "environment": environment,
                "pendingCount": count,
                "timeoutMs": timeout_ms,
            })),
        );
        tracing::info!(
            correlation_id = %correlation_id,
            tool = tool_name,
            pending = count,
            "confirmation requested"
        );

        Ok(Some(request))
    }

    /// Resolve a challenge with the caller's answer. Each id resolves once.
    pub async fn process_confirmation_response(
        &self,
        correlation_id: &str,
        confirmed: bool,
        user_input: Option<&str>,
        user: Option<&str>,
    ) -> ConfirmationResolution {
        let shared = &self.shared;
        let mut pending = shared.pending.lock().await;

        let Some(mut entry) = pending.take(correlation_id) else {
            let late = pending.tombstone(correlation_id).cloned();
            drop(pending);
            shared.audit.log_security_violation(
                SOURCE,
                "unknown_correlation_id",
                Severity::Medium,
                json!({
                    "correlationId": correlation_id,
                    "user": user,
                    "previousOutcome": late.as_ref().map(|t| format!("{:?}", t.state)),
                }),
            );
            let failure = match late.as_ref().map(|t| t.state) {
                Some(TerminalState::TimedOut) => ConfirmationError::Timeout {
                    correlation_id: correlation_id.to_string(),
                },
                _ => ConfirmationError::UnknownCorrelation {
                    correlation_id: correlation_id.to_string(),
                },
            };
            return ConfirmationResolution::failed(failure, late.and_then(|t| t.display));
        };
        entry.disarm();

        let request = entry.into_request();
        let response = ConfirmationResponse::new(correlation_id, confirmed, user_input);
        let valid = shared.registry.validate_confirmation_response(&request, &response);
        let tool_name = request.tool_name();
        let display = shared.display(&request);

        let (state, event_type, severity, result) = if valid {
            (
                TerminalState::ConfirmedValid,
                SecurityEventType::ConfirmationConfirmed,
                Severity::Medium,
                EventResult::Success,
            )
        } else if !confirmed {
            (
                TerminalState::Denied,
                SecurityEventType::ConfirmationDenied,
                Severity::Medium,
                EventResult::Blocked,
            )
        } else {
            (
                TerminalState::ConfirmedInvalid,
                SecurityEventType::ConfirmationInvalid,
                Severity::High,
                EventResult::Blocked,
            )
        };
        pending.bury(correlation_id, state, Some(display.clone()));
        let remaining = pending.len();
        drop(pending);

        shared.audit.log_security_event(
            SecurityEvent::new(event_type, severity, SOURCE, tool_name, result)
                .with_user(user)
                .with_resource(correlation_id)
                .with_details(json!({
                    "durationMs": now_millis().saturating_sub(request.created_at()),
                    "pendingCount": remaining,
                })),
        );

        match state {
            TerminalState::ConfirmedValid => {
                tracing::info!(correlation_id, tool = tool_name, "confirmation accepted");
                ConfirmationResolution::allowed(request)
            }
            TerminalState::Denied => ConfirmationResolution::failed(
                ConfirmationError::DeniedByUser {
                    tool_name: tool_name.to_string(),
                },
                Some(display),
            ),
            _ => ConfirmationResolution::failed(
                ConfirmationError::InvalidConfirmationText {
                    tool_name: tool_name.to_string(),
                },
                Some(display),
            ),
        }
    }

    /// Withdraw a pending challenge. Returns whether one was removed.
    pub async fn cancel_confirmation(
        &self,
        correlation_id: &str,
        user: Option<&str>,
        reason: Option<&str>,
    ) -> bool {
        let shared = &self.shared;
        let mut pending = shared.pending.lock().await;
        let Some(mut entry) = pending.take(correlation_id) else {
            return false;
        };
        entry.disarm();
        let display = shared.display(entry.request());
        pending.bury(correlation_id, TerminalState::Cancelled, Some(display));
        drop(pending);

        shared.audit.log_security_event(
            SecurityEvent::new(
                SecurityEventType::ConfirmationCancelled,
                Severity::Low,
                SOURCE,
                entry.request().tool_name(),
                EventResult::Success,
            )
            .with_user(user)
            .with_resource(correlation_id)
            .with_details(json!({ "reason": reason.unwrap_or("cancelled") })),
        );
        true
    }

    /// Expire every overdue challenge whose timer has not fired.
    pub async fn sweep_expired(&self) -> usize {
        self.shared.sweep(now_millis()).await
    }

    /// `sweep_expired` against an explicit clock reading (unix millis).
    pub async fn sweep_expired_at(&self, now_ms: u64) -> usize {
        self.shared.sweep(now_ms).await
    }

    /// Run the sweep every `sweep_interval_ms` until the broker is dropped.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.shared);
        let period = Duration::from_millis(self.shared.config.sweep_interval_ms.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick fires immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else {
                    tracing::debug!("broker dropped, sweeper exiting");
                    break;
                };
                shared.sweep(now_millis()).await;
            }
        })
    }

    /// Cancel every pending challenge. Returns how many were cancelled.
    pub async fn shutdown(&self) -> usize {
        let shared = &self.shared;
        let drained = {
            let mut pending = shared.pending.lock().await;
            let mut drained = pending.drain();
            for entry in &mut drained {
                entry.disarm();
                let display = shared.display(entry.request());
                pending.bury(
                    entry.request().correlation_id(),
                    TerminalState::Cancelled,
                    Some(display),
                );
            }
            drained
        };
        for entry in &drained {
            shared.audit.log_security_event(
                SecurityEvent::new(
                    SecurityEventType::ConfirmationCancelled,
                    Severity::Low,
                    SOURCE,
                    entry.request().tool_name(),
                    EventResult::Success,
                )
                .with_user(entry.user())
                .with_resource(entry.request().correlation_id())
                .with_details(json!({ "reason": "shutdown" })),
            );
        }
        if !drained.is_empty() {
            tracing::info!(
                cancelled = drained.len(),
                "broker shut down with pending confirmations"
            );
        }
        drained.len()
    }

    pub async fn pending_count(&self) -> usize {
        self.shared.pending.lock().await.len()
    }

    pub async fn is_pending(&self, correlation_id: &str) -> bool {
        self.shared.pending.lock().await.contains(correlation_id)
    }

    pub async fn get_statistics(&self) -> BrokerStatistics {
        let pending = self.pending_count().await;
        let audit = &self.shared.audit;
        let to = now_millis();
        let from = to.saturating_sub(DAY_MS);
        let count = |kind| audit.events_by_type(kind, from, to).len();
        BrokerStatistics {
            pending,
            registry: self.shared.registry.get_statistics(),
            last_24h: RecentActivity {
                created: count(SecurityEventType::ConfirmationCreated),
                confirmed: count(SecurityEventType::ConfirmationConfirmed),
                denied: count(SecurityEventType::ConfirmationDenied),
                timed_out: count(SecurityEventType::ConfirmationTimeout),
            },
        }
    }

    /// Render-ready payload for a challenge issued by this broker.
    pub fn format_for_display(&self, request: &ConfirmationRequest) -> ConfirmationDisplay {
        self.shared.display(request)
    }
}

/// Who is expiring an entry.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Expiry {
    Timer,
    Sweep,
}

impl Shared {
    fn display(&self, request: &ConfirmationRequest) -> ConfirmationDisplay {
        ConfirmationDisplay::new(request, self.config.confirmation_timeout_ms)
    }

    /// Take `correlation_id` if still pending and record the timeout.
    /// Returns false when some other path already resolved it.
    fn expire_locked(
        &self,
        pending: &mut PendingStore,
        correlation_id: &str,
        by: Expiry,
    ) -> bool {
        let Some(mut entry) = pending.take(correlation_id) else {
            return false;
        };
        match by {
            Expiry::Timer => entry.detach(),
            Expiry::Sweep => entry.disarm(),
        }
        pending.bury(
            correlation_id,
            TerminalState::TimedOut,
            Some(self.display(entry.request())),
        );

        self.audit.log_security_event(
            SecurityEvent::new(
                SecurityEventType::ConfirmationTimeout,
                Severity::Medium,
                SOURCE,
                entry.request().tool_name(),
                EventResult::Blocked,
            )
            .with_user(entry.user())
            .with_resource(correlation_id)
            .with_details(json!({
                "timeoutMs": self.config.confirmation_timeout_ms,
                "expiredBy": match by {
                    Expiry::Timer => "timer",
                    Expiry::Sweep => "sweep",
                },
            })),
        );
        tracing::info!(
            correlation_id,
            tool = entry.request().tool_name(),
            "confirmation timed out"
        );
        true
    }

    async fn expire(&self, correlation_id: &str) {
        let mut pending = self.pending.lock().await;
        self.expire_locked(&mut pending, correlation_id, Expiry::Timer);
    }

    async fn sweep(&self, now_ms: u64) -> usize {
        let mut pending = self.pending.lock().await;
        let mut removed = 0;
        for id in pending.expired_ids(now_ms) {
            if self.expire_locked(&mut pending, &id, Expiry::Sweep) {
                removed += 1;
            }
        }
        drop(pending);

        if removed > 0 {
            self.audit.log_security_event(
                SecurityEvent::new(
                    SecurityEventType::ConfirmationCleanup,
                    Severity::Low,
                    SOURCE,
                    "sweep",
                    EventResult::Success,
                )
                .with_details(json!({ "removed": removed })),
            );
            tracing::warn!(removed, "sweep expired confirmations missed by their timers");
        }
        removed
    }
}

fn spawn_expiry(shared: Weak<Shared>, correlation_id: String, after: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        if let Some(shared) = shared.upgrade() {
            shared.expire(&correlation_id).await;
        }
    })
}
