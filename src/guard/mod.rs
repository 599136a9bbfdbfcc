//! Tool-call guard: the full interception path in front of a dangerous API.
//!
//! ```text
//! call ──► rate limit ──► validate/sanitize ──► dangerous? ──no──► Proceed
//!                                                   │yes
//!                                                   ▼
//!                                      REQUIRED (challenge issued)
//! response ──► shape check ──► broker ──► Allowed | coded error
//! ```
//!
//! The guard owns no state of its own beyond its parts; the broker keeps
//! pending challenges and the gate keeps rate windows.

pub mod events;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::actions::ActionRegistry;
use crate::audit::{AuditSink, EventResult, SecurityEvent, SecurityEventType, Severity};
use crate::config::GuardConfig;
use crate::confirmation::{
    BrokerConfig, BrokerStatistics, ConfirmationBroker, ConfirmationError, ConfirmationResult,
};
use crate::protocol::{self, ConfirmationErrorCode, ConfirmationProtocolError};
use crate::validation::rate_limit::DEFAULT_CALLER;
use crate::validation::schema::SchemaError;
use crate::validation::ValidationGate;
pub use events::GuardEvent;

const SOURCE: &str = "tool_call_guard";

/// An intercepted call, as presented by the dispatch layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub tool_name: String,
    #[serde(default = "empty_object")]
    pub parameters: Value,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub environment: Option<String>,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// What the dispatch layer should do with a call.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardDecision {
    /// Run the call with these (sanitized) parameters.
    Proceed {
        parameters: Value,
        security_warnings: Vec<String>,
    },
    /// Send this REQUIRED error back and wait for a confirmation response.
    ConfirmationRequired(ConfirmationProtocolError),
}

/// A call the user has confirmed.
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovedCall {
    pub tool_name: String,
    pub correlation_id: String,
    /// Parameters captured when the challenge was issued.
    pub parameters: Value,
}

pub struct ToolCallGuard {
    gate: Arc<ValidationGate>,
    broker: ConfirmationBroker,
    audit: Arc<dyn AuditSink>,
    events: broadcast::Sender<GuardEvent>,
}

impl ToolCallGuard {
    /// Guard with the built-in catalog and schemas.
    pub fn new(config: &GuardConfig, audit: Arc<dyn AuditSink>) -> Result<Self, SchemaError> {
        let registry = Arc::new(ActionRegistry::with_default_catalog(audit.clone()));
        let gate = ValidationGate::with_default_schemas(config)?;
        let broker = ConfirmationBroker::new(registry, audit.clone(), BrokerConfig::from(config));
        Ok(Self::from_parts(gate, broker, audit))
    }

    pub fn from_parts(
        gate: ValidationGate,
        broker: ConfirmationBroker,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            gate: Arc::new(gate),
            broker,
            audit,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GuardEvent> {
        self.events.subscribe()
    }

    pub fn broker(&self) -> &ConfirmationBroker {
        &self.broker
    }

    pub fn gate(&self) -> &ValidationGate {
        &self.gate
    }

    /// Run every check on an intercepted call.
    ///
    /// Errors are the failures that stop a call before any challenge is
    /// issued: rate limit, validation, or a full pending set.
    pub async fn evaluate(&self, call: &ToolCall) -> ConfirmationResult<GuardDecision> {
        let tool = call.tool_name.as_str();
        let user = call.user.as_deref();

        if !self.gate.check_rate_limit(tool, user) {
            let caller = user.unwrap_or(DEFAULT_CALLER).to_string();
            let window = self.gate.rate_limit_window(tool, user);
            self.audit.log_security_event(
                SecurityEvent::new(
                    SecurityEventType::RateLimitExceeded,
                    Severity::Medium,
                    SOURCE,
                    tool,
                    EventResult::Blocked,
                )
                .with_user(user)
                .with_details(json!({ "window": window })),
            );
            self.emit(GuardEvent::RateLimited {
                tool_name: tool.to_string(),
                caller: call.user.clone(),
            });
            return Err(ConfirmationError::RateLimited {
                operation: tool.to_string(),
                caller,
            });
        }

        let validation = self.gate.validate_parameters(tool, &call.parameters);
        let Some(sanitized) = validation.sanitized_input.filter(|_| validation.is_valid) else {
            let mut errors = validation.errors;
            errors.extend(validation.security_warnings);
            self.audit.log_security_event(
                SecurityEvent::new(
                    SecurityEventType::ValidationFailure,
                    Severity::Medium,
                    SOURCE,
                    tool,
                    EventResult::Blocked,
                )
                .with_user(user)
                .with_details(json!({ "errors": errors })),
            );
            self.emit(GuardEvent::ValidationRejected {
                tool_name: tool.to_string(),
                errors: errors.len(),
            });
            return Err(ConfirmationError::ValidationFailure { errors });
        };

        if self.broker.requires_confirmation(tool, call.environment.as_deref()) {
            let parameters = sanitized.as_object().cloned().unwrap_or_default();
            let request = self
                .broker
                .create_confirmation_request(tool, &parameters, user, call.environment.as_deref())
                .await?;
            if let Some(request) = request {
                self.emit(GuardEvent::ConfirmationRequired {
                    tool_name: tool.to_string(),
                    correlation_id: request.correlation_id().to_string(),
                });
                let display = self.broker.format_for_display(&request);
                let required = ConfirmationProtocolError::required(display);
                return Ok(GuardDecision::ConfirmationRequired(required));
            }
        }

        self.emit(GuardEvent::CallAllowed {
            tool_name: tool.to_string(),
            caller: call.user.clone(),
        });
        Ok(GuardDecision::Proceed {
            parameters: sanitized,
            security_warnings: validation.security_warnings,
        })
    }

    /// Resolve an inbound confirmation response.
    pub async fn resolve(
        &self,
        response: &Value,
        user: Option<&str>,
    ) -> Result<ApprovedCall, ConfirmationProtocolError> {
        let Some(response) = protocol::parse_confirmation_response(response) else {
            self.audit.log_security_violation(
                SOURCE,
                "malformed_confirmation_response",
                Severity::Medium,
                json!({ "user": user }),
            );
            return Err(ConfirmationProtocolError {
                code: ConfirmationErrorCode::Invalid,
                message: "Malformed confirmation response".to_string(),
                data: None,
            });
        };

        let resolution = self
            .broker
            .process_confirmation_response(
                &response.correlation_id,
                response.confirmed,
                response.user_input.as_deref(),
                user,
            )
            .await;
        self.emit(GuardEvent::ConfirmationResolved {
            correlation_id: response.correlation_id.clone(),
            allowed: resolution.allow_operation,
        });

        protocol::resolution_to_result(&resolution)?;
        let request = resolution
            .into_result()
            .map_err(|_| ConfirmationProtocolError::new(ConfirmationErrorCode::Expired, None))?;
        Ok(ApprovedCall {
            tool_name: request.tool_name().to_string(),
            correlation_id: request.correlation_id().to_string(),
            parameters: Value::Object(request.parameters().clone()),
        })
    }

    pub async fn cancel(
        &self,
        correlation_id: &str,
        user: Option<&str>,
        reason: Option<&str>,
    ) -> bool {
        let cancelled = self.broker.cancel_confirmation(correlation_id, user, reason).await;
        if cancelled {
            self.emit(GuardEvent::ConfirmationCancelled {
                correlation_id: correlation_id.to_string(),
            });
        }
        cancelled
    }

    pub async fn stats(&self) -> BrokerStatistics {
        self.broker.get_statistics().await
    }

    /// Start the broker sweeper and rate-window pruning. Both stop when the
    /// guard is dropped.
    pub fn spawn_maintenance(&self) -> Vec<JoinHandle<()>> {
        let sweeper = self.broker.spawn_sweeper();
        let gate = Arc::downgrade(&self.gate);
        let period = Duration::from_millis(self.broker.config().sweep_interval_ms.max(1));
        let pruner = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(gate) = gate.upgrade() else { break };
                let dropped = gate.prune_rate_windows();
                if dropped > 0 {
                    tracing::debug!(dropped, "pruned rate-limit windows");
                }
            }
        });
        vec![sweeper, pruner]
    }

    /// Cancel every pending challenge.
    pub async fn shutdown(&self) -> usize {
        self.broker.shutdown().await
    }

    fn emit(&self, event: GuardEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::config::RateLimitConfig;

    fn guard_with(config: GuardConfig) -> (ToolCallGuard, Arc<MemoryAuditSink>) {
        let sink = Arc::new(MemoryAuditSink::new());
        (ToolCallGuard::new(&config, sink.clone()).unwrap(), sink)
    }

    fn call(tool: &str, parameters: Value) -> ToolCall {
        ToolCall {
            tool_name: tool.to_string(),
            parameters,
            user: Some("alice".into()),
            environment: None,
        }
    }

    fn response(correlation_id: &str, confirmed: bool, input: Option<&str>) -> Value {
        json!({
            "correlationId": correlation_id,
            "confirmed": confirmed,
            "userInput": input,
            "timestamp": 1,
        })
    }

    #[tokio::test]
    async fn safe_call_proceeds_sanitized() {
        let (guard, _) = guard_with(GuardConfig::default());
        let mut rx = guard.subscribe();
        let decision = guard
            .evaluate(&call("list_virtual_machines", json!({ "keyword": "web & db" })))
            .await
            .unwrap();
        match decision {
            GuardDecision::Proceed { parameters, .. } => {
                assert_eq!(parameters["keyword"], "web &amp; db");
            }
            other => panic!("expected proceed, got {other:?}"),
        }
        assert!(matches!(rx.recv().await.unwrap(), GuardEvent::CallAllowed { .. }));
    }

    #[tokio::test]
    async fn dangerous_call_round_trip() {
        let (guard, sink) = guard_with(GuardConfig::default());
        let decision = guard
            .evaluate(&call("destroy_virtual_machine", json!({ "id": "vm-1" })))
            .await
            .unwrap();
        let GuardDecision::ConfirmationRequired(err) = decision else {
            panic!("expected confirmation");
        };
        assert_eq!(err.code, ConfirmationErrorCode::Required);
        let display = err.confirmation_request().unwrap().clone();
        assert_eq!(display.action_details.category, "Virtual Machine Operations");

        let approved = guard
            .resolve(
                &response(&display.correlation_id, true, Some("destroy permanently")),
                Some("alice"),
            )
            .await
            .unwrap();
        assert_eq!(approved.tool_name, "destroy_virtual_machine");
        assert_eq!(approved.parameters, json!({ "id": "vm-1" }));
        assert_eq!(sink.count(SecurityEventType::ConfirmationConfirmed), 1);
    }

    #[tokio::test]
    async fn wrong_phrase_and_denial_codes() {
        let (guard, _) = guard_with(GuardConfig::default());
        let mut ids = Vec::new();
        for _ in 0..2 {
            let GuardDecision::ConfirmationRequired(err) = guard
                .evaluate(&call("delete_volume", json!({ "id": "vol-1" })))
                .await
                .unwrap()
            else {
                panic!("expected confirmation");
            };
            ids.push(err.confirmation_request().unwrap().correlation_id.clone());
        }

        let invalid = guard
            .resolve(&response(&ids[0], true, Some("yes")), None)
            .await
            .unwrap_err();
        assert_eq!(invalid.code, ConfirmationErrorCode::Invalid);
        let denied = guard.resolve(&response(&ids[1], false, None), None).await.unwrap_err();
        assert_eq!(denied.code, ConfirmationErrorCode::Denied);
        let again = guard.resolve(&response(&ids[1], false, None), None).await.unwrap_err();
        assert_eq!(again.code, ConfirmationErrorCode::Expired);

        // Each coded failure carries the challenge so the caller can re-prompt.
        for err in [&invalid, &denied, &again] {
            assert!(err.data.is_some(), "{} without payload", err.code);
        }
        let shown = invalid.confirmation_request().unwrap();
        assert_eq!(shown.correlation_id, ids[0]);
        assert!(shown.confirmation_instructions.contains("delete volume"));
    }

    #[tokio::test]
    async fn malformed_response_rejected_before_broker() {
        let (guard, sink) = guard_with(GuardConfig::default());
        let err = guard
            .resolve(&json!({ "correlationId": "x", "confirmed": "yes" }), None)
            .await
            .unwrap_err();
        assert_eq!(err.code, ConfirmationErrorCode::Invalid);
        assert_eq!(sink.count(SecurityEventType::ConfirmationResponse), 0);
        assert_eq!(sink.count(SecurityEventType::SecurityViolation), 1);
    }

    #[tokio::test]
    async fn injection_rejected_without_challenge() {
        let (guard, sink) = guard_with(GuardConfig::default());
        let err = guard
            .evaluate(&call("destroy_virtual_machine", json!({ "id": "vm-1; rm -rf /" })))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfirmationError::ValidationFailure { .. }));
        assert_eq!(err.retry_hint(), crate::confirmation::RetryHint::Retry);
        assert_eq!(guard.broker().pending_count().await, 0);
        assert_eq!(sink.count(SecurityEventType::ValidationFailure), 1);
        assert_eq!(sink.count(SecurityEventType::ConfirmationRequested), 0);
    }

    #[tokio::test]
    async fn rate_limit_blocks_before_validation() {
        let (guard, sink) = guard_with(GuardConfig {
            rate_limit: RateLimitConfig {
                window_ms: 60_000,
                max_requests: 1,
            },
            ..Default::default()
        });
        guard.evaluate(&call("list_zones", json!({}))).await.unwrap();
        let err = guard.evaluate(&call("list_zones", json!({}))).await.unwrap_err();
        assert_eq!(
            err,
            ConfirmationError::RateLimited {
                operation: "list_zones".into(),
                caller: "alice".into()
            }
        );
        assert_eq!(sink.count(SecurityEventType::RateLimitExceeded), 1);
    }

    #[tokio::test]
    async fn bypass_environment_proceeds_directly() {
        let (guard, sink) = guard_with(GuardConfig {
            enable_bypass: true,
            bypass_environments: vec!["sandbox".into()],
            ..Default::default()
        });
        let mut c = call("destroy_virtual_machine", json!({ "id": "vm-1" }));
        c.environment = Some("sandbox".into());
        assert!(matches!(guard.evaluate(&c).await.unwrap(), GuardDecision::Proceed { .. }));
        assert_eq!(sink.count(SecurityEventType::ConfirmationBypassed), 1);
        assert_eq!(guard.broker().pending_count().await, 0);
    }

    #[tokio::test]
    async fn capacity_error_surfaces() {
        let (guard, _) = guard_with(GuardConfig {
            max_pending_confirmations: 1,
            ..Default::default()
        });
        let c = call("delete_volume", json!({ "id": "vol-1" }));
        guard.evaluate(&c).await.unwrap();
        let err = guard.evaluate(&c).await.unwrap_err();
        assert_eq!(err, ConfirmationError::CapacityExceeded { limit: 1 });
    }

    #[tokio::test]
    async fn cancel_emits_event() {
        let (guard, _) = guard_with(GuardConfig::default());
        let GuardDecision::ConfirmationRequired(err) = guard
            .evaluate(&call("delete_network", json!({ "id": "net-1" })))
            .await
            .unwrap()
        else {
            panic!("expected confirmation");
        };
        let id = err.confirmation_request().unwrap().correlation_id.clone();
        let mut rx = guard.subscribe();
        assert!(guard.cancel(&id, Some("alice"), Some("wrong network")).await);
        assert!(!guard.cancel(&id, Some("alice"), None).await);
        assert_eq!(
            rx.recv().await.unwrap(),
            GuardEvent::ConfirmationCancelled { correlation_id: id }
        );
    }

    #[tokio::test]
    async fn shutdown_clears_pending() {
        let (guard, _) = guard_with(GuardConfig::default());
        guard.evaluate(&call("delete_volume", json!({ "id": "v" }))).await.unwrap();
        assert_eq!(guard.stats().await.pending, 1);
        assert_eq!(guard.shutdown().await, 1);
        assert_eq!(guard.stats().await.pending, 0);
    }

    #[test]
    fn tool_call_deserializes_with_defaults() {
        let c: ToolCall = serde_json::from_value(json!({ "toolName": "list_zones" })).unwrap();
        assert_eq!(c.parameters, json!({}));
        assert!(c.user.is_none());
    }
}
