//! Wire-level confirmation protocol.
//!
//! Broker outcomes leave the process as JSON-RPC style error objects:
//!
//! ```text
//! { "code": -32001, "message": "...", "data": { "confirmationRequest": { ... } } }
//! ```
//!
//! The helpers here build those objects, recognise them on the way back
//! in, render the prompt as text, and check inbound responses before they
//! reach the broker.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::actions::ConfirmationResponse;
use crate::confirmation::{ConfirmationDisplay, ConfirmationError, ConfirmationResolution};

/// The five coded outcomes surfaced at the transport boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum ConfirmationErrorCode {
    Required,
    Timeout,
    Invalid,
    Denied,
    Expired,
}

impl ConfirmationErrorCode {
    pub const ALL: [ConfirmationErrorCode; 5] = [
        ConfirmationErrorCode::Required,
        ConfirmationErrorCode::Timeout,
        ConfirmationErrorCode::Invalid,
        ConfirmationErrorCode::Denied,
        ConfirmationErrorCode::Expired,
    ];

    pub fn code(self) -> i32 {
        match self {
            ConfirmationErrorCode::Required => -32001,
            ConfirmationErrorCode::Timeout => -32002,
            ConfirmationErrorCode::Invalid => -32003,
            ConfirmationErrorCode::Denied => -32004,
            ConfirmationErrorCode::Expired => -32005,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|c| i64::from(c.code()) == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            ConfirmationErrorCode::Required => "CONFIRMATION_REQUIRED",
            ConfirmationErrorCode::Timeout => "CONFIRMATION_TIMEOUT",
            ConfirmationErrorCode::Invalid => "CONFIRMATION_INVALID",
            ConfirmationErrorCode::Denied => "CONFIRMATION_DENIED",
            ConfirmationErrorCode::Expired => "CONFIRMATION_EXPIRED",
        }
    }

    /// Canonical message sent with the code.
    pub fn message(self) -> &'static str {
        match self {
            ConfirmationErrorCode::Required => "This operation requires explicit confirmation",
            ConfirmationErrorCode::Timeout => "Confirmation request timed out",
            ConfirmationErrorCode::Invalid => {
                "Confirmation text does not match the required phrase"
            }
            ConfirmationErrorCode::Denied => "Operation was denied by user",
            ConfirmationErrorCode::Expired => "Confirmation request is invalid or has expired",
        }
    }
}

impl std::fmt::Display for ConfirmationErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

impl From<ConfirmationErrorCode> for i32 {
    fn from(code: ConfirmationErrorCode) -> Self {
        code.code()
    }
}

impl TryFrom<i32> for ConfirmationErrorCode {
    type Error = String;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        Self::from_code(i64::from(code))
            .ok_or_else(|| format!("unknown confirmation error code {code}"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationErrorData {
    pub confirmation_request: ConfirmationDisplay,
}

/// Coded error object carried across the transport boundary.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct ConfirmationProtocolError {
    pub code: ConfirmationErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ConfirmationErrorData>,
}

impl ConfirmationProtocolError {
    pub fn new(code: ConfirmationErrorCode, display: Option<ConfirmationDisplay>) -> Self {
        Self {
            code,
            message: code.message().to_string(),
            data: display.map(|confirmation_request| ConfirmationErrorData {
                confirmation_request,
            }),
        }
    }

    /// The REQUIRED error for a freshly issued challenge.
    pub fn required(display: ConfirmationDisplay) -> Self {
        Self::new(ConfirmationErrorCode::Required, Some(display))
    }

    /// Map a broker failure to its coded outcome. Failures that are not part
    /// of the confirmation exchange (capacity, rate limit, validation) map
    /// to `None`.
    pub fn from_failure(
        err: &ConfirmationError,
        display: Option<ConfirmationDisplay>,
    ) -> Option<Self> {
        let code = match err {
            ConfirmationError::UnknownCorrelation { .. } => ConfirmationErrorCode::Expired,
            ConfirmationError::Timeout { .. } => ConfirmationErrorCode::Timeout,
            ConfirmationError::InvalidConfirmationText { .. } => ConfirmationErrorCode::Invalid,
            ConfirmationError::DeniedByUser { .. } => ConfirmationErrorCode::Denied,
            ConfirmationError::CapacityExceeded { .. }
            | ConfirmationError::DuplicateCorrelation { .. }
            | ConfirmationError::ValidationFailure { .. }
            | ConfirmationError::RateLimited { .. } => return None,
        };
        Some(Self::new(code, display))
    }

    pub fn confirmation_request(&self) -> Option<&ConfirmationDisplay> {
        self.data.as_ref().map(|d| &d.confirmation_request)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// `Ok` when the operation may proceed, the coded error otherwise. The
/// error carries the challenge payload whenever the broker still has it.
pub fn resolution_to_result(
    resolution: &ConfirmationResolution,
) -> Result<(), ConfirmationProtocolError> {
    if resolution.allow_operation {
        return Ok(());
    }
    let display = resolution.display().cloned();
    let coded = resolution
        .failure()
        .and_then(|err| ConfirmationProtocolError::from_failure(err, display.clone()));
    Err(coded.unwrap_or_else(|| {
        ConfirmationProtocolError::new(ConfirmationErrorCode::Expired, display)
    }))
}

/// Whether `value` is one of the five coded confirmation errors.
pub fn is_confirmation_error(value: &Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };
    let known_code = obj
        .get("code")
        .and_then(Value::as_i64)
        .and_then(ConfirmationErrorCode::from_code)
        .is_some();
    known_code && obj.get("message").is_some_and(Value::is_string)
}

/// The challenge payload of a coded error, if it carries one.
pub fn extract_confirmation_request(value: &Value) -> Option<ConfirmationDisplay> {
    if !is_confirmation_error(value) {
        return None;
    }
    let payload = value.get("data")?.get("confirmationRequest")?;
    serde_json::from_value(payload.clone()).ok()
}

/// Structural check of an inbound `ConfirmationResponse`.
pub fn validate_response_shape(value: &Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };
    let correlation_ok = obj.get("correlationId").is_some_and(Value::is_string);
    let confirmed_ok = obj.get("confirmed").is_some_and(Value::is_boolean);
    let timestamp_ok = obj.get("timestamp").is_some_and(Value::is_number);
    let input_ok = match obj.get("userInput") {
        None | Some(Value::Null) => true,
        Some(v) => v.is_string(),
    };
    correlation_ok && confirmed_ok && timestamp_ok && input_ok
}

/// Shape-check and decode an inbound response.
pub fn parse_confirmation_response(value: &Value) -> Option<ConfirmationResponse> {
    if !validate_response_shape(value) {
        return None;
    }
    let mut value = value.clone();
    // Clients may send fractional or negative timestamps; normalise to millis.
    if let Some(ts) = value.get("timestamp").and_then(Value::as_f64) {
        value["timestamp"] = Value::from(ts.max(0.0) as u64);
    }
    serde_json::from_value(value).ok()
}

/// Deterministic plain-text rendering of a challenge.
pub fn format_for_display(display: &ConfirmationDisplay) -> String {
    let details = &display.action_details;
    let mut out = String::new();
    let _ = writeln!(out, "{}", display.title);
    let _ = writeln!(out);
    let _ = writeln!(out, "Operation: {}", display.description);
    let _ = writeln!(
        out,
        "Severity: {} | Category: {} | Reversible: {} | Impact: {}",
        details.severity.as_str().to_uppercase(),
        details.category,
        if details.reversible { "yes" } else { "NO" },
        details.impact_scope,
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "WARNING: {}", display.warning_message);
    let _ = writeln!(out);
    let _ = writeln!(out, "Parameters:");
    if display.parameters.is_empty() {
        let _ = writeln!(out, "  (none)");
    }
    for (key, value) in &display.parameters {
        let _ = writeln!(out, "  {key}: {value}");
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", display.confirmation_instructions);
    let _ = writeln!(out);
    let _ = writeln!(out, "Expires at: {} (unix ms)", display.expires_at);
    let _ = write!(out, "Correlation ID: {}", display.correlation_id);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{ActionRegistry, ImpactScope};
    use crate::audit::{MemoryAuditSink, Severity};
    use crate::confirmation::{ActionDetails, BrokerConfig, ConfirmationBroker};
    use serde_json::{json, Map};
    use std::sync::Arc;

    fn display() -> ConfirmationDisplay {
        let mut parameters = Map::new();
        parameters.insert("expunge".into(), json!(true));
        parameters.insert("id".into(), json!("vm-1"));
        ConfirmationDisplay {
            correlation_id: "confirm_1_abc".into(),
            title: "CRITICAL risk operation: destroy_virtual_machine".into(),
            description: "Destroy a virtual machine".into(),
            warning_message: "Gone for good".into(),
            confirmation_instructions: "Type \"destroy permanently\"".into(),
            action_details: ActionDetails {
                category: "Virtual Machine Operations".into(),
                severity: Severity::Critical,
                reversible: false,
                impact_scope: ImpactScope::SingleResource,
            },
            parameters,
            expires_at: 1_700_000_300_000,
        }
    }

    #[test]
    fn codes_are_stable() {
        let codes: Vec<i32> = ConfirmationErrorCode::ALL.iter().map(|c| c.code()).collect();
        assert_eq!(codes, vec![-32001, -32002, -32003, -32004, -32005]);
        assert_eq!(ConfirmationErrorCode::from_code(-32004), Some(ConfirmationErrorCode::Denied));
        assert_eq!(ConfirmationErrorCode::from_code(-32000), None);
    }

    #[test]
    fn required_error_wire_shape() {
        let err = ConfirmationProtocolError::required(display());
        let v = err.to_value();
        assert_eq!(v["code"], -32001);
        assert_eq!(v["data"]["confirmationRequest"]["correlationId"], "confirm_1_abc");
        assert_eq!(
            v["data"]["confirmationRequest"]["actionDetails"]["impactScope"],
            "single-resource"
        );
        assert_eq!(v["data"]["confirmationRequest"]["expiresAt"], 1_700_000_300_000u64);
        assert!(is_confirmation_error(&v));
        assert_eq!(extract_confirmation_request(&v), Some(display()));
    }

    #[test]
    fn bare_coded_error_has_no_payload() {
        let err = ConfirmationProtocolError::new(ConfirmationErrorCode::Expired, None);
        let v = err.to_value();
        assert!(v.get("data").is_none());
        assert!(is_confirmation_error(&v));
        assert!(extract_confirmation_request(&v).is_none());
    }

    #[test]
    fn foreign_errors_not_recognised() {
        assert!(!is_confirmation_error(&json!({ "code": -32601, "message": "method not found" })));
        assert!(!is_confirmation_error(&json!({ "code": -32001 })));
        assert!(!is_confirmation_error(&json!("CONFIRMATION_REQUIRED")));
        let foreign = json!({ "code": 1, "message": "x", "data": {} });
        assert!(extract_confirmation_request(&foreign).is_none());
    }

    #[test]
    fn failures_map_to_codes() {
        let map = |e: ConfirmationError| {
            ConfirmationProtocolError::from_failure(&e, None).map(|p| p.code)
        };
        assert_eq!(
            map(ConfirmationError::UnknownCorrelation { correlation_id: "c".into() }),
            Some(ConfirmationErrorCode::Expired)
        );
        assert_eq!(
            map(ConfirmationError::Timeout { correlation_id: "c".into() }),
            Some(ConfirmationErrorCode::Timeout)
        );
        assert_eq!(
            map(ConfirmationError::InvalidConfirmationText { tool_name: "t".into() }),
            Some(ConfirmationErrorCode::Invalid)
        );
        assert_eq!(
            map(ConfirmationError::DeniedByUser { tool_name: "t".into() }),
            Some(ConfirmationErrorCode::Denied)
        );
        assert_eq!(map(ConfirmationError::CapacityExceeded { limit: 1 }), None);
        assert_eq!(
            map(ConfirmationError::DuplicateCorrelation { correlation_id: "c".into() }),
            None
        );
    }

    #[test]
    fn response_shape_checks() {
        assert!(validate_response_shape(&json!({
            "correlationId": "c", "confirmed": true, "timestamp": 1, "userInput": "x"
        })));
        assert!(validate_response_shape(&json!({
            "correlationId": "c", "confirmed": false, "timestamp": 1.5
        })));
        assert!(!validate_response_shape(&json!({
            "correlationId": "c", "confirmed": "yes", "timestamp": 1
        })));
        assert!(!validate_response_shape(&json!({
            "correlationId": 1, "confirmed": true, "timestamp": 1
        })));
        assert!(!validate_response_shape(&json!({ "correlationId": "c", "confirmed": true })));
        assert!(!validate_response_shape(&json!({
            "correlationId": "c", "confirmed": true, "timestamp": 1, "userInput": 5
        })));
        assert!(!validate_response_shape(&json!([1, 2])));
    }

    #[test]
    fn parse_normalises_timestamp() {
        let resp = parse_confirmation_response(&json!({
            "correlationId": "c", "confirmed": true, "timestamp": 12.9, "userInput": "go"
        }))
        .unwrap();
        assert_eq!(resp.timestamp, 12);
        assert_eq!(resp.user_input.as_deref(), Some("go"));
        assert!(parse_confirmation_response(&json!({ "confirmed": true })).is_none());
    }

    #[test]
    fn text_rendering_is_deterministic() {
        let text = format_for_display(&display());
        assert_eq!(text, format_for_display(&display()));
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "CRITICAL risk operation: destroy_virtual_machine");
        assert!(text.contains("Reversible: NO"));
        assert!(text.contains("  id: \"vm-1\""));
        assert!(text.contains("WARNING: Gone for good"));
        assert_eq!(lines.last().copied(), Some("Correlation ID: confirm_1_abc"));
        let expunge = text.find("expunge").unwrap();
        let id = text.find("  id:").unwrap();
        assert!(expunge < id);
    }

    async fn issue(broker: &ConfirmationBroker) -> crate::actions::ConfirmationRequest {
        broker
            .create_confirmation_request("delete_volume", &Map::new(), None, None)
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn resolution_mapping() {
        let sink = Arc::new(MemoryAuditSink::new());
        let registry = Arc::new(ActionRegistry::with_default_catalog(sink.clone()));
        let broker = ConfirmationBroker::new(registry, sink, BrokerConfig::default());
        let a = issue(&broker).await;
        let ok = broker
            .process_confirmation_response(a.correlation_id(), true, Some("delete volume"), None)
            .await;
        assert!(resolution_to_result(&ok).is_ok());

        let b = issue(&broker).await;
        let denied = broker
            .process_confirmation_response(b.correlation_id(), false, None, None)
            .await;
        let err = resolution_to_result(&denied).unwrap_err();
        assert_eq!(err.code, ConfirmationErrorCode::Denied);
        assert_eq!(err.confirmation_request().unwrap().correlation_id, b.correlation_id());

        let c = issue(&broker).await;
        let invalid = broker
            .process_confirmation_response(c.correlation_id(), true, Some("nope"), None)
            .await;
        let err = resolution_to_result(&invalid).unwrap_err();
        assert_eq!(err.code, ConfirmationErrorCode::Invalid);
        let v = err.to_value();
        assert_eq!(v["data"]["confirmationRequest"]["correlationId"], c.correlation_id());
        assert!(v["data"]["confirmationRequest"]["expiresAt"].is_u64());

        // A second answer to an already resolved id still shows what it was.
        let again = broker
            .process_confirmation_response(c.correlation_id(), true, Some("delete volume"), None)
            .await;
        let err = resolution_to_result(&again).unwrap_err();
        assert_eq!(err.code, ConfirmationErrorCode::Expired);
        assert!(err.data.is_some());

        let unknown = broker.process_confirmation_response("missing", true, None, None).await;
        let err = resolution_to_result(&unknown).unwrap_err();
        assert_eq!(err.code, ConfirmationErrorCode::Expired);
        assert!(err.data.is_none());
    }
}
