//! Render-ready view of a challenge.
//!
//! This is the `confirmationRequest` payload carried on the wire; field
//! order is fixed and matches what a client prompt shows top to bottom.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::actions::{ConfirmationRequest, ImpactScope};
use crate::audit::Severity;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDetails {
    pub category: String,
    pub severity: Severity,
    pub reversible: bool,
    pub impact_scope: ImpactScope,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationDisplay {
    pub correlation_id: String,
    pub title: String,
    pub description: String,
    pub warning_message: String,
    pub confirmation_instructions: String,
    pub action_details: ActionDetails,
    /// Redacted copy of the call parameters.
    pub parameters: Map<String, Value>,
    /// Unix epoch millis.
    pub expires_at: u64,
}

impl ConfirmationDisplay {
    pub fn new(request: &ConfirmationRequest, timeout_ms: u64) -> Self {
        let action = request.action();
        Self {
            correlation_id: request.correlation_id().to_string(),
            title: format!(
                "{} risk operation: {}",
                action.severity.as_str().to_uppercase(),
                request.tool_name()
            ),
            description: action.description.clone(),
            warning_message: action.warning_message.clone(),
            confirmation_instructions: format!(
                "To proceed, respond with confirmed=true and type exactly: \"{}\"",
                action.required_confirmation_phrase
            ),
            action_details: ActionDetails {
                category: action.category.clone(),
                severity: action.severity,
                reversible: action.reversible,
                impact_scope: action.impact_scope,
            },
            parameters: request.redacted_parameters(),
            expires_at: request.created_at().saturating_add(timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionRegistry;
    use crate::audit::MemoryAuditSink;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn display_fields_in_wire_order() {
        let registry = ActionRegistry::with_default_catalog(Arc::new(MemoryAuditSink::new()));
        let mut params = Map::new();
        params.insert("id".into(), json!("vm-1"));
        params.insert("apiKey".into(), json!("abc"));
        let req = registry
            .generate_confirmation_request("destroy_virtual_machine", &params, Some("c-1"))
            .unwrap();

        let display = ConfirmationDisplay::new(&req, 1_000);
        assert_eq!(display.correlation_id, "c-1");
        assert_eq!(display.title, "CRITICAL risk operation: destroy_virtual_machine");
        assert!(display.confirmation_instructions.contains("\"destroy permanently\""));
        assert_eq!(display.parameters["apiKey"], "[REDACTED]");
        assert_eq!(display.expires_at, req.created_at() + 1_000);
        assert!(!display.action_details.reversible);

        let text = serde_json::to_string(&display).unwrap();
        let order: Vec<usize> = [
            "correlationId",
            "title",
            "description",
            "warningMessage",
            "confirmationInstructions",
            "actionDetails",
            "parameters",
            "expiresAt",
        ]
        .iter()
        .map(|k| text.find(&format!("\"{k}\"")).unwrap())
        .collect();
        assert!(order.windows(2).all(|w| w[0] < w[1]));
        assert!(text.contains("\"impactScope\":\"single-resource\""));
    }
}
