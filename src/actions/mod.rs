//! Action registry: which operations are dangerous and how to confirm them.
//!
//! The catalog is built once and never mutated afterwards. Besides lookups
//! the registry owns the two stateless halves of the confirmation protocol:
//! building a challenge and checking a response against it.

pub mod catalog;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::audit::redact::redact_map;
use crate::audit::{
    now_millis, AuditSink, EventResult, SecurityEvent, SecurityEventType, Severity,
};

const SOURCE: &str = "action_registry";

/// Blast radius of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImpactScope {
    SingleResource,
    MultipleResources,
    Infrastructure,
    ServiceDisruption,
}

impl ImpactScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImpactScope::SingleResource => "single-resource",
            ImpactScope::MultipleResources => "multiple-resources",
            ImpactScope::Infrastructure => "infrastructure",
            ImpactScope::ServiceDisruption => "service-disruption",
        }
    }
}

impl std::fmt::Display for ImpactScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Danger metadata for one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDefinition {
    pub severity: Severity,
    pub category: String,
    pub description: String,
    pub warning_message: String,
    /// Text the user must type back, compared case-insensitively after trimming.
    pub required_confirmation_phrase: String,
    pub reversible: bool,
    pub impact_scope: ImpactScope,
}

/// A confirmation challenge. Immutable once built.
#[derive(Debug, Clone)]
pub struct ConfirmationRequest {
    tool_name: String,
    action: Arc<ActionDefinition>,
    parameters: Map<String, Value>,
    correlation_id: String,
    created_at: u64,
}

impl ConfirmationRequest {
    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    pub fn action(&self) -> &ActionDefinition {
        &self.action
    }

    /// Caller-supplied parameters, unredacted. Use `redacted_parameters` for display.
    pub fn parameters(&self) -> &Map<String, Value> {
        &self.parameters
    }

    pub fn redacted_parameters(&self) -> Map<String, Value> {
        redact_map(&self.parameters)
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Unix epoch millis.
    pub fn created_at(&self) -> u64 {
        self.created_at
    }
}

/// A caller's answer to a challenge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationResponse {
    pub correlation_id: String,
    pub confirmed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_input: Option<String>,
    pub timestamp: u64,
}

impl ConfirmationResponse {
    pub fn new(correlation_id: &str, confirmed: bool, user_input: Option<&str>) -> Self {
        Self {
            correlation_id: correlation_id.to_string(),
            confirmed,
            user_input: user_input.map(str::to_string),
            timestamp: now_millis(),
        }
    }
}

/// Catalog breakdown.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStatistics {
    pub total: usize,
    pub by_severity: BTreeMap<Severity, usize>,
    pub by_category: BTreeMap<String, usize>,
    pub by_impact_scope: BTreeMap<ImpactScope, usize>,
    pub irreversible: usize,
}

/// Immutable catalog of dangerous operations.
pub struct ActionRegistry {
    actions: HashMap<String, Arc<ActionDefinition>>,
    audit: Arc<dyn AuditSink>,
}

impl ActionRegistry {
    /// Build a registry from explicit definitions. Later duplicates win.
    pub fn from_definitions<I>(definitions: I, audit: Arc<dyn AuditSink>) -> Self
    where
        I: IntoIterator<Item = (String, ActionDefinition)>,
    {
        let actions = definitions
            .into_iter()
            .map(|(name, def)| (name, Arc::new(def)))
            .collect();
        Self { actions, audit }
    }

    /// Build a registry from the built-in catalog.
    pub fn with_default_catalog(audit: Arc<dyn AuditSink>) -> Self {
        Self::from_definitions(catalog::default_definitions(), audit)
    }

    pub fn is_dangerous_action(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn get_action_config(&self, name: &str) -> Option<&ActionDefinition> {
        self.actions.get(name).map(|a| a.as_ref())
    }

    /// Sorted names of every registered operation.
    pub fn action_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Build a challenge for `tool_name`. `None` means the operation is not
    /// dangerous, which is not an error.
    pub fn generate_confirmation_request(
        &self,
        tool_name: &str,
        parameters: &Map<String, Value>,
        correlation_id: Option<&str>,
    ) -> Option<ConfirmationRequest> {
        let action = self.actions.get(tool_name)?;
        let correlation_id = correlation_id
            .map(str::to_string)
            .unwrap_or_else(generate_correlation_id);

        self.audit.log_security_event(
            SecurityEvent::new(
                SecurityEventType::ConfirmationRequested,
                Severity::Medium,
                SOURCE,
                tool_name,
                EventResult::Success,
            )
            .with_resource(&correlation_id)
            .with_details(json!({
                "correlationId": correlation_id,
                "severity": action.severity,
                "category": action.category,
                "parameters": redact_map(parameters),
            })),
        );

        Some(ConfirmationRequest {
            tool_name: tool_name.to_string(),
            action: Arc::clone(action),
            parameters: parameters.clone(),
            correlation_id,
            created_at: now_millis(),
        })
    }

    /// Check a response against its challenge. Only an exact phrase match
    /// (modulo case and surrounding whitespace) on a confirmed response passes.
    pub fn validate_confirmation_response(
        &self,
        request: &ConfirmationRequest,
        response: &ConfirmationResponse,
    ) -> bool {
        if response.correlation_id != request.correlation_id {
            self.audit.log_security_violation(
                SOURCE,
                "correlation_id_mismatch",
                Severity::High,
                json!({
                    "tool": request.tool_name,
                    "expected": request.correlation_id,
                    "received": response.correlation_id,
                }),
            );
            return false;
        }

        if !response.confirmed {
            self.audit.log_security_event(
                SecurityEvent::new(
                    SecurityEventType::ConfirmationResponse,
                    Severity::Medium,
                    SOURCE,
                    &request.tool_name,
                    EventResult::Blocked,
                )
                .with_resource(&request.correlation_id)
                .with_details(json!({ "reason": "denied_by_user" })),
            );
            return false;
        }

        if !phrase_matches(
            response.user_input.as_deref().unwrap_or(""),
            &request.action.required_confirmation_phrase,
        ) {
            // Confirmed but with the wrong words is treated as suspicious.
            self.audit.log_security_violation(
                SOURCE,
                "invalid_confirmation_text",
                Severity::High,
                json!({
                    "tool": request.tool_name,
                    "correlationId": request.correlation_id,
                }),
            );
            return false;
        }

        self.audit.log_security_event(
            SecurityEvent::new(
                SecurityEventType::ConfirmationResponse,
                Severity::Medium,
                SOURCE,
                &request.tool_name,
                EventResult::Success,
            )
            .with_resource(&request.correlation_id),
        );
        true
    }

    pub fn get_statistics(&self) -> RegistryStatistics {
        let mut stats = RegistryStatistics {
            total: self.actions.len(),
            ..Default::default()
        };
        for def in self.actions.values() {
            *stats.by_severity.entry(def.severity).or_default() += 1;
            *stats.by_category.entry(def.category.clone()).or_default() += 1;
            *stats.by_impact_scope.entry(def.impact_scope).or_default() += 1;
            if !def.reversible {
                stats.irreversible += 1;
            }
        }
        stats
    }
}

/// `confirm_<millis>_<random>`.
fn generate_correlation_id() -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("confirm_{}_{}", now_millis(), &random[..12])
}

fn phrase_matches(input: &str, phrase: &str) -> bool {
    input.trim().to_lowercase() == phrase.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use std::collections::HashSet;

    fn registry() -> (ActionRegistry, Arc<MemoryAuditSink>) {
        let sink = Arc::new(MemoryAuditSink::new());
        (ActionRegistry::with_default_catalog(sink.clone()), sink)
    }

    fn params(id: &str) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("id".into(), Value::String(id.into()));
        m
    }

    #[test]
    fn registered_names_are_dangerous() {
        let (reg, _) = registry();
        for name in reg.action_names() {
            assert!(reg.is_dangerous_action(name));
            assert!(reg.generate_confirmation_request(name, &params("x"), None).is_some());
        }
    }

    #[test]
    fn unregistered_names_pass_through() {
        let (reg, sink) = registry();
        for name in ["list_virtual_machines", "deploy_virtual_machine", ""] {
            assert!(!reg.is_dangerous_action(name));
            assert!(reg.get_action_config(name).is_none());
            assert!(reg.generate_confirmation_request(name, &params("x"), None).is_none());
        }
        assert!(sink.is_empty());
    }

    #[test]
    fn correlation_ids_unique() {
        let sink = Arc::new(MemoryAuditSink::with_retention(1));
        let reg = ActionRegistry::with_default_catalog(sink);
        let p = params("vm-1");
        let ids: HashSet<String> = (0..10_000)
            .map(|_| {
                reg.generate_confirmation_request("destroy_virtual_machine", &p, None)
                    .unwrap()
                    .correlation_id()
                    .to_string()
            })
            .collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn explicit_correlation_id_kept() {
        let (reg, _) = registry();
        let req = reg
            .generate_confirmation_request("delete_volume", &params("v"), Some("fixed-id"))
            .unwrap();
        assert_eq!(req.correlation_id(), "fixed-id");
        assert_eq!(req.tool_name(), "delete_volume");
    }

    #[test]
    fn requested_event_redacts_parameters() {
        let (reg, sink) = registry();
        let mut p = params("vm-1");
        p.insert("password".into(), Value::String("hunter2".into()));
        reg.generate_confirmation_request("destroy_virtual_machine", &p, None)
            .unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, SecurityEventType::ConfirmationRequested);
        assert_eq!(events[0].details["parameters"]["password"], "[REDACTED]");
        assert_eq!(events[0].details["parameters"]["id"], "vm-1");
    }

    #[test]
    fn phrase_match_ignores_case_and_outer_whitespace() {
        let (reg, _) = registry();
        let req = reg
            .generate_confirmation_request("destroy_virtual_machine", &params("vm-1"), None)
            .unwrap();
        let id = req.correlation_id().to_string();

        let ok = ConfirmationResponse::new(&id, true, Some("Destroy Permanently "));
        assert!(reg.validate_confirmation_response(&req, &ok));

        let partial = ConfirmationResponse::new(&id, true, Some("destroy permanent"));
        assert!(!reg.validate_confirmation_response(&req, &partial));
    }

    #[test]
    fn wrong_phrase_is_high_severity_violation() {
        let (reg, sink) = registry();
        let req = reg
            .generate_confirmation_request("destroy_virtual_machine", &params("vm-1"), None)
            .unwrap();
        let resp = ConfirmationResponse::new(req.correlation_id(), true, Some("yes"));
        assert!(!reg.validate_confirmation_response(&req, &resp));

        let violation = sink
            .events()
            .into_iter()
            .find(|e| e.event_type == SecurityEventType::SecurityViolation)
            .unwrap();
        assert_eq!(violation.action, "invalid_confirmation_text");
        assert_eq!(violation.severity, Severity::High);
    }

    #[test]
    fn denial_is_not_a_violation() {
        let (reg, sink) = registry();
        let req = reg
            .generate_confirmation_request("delete_network", &params("n"), None)
            .unwrap();
        let resp = ConfirmationResponse::new(req.correlation_id(), false, Some("delete network"));
        assert!(!reg.validate_confirmation_response(&req, &resp));
        assert_eq!(sink.count(SecurityEventType::SecurityViolation), 0);
        assert_eq!(sink.count(SecurityEventType::ConfirmationResponse), 1);
    }

    #[test]
    fn mismatched_correlation_rejected() {
        let (reg, sink) = registry();
        let req = reg
            .generate_confirmation_request("delete_network", &params("n"), None)
            .unwrap();
        let resp = ConfirmationResponse::new("someone-else", true, Some("delete network"));
        assert!(!reg.validate_confirmation_response(&req, &resp));
        assert_eq!(sink.count(SecurityEventType::SecurityViolation), 1);
    }

    #[test]
    fn missing_user_input_fails() {
        let (reg, _) = registry();
        let req = reg
            .generate_confirmation_request("delete_network", &params("n"), None)
            .unwrap();
        let resp = ConfirmationResponse::new(req.correlation_id(), true, None);
        assert!(!reg.validate_confirmation_response(&req, &resp));
    }

    #[test]
    fn statistics_count_catalog() {
        let sink: Arc<dyn AuditSink> = Arc::new(MemoryAuditSink::new());
        let defs = vec![
            (
                "wipe".to_string(),
                ActionDefinition {
                    severity: Severity::Critical,
                    category: "Storage Operations".into(),
                    description: "Wipe".into(),
                    warning_message: "Gone".into(),
                    required_confirmation_phrase: "wipe".into(),
                    reversible: false,
                    impact_scope: ImpactScope::Infrastructure,
                },
            ),
            (
                "pause".to_string(),
                ActionDefinition {
                    severity: Severity::Low,
                    category: "Virtual Machine Operations".into(),
                    description: "Pause".into(),
                    warning_message: "Paused".into(),
                    required_confirmation_phrase: "pause".into(),
                    reversible: true,
                    impact_scope: ImpactScope::ServiceDisruption,
                },
            ),
        ];
        let reg = ActionRegistry::from_definitions(defs, sink);
        let stats = reg.get_statistics();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.irreversible, 1);
        assert_eq!(stats.by_severity[&Severity::Critical], 1);
        assert_eq!(stats.by_severity[&Severity::Low], 1);
        assert_eq!(stats.by_category["Storage Operations"], 1);
        assert_eq!(stats.by_impact_scope[&ImpactScope::Infrastructure], 1);
    }

    #[test]
    fn default_catalog_statistics_consistent() {
        let (reg, _) = registry();
        let stats = reg.get_statistics();
        assert_eq!(stats.total, reg.len());
        assert_eq!(stats.by_severity.values().sum::<usize>(), reg.len());
        assert_eq!(stats.by_category.values().sum::<usize>(), reg.len());
        assert!(stats.irreversible > 0);
    }
}
