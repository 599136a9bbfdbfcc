//! Per-operation parameter schemas (JSON Schema).
//!
//! Operations without a registered schema fall back to `PassThrough`, which
//! accepts any parameter object.

use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid schema for '{operation}': {reason}")]
    Invalid { operation: String, reason: String },
}

/// One failed constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Dotted path into the parameters, `(root)` for the object itself.
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// A compiled parameter schema.
pub enum ParameterSchema {
    PassThrough,
    Json {
        source: Value,
        validator: jsonschema::Validator,
    },
}

impl ParameterSchema {
    /// Compile a JSON Schema document.
    pub fn compile(operation: &str, schema: Value) -> Result<Self, SchemaError> {
        let validator = jsonschema::options()
            .build(&schema)
            .map_err(|e| SchemaError::Invalid {
                operation: operation.to_string(),
                reason: e.to_string(),
            })?;
        Ok(ParameterSchema::Json {
            source: schema,
            validator,
        })
    }

    /// Every constraint the parameters break. Empty means valid.
    pub fn validate(&self, params: &Value) -> Vec<FieldError> {
        match self {
            ParameterSchema::PassThrough => Vec::new(),
            ParameterSchema::Json { validator, .. } => validator
                .iter_errors(params)
                .map(|err| FieldError {
                    path: dotted_path(&err.instance_path().to_string()),
                    message: err.to_string(),
                })
                .collect(),
        }
    }

    /// The schema document, `None` for pass-through.
    pub fn source(&self) -> Option<&Value> {
        match self {
            ParameterSchema::PassThrough => None,
            ParameterSchema::Json { source, .. } => Some(source),
        }
    }
}

/// `/tags/0/key` → `tags.0.key`.
fn dotted_path(pointer: &str) -> String {
    let trimmed = pointer.trim_start_matches('/');
    if trimmed.is_empty() {
        "(root)".to_string()
    } else {
        trimmed.replace('/', ".")
    }
}

fn id_only(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "id": { "type": "string", "minLength": 1, "maxLength": 255, "description": description }
        },
        "required": ["id"]
    })
}

/// Schemas shipped for the most common dangerous operations.
pub fn default_schemas() -> Vec<(&'static str, Value)> {
    vec![
        (
            "destroy_virtual_machine",
            json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string", "minLength": 1, "maxLength": 255 },
                    "expunge": { "type": "boolean" },
                    "volumeids": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["id"]
            }),
        ),
        ("expunge_virtual_machine", id_only("Virtual machine id")),
        ("stop_virtual_machine", id_only("Virtual machine id")),
        ("reboot_virtual_machine", id_only("Virtual machine id")),
        ("delete_volume", id_only("Volume id")),
        (
            "delete_network",
            json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string", "minLength": 1, "maxLength": 255 },
                    "forced": { "type": "boolean" }
                },
                "required": ["id"]
            }),
        ),
        (
            "delete_kubernetes_cluster",
            json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string", "minLength": 1, "maxLength": 255 },
                    "cleanup": { "type": "boolean" },
                    "expunge": { "type": "boolean" }
                },
                "required": ["id"]
            }),
        ),
        (
            "scale_kubernetes_cluster",
            json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string", "minLength": 1, "maxLength": 255 },
                    "size": { "type": "integer", "minimum": 1, "maximum": 1000 }
                },
                "required": ["id", "size"]
            }),
        ),
        ("delete_account", id_only("Account id")),
        ("delete_zone", id_only("Zone id")),
        ("delete_snapshot", id_only("Snapshot id")),
        (
            "deploy_virtual_machine",
            json!({
                "type": "object",
                "properties": {
                    "serviceofferingid": { "type": "string", "minLength": 1 },
                    "templateid": { "type": "string", "minLength": 1 },
                    "zoneid": { "type": "string", "minLength": 1 },
                    "name": { "type": "string", "pattern": "^[A-Za-z0-9-]{1,63}$" },
                    "displayname": { "type": "string", "maxLength": 255 }
                },
                "required": ["serviceofferingid", "templateid", "zoneid"]
            }),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schemas_compile() {
        for (name, schema) in default_schemas() {
            assert!(ParameterSchema::compile(name, schema).is_ok(), "{name}");
        }
    }

    #[test]
    fn pass_through_accepts_anything() {
        assert!(ParameterSchema::PassThrough.validate(&json!({ "x": [1, 2] })).is_empty());
        assert!(ParameterSchema::PassThrough.source().is_none());
    }

    #[test]
    fn missing_required_field_reported_at_root() {
        let schema = ParameterSchema::compile("delete_volume", id_only("Volume id")).unwrap();
        let errors = schema.validate(&json!({}));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "(root)");
        assert!(errors[0].message.contains("id"));
    }

    #[test]
    fn wrong_type_reported_at_field() {
        let (_, raw) = default_schemas()
            .into_iter()
            .find(|(n, _)| *n == "scale_kubernetes_cluster")
            .unwrap();
        let schema = ParameterSchema::compile("scale_kubernetes_cluster", raw).unwrap();
        let errors = schema.validate(&json!({ "id": "k8s-1", "size": "three" }));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "size");
        assert!(errors[0].to_string().starts_with("size: "));
    }

    #[test]
    fn invalid_schema_rejected() {
        let err = ParameterSchema::compile("bad", json!({ "type": 12 })).err().unwrap();
        assert!(err.to_string().contains("bad"));
    }

    #[test]
    fn nested_path_dotted() {
        assert_eq!(dotted_path("/tags/0/key"), "tags.0.key");
        assert_eq!(dotted_path(""), "(root)");
    }
}
