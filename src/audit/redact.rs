//! Parameter redaction for audit records and confirmation prompts.
//!
//! Secret-looking keys are masked, long strings are cut. Applied recursively.

use serde_json::{Map, Value};

pub const REDACTED: &str = "[REDACTED]";
pub const TRUNCATED_MARKER: &str = "...[truncated]";

/// Strings longer than this are truncated in redacted output.
pub const MAX_DISPLAY_CHARS: usize = 100;

const SECRET_KEY_FRAGMENTS: &[&str] = &[
    "password",
    "passwd",
    "secret",
    "token",
    "apikey",
    "api_key",
    "privatekey",
    "private_key",
    "credential",
    "auth",
];

/// Whether a parameter key names something that must never be echoed.
pub fn is_secret_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SECRET_KEY_FRAGMENTS.iter().any(|frag| lower.contains(frag))
}

/// Redact a parameter value for display or audit.
pub fn redact_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(truncate_for_display(s)),
        Value::Array(items) => Value::Array(items.iter().map(redact_value).collect()),
        Value::Object(map) => Value::Object(redact_map(map)),
        other => other.clone(),
    }
}

/// Redact an object map.
pub fn redact_map(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter()
        .map(|(k, v)| {
            let redacted = if is_secret_key(k) {
                Value::String(REDACTED.into())
            } else {
                redact_value(v)
            };
            (k.clone(), redacted)
        })
        .collect()
}

fn truncate_for_display(s: &str) -> String {
    if s.chars().count() <= MAX_DISPLAY_CHARS {
        return s.to_string();
    }
    let head: String = s.chars().take(MAX_DISPLAY_CHARS).collect();
    format!("{head}{TRUNCATED_MARKER}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn secret_keys_masked() {
        let out = redact_value(&json!({
            "id": "vm-1",
            "password": "hunter2",
            "apiKey": "abc",
            "secretkey": "xyz",
            "nested": { "userToken": "t" }
        }));
        assert_eq!(out["id"], "vm-1");
        assert_eq!(out["password"], REDACTED);
        assert_eq!(out["apiKey"], REDACTED);
        assert_eq!(out["secretkey"], REDACTED);
        assert_eq!(out["nested"]["userToken"], REDACTED);
    }

    #[test]
    fn long_strings_truncated_with_marker() {
        let long = "x".repeat(250);
        let out = redact_value(&json!({ "userdata": long }));
        let s = out["userdata"].as_str().unwrap();
        assert!(s.ends_with(TRUNCATED_MARKER));
        assert_eq!(s.chars().count(), MAX_DISPLAY_CHARS + TRUNCATED_MARKER.len());
    }

    #[test]
    fn short_strings_and_scalars_untouched() {
        let out = redact_value(&json!({ "name": "web", "count": 3, "force": true }));
        assert_eq!(out, json!({ "name": "web", "count": 3, "force": true }));
    }

    #[test]
    fn arrays_redacted_elementwise() {
        let out = redact_value(&json!([{ "token": "a" }, "b"]));
        assert_eq!(out, json!([{ "token": REDACTED }, "b"]));
    }
}
