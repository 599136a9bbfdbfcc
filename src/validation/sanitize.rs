//! Recursive parameter sanitizer.
//!
//! Order matters: truncate first so the cap applies to caller input, strip
//! markers while `<%` is still literal, HTML-escape last. Stripping repeats
//! until the string is stable, so nested input like `....//` cannot
//! reassemble what a single pass removed.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};

use crate::config::SizeLimits;

static TEMPLATE_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\$\{[^}]*\}|#\{[^}]*\}|\{\{.*?\}\}|<%.*?%>")
        .expect("template marker regex")
});

static URI_SCHEMES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:javascript|vbscript|data|blob)\s*:").expect("URI scheme regex")
});

static PATH_TRAVERSAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\.\.[/\\]|\.\.%2f|\.\.%5c|%2e%2e(?:%2f|%5c|/|\\)|%252e%252e%252f")
        .expect("path traversal regex")
});

static SQL_STATEMENTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:union(?:\s+all)?\s+select|select\s+\S+(?:\s*,\s*\S+)*\s+from|insert\s+into|delete\s+from|drop\s+(?:table|database|schema|view)|truncate\s+table|alter\s+table|update\s+\w+\s+set|exec(?:ute)?\s+\w+)\b",
    )
    .expect("SQL statement regex")
});

/// Sanitize a parameter tree. Objects and arrays are walked; scalars other
/// than strings pass through.
pub fn sanitize_value(value: &Value, limits: &SizeLimits) -> Value {
    match value {
        Value::String(s) => Value::String(sanitize_string(s, limits.max_string_length)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .take(limits.max_array_length)
                .map(|v| sanitize_value(v, limits))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    (
                        sanitize_string(k, limits.max_string_length),
                        sanitize_value(v, limits),
                    )
                })
                .collect::<Map<String, Value>>(),
        ),
        other => other.clone(),
    }
}

/// Sanitize one string.
pub fn sanitize_string(input: &str, max_chars: usize) -> String {
    let truncated: String = input.chars().take(max_chars).collect();

    let stripped: String = truncated
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\t' | '\n' | '\r'))
        .collect();

    let s = strip_markers(stripped);
    let s = neutralize_sql(&s);
    html_escape(&s)
}

/// Remove template markers, URI schemes and traversal sequences until none
/// remain. Every match is non-empty, so each round shortens the string.
fn strip_markers(mut current: String) -> String {
    loop {
        let mut changed = false;
        for pattern in [&*TEMPLATE_MARKERS, &*URI_SCHEMES, &*PATH_TRAVERSAL] {
            let next = match pattern.replace_all(&current, "") {
                Cow::Borrowed(_) => continue,
                Cow::Owned(next) => next,
            };
            current = next;
            changed = true;
        }
        if !changed {
            return current;
        }
    }
}

/// Break statement-shaped SQL by joining its keywords with underscores.
/// Length is unchanged so audit records keep the input's shape.
fn neutralize_sql(input: &str) -> String {
    SQL_STATEMENTS
        .replace_all(input, |caps: &Captures| {
            caps[0]
                .chars()
                .map(|c| if c.is_whitespace() { '_' } else { c })
                .collect::<String>()
        })
        .into_owned()
}

/// Escape `& < > " '`.
pub fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}
