//! Heuristic injection scan over call parameters.
//!
//! A curated regex baseline, not a complete defense: output encoding at the
//! point of use still applies. The scan only reports; it never rewrites input.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

/// (category, pattern) pairs. Categories appear verbatim in warnings.
const PATTERN_SOURCES: &[(&str, &str)] = &[
    // Markup / script injection
    ("script injection", r"(?i)<\s*script\b"),
    ("script injection", r"(?i)<\s*/\s*script\s*>"),
    ("markup injection", r"(?i)<\s*(?:iframe|object|embed|svg|img|link|meta|style)\b"),
    (
        "event handler injection",
        r"(?i)\bon(?:load|error|click|mouseover|focus|blur|submit|change|input)\s*=",
    ),
    ("script URI", r"(?i)\b(?:javascript|vbscript)\s*:"),
    ("data URI", r"(?i)\bdata\s*:\s*[a-z]+/[a-z0-9.+-]+\s*[;,]"),
    // SQL injection
    ("SQL injection", r"(?i)'\s*(?:or|and)\s+'?\w+'?\s*=\s*'?\w+"),
    ("SQL injection", r"(?i)\bunion(?:\s+all)?\s+select\b"),
    ("SQL injection", r"(?i);\s*(?:drop|delete|truncate|alter|insert|update)\s+\w+"),
    ("SQL injection", r"(?i)\b(?:drop|truncate)\s+(?:table|database|schema)\b"),
    ("SQL comment", r"'\s*(?:--|#)"),
    ("SQL comment", r"/\*.*?\*/"),
    ("SQL injection", r"(?i)\b(?:sleep|benchmark|pg_sleep|waitfor\s+delay)\s*\("),
    // Command injection / chaining
    (
        "command injection",
        r"(?i)[;&|]\s*(?:rm|cat|ls|wget|curl|bash|sh|zsh|nc|ncat|python|perl|ruby|php|chmod|chown|kill|sudo|id|whoami)\b",
    ),
    ("command substitution", r"\$\([^)]*\)"),
    ("command substitution", r"`[^`]+`"),
    ("command chaining", r"(?:&&|\|\|)\s*\S+"),
    // Path traversal
    ("path traversal", r"\.\.[/\\]"),
    (
        "encoded path traversal",
        r"(?i)%2e%2e(?:%2f|%5c|/|\\)|\.\.%2f|\.\.%5c|%252e%252e|%c0%ae",
    ),
    ("sensitive path", r"(?i)/etc/(?:passwd|shadow|sudoers)\b|c:\\windows\\system32"),
    // Template / expression injection
    ("template injection", r"\$\{[^}]*\}"),
    ("template injection", r"#\{[^}]*\}"),
    ("template injection", r"\{\{.*?\}\}"),
    ("template injection", r"(?s)<%.*?%>"),
    // Protocol / JNDI-style injection
    ("JNDI injection", r"(?i)\$\{\s*jndi\s*:"),
    ("protocol injection", r"(?i)\b(?:ldap|ldaps|rmi|dns|iiop|gopher|dict|jar)://"),
    // Null byte / CRLF
    ("null byte injection", r"\x00|(?i)%00"),
    ("CRLF injection", r"(?i)%0d%0a|\r\n[\w-]+\s*:"),
];

struct Pattern {
    category: &'static str,
    regex: Regex,
}

static PATTERNS: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    PATTERN_SOURCES
        .iter()
        .map(|&(category, src)| Pattern {
            category,
            regex: Regex::new(src).expect("security pattern regex"),
        })
        .collect()
});

/// Walk a parameter tree and report every suspicious string.
///
/// Keys are scanned as well as values. Each string yields at most one
/// warning per category.
pub fn scan(value: &Value, max_string_length: usize) -> Vec<String> {
    let mut warnings = Vec::new();
    walk(value, "$", max_string_length, &mut warnings);
    warnings
}

fn walk(value: &Value, path: &str, max_len: usize, warnings: &mut Vec<String>) {
    match value {
        Value::String(s) => check_string(s, path, max_len, warnings),
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                walk(item, &format!("{path}[{i}]"), max_len, warnings);
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                let child = format!("{path}.{key}");
                check_string(key, &format!("{child} (key)"), max_len, warnings);
                walk(item, &child, max_len, warnings);
            }
        }
        _ => {}
    }
}

fn check_string(s: &str, path: &str, max_len: usize, warnings: &mut Vec<String>) {
    let len = s.chars().count();
    if len > max_len {
        warnings.push(format!(
            "String at {path} exceeds maximum length ({len} > {max_len} characters)"
        ));
    }

    let mut seen: Vec<&str> = Vec::new();
    for pattern in PATTERNS.iter() {
        if seen.contains(&pattern.category) {
            continue;
        }
        if pattern.regex.is_match(s) {
            seen.push(pattern.category);
            warnings.push(format!("Potential {} detected at {path}", pattern.category));
        }
    }
}
