//! Content normalizer and redactor.
//!
//! Produces a stable string form of a structured input/output, bounded to
//! `max_content_chars` and stripped of obvious secrets, before it is ever
//! handed to the Payload Builder or the audit log. Oversized or sensitive
//! fields (e.g. full file contents on a `Write`/`write_file` tool call) are
//! dropped rather than hashed or encrypted, in a single pass over any JSON
//! value.

use serde_json::Value;

const TRUNCATION_MARKER: &str = "...[truncated]";

const SECRET_KEYS: &[&str] = &[
    "api_key",
    "apikey",
    "password",
    "passwd",
    "secret",
    "token",
    "authorization",
    "access_token",
    "refresh_token",
    "private_key",
];

/// Recursively redact object keys that look like secrets, replacing their
/// value with a fixed marker so the shape of the payload survives for
/// debugging without the value leaking into the audit log or Policy API.
fn redact_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                let lower = k.to_lowercase();
                if SECRET_KEYS.iter().any(|s| lower.contains(s)) {
                    out.insert(k.clone(), Value::String("[redacted]".to_string()));
                } else {
                    out.insert(k.clone(), redact_value(v));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_value).collect()),
        other => other.clone(),
    }
}

/// Produce a stable, bounded, redacted string form of a JSON value.
///
/// Idempotent: calling this again on the already-normalized string (wrapped
/// back into a `Value::String`) returns the same string, since truncation
/// and redaction only ever shrink/replace content already at its final form.
pub fn normalize_value(value: &Value, max_chars: usize) -> String {
    let redacted = redact_value(value);
    let rendered = match &redacted {
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    };
    truncate(&rendered, max_chars)
}

/// Normalize a plain string (e.g. a prompt) without JSON redaction applied
/// to its structure — redaction still scans for inline secret-looking
/// substrings is out of scope here; this path only bounds size.
pub fn normalize_str(s: &str, max_chars: usize) -> String {
    truncate(s, max_chars)
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let budget = max_chars.saturating_sub(TRUNCATION_MARKER.chars().count());
    let mut truncated: String = s.chars().take(budget).collect();
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_redacts_secret_keys() {
        let v = json!({"tool_input": {"command": "curl", "api_key": "sk-abc123"}});
        let out = normalize_value(&v, 10_000);
        assert!(out.contains("[redacted]"));
        assert!(!out.contains("sk-abc123"));
    }

    #[test]
    fn test_redacts_nested_arrays() {
        let v = json!({"items": [{"password": "hunter2"}, {"ok": "fine"}]});
        let out = normalize_value(&v, 10_000);
        assert!(!out.contains("hunter2"));
        assert!(out.contains("fine"));
    }

    #[test]
    fn test_truncation_marker_applied() {
        let long = "x".repeat(100);
        let out = normalize_str(&long, 20);
        assert!(out.ends_with(TRUNCATION_MARKER));
        assert!(out.chars().count() <= 20);
    }

    #[test]
    fn test_no_truncation_when_under_bound() {
        let out = normalize_str("short", 100);
        assert_eq!(out, "short");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let v = json!({"command": "ls -la", "api_key": "secret-value"});
        let once = normalize_value(&v, 1_000);
        let twice = normalize_str(&once, 1_000);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_string_value_unwrapped_not_json_quoted() {
        let v = Value::String("plain text prompt".to_string());
        let out = normalize_value(&v, 1_000);
        assert_eq!(out, "plain text prompt");
    }
}
