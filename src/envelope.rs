//! Parsing of the host's per-invocation hook envelope.
//!
//! The envelope's shape varies by `hook_event_name`; rather than modeling
//! every hook as its own strongly-typed struct we keep the body as a raw
//! [`serde_json::Value`] and expose narrow accessors defensively
//! (`payload["tool_name"].as_str().unwrap_or(...)`) — a missing or
//! differently-shaped field degrades rather than panics.

use serde_json::Value;

use crate::error::{Error, Result};

/// One hook invocation as read from stdin.
#[derive(Debug, Clone)]
pub struct HookEnvelope {
    pub hook_event_name: String,
    pub session_id: String,
    pub transcript_path: Option<String>,
    pub body: Value,
}

impl HookEnvelope {
    /// Parse a hook envelope from raw stdin bytes.
    ///
    /// Only `hook_event_name` and `session_id` are required; their absence
    /// is an envelope error, everything else is read lazily by
    /// accessor and defaults when absent.
    pub fn parse(raw: &str) -> Result<Self> {
        let body: Value = serde_json::from_str(raw)
            .map_err(|e| Error::envelope(format!("invalid JSON on stdin: {e}")))?;

        let hook_event_name = body
            .get("hook_event_name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::envelope("missing hook_event_name"))?
            .to_string();

        let session_id = body
            .get("session_id")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::envelope("missing session_id"))?
            .to_string();

        let transcript_path = body
            .get("transcript_path")
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(HookEnvelope {
            hook_event_name,
            session_id,
            transcript_path,
            body,
        })
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.body.get(key).and_then(Value::as_str)
    }

    pub fn tool_name(&self) -> Option<&str> {
        self.str_field("tool_name")
    }

    pub fn tool_use_id(&self) -> Option<&str> {
        self.str_field("tool_use_id")
    }

    pub fn tool_input(&self) -> Value {
        self.body.get("tool_input").cloned().unwrap_or(Value::Null)
    }

    pub fn tool_response(&self) -> Value {
        self.body
            .get("tool_response")
            .cloned()
            .unwrap_or(Value::Null)
    }

    pub fn prompt(&self) -> &str {
        self.str_field("prompt").unwrap_or("")
    }

    pub fn permission_request_id(&self) -> Option<&str> {
        self.str_field("request_id")
    }

    pub fn user_id(&self) -> Option<&str> {
        self.str_field("user_id")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal() {
        let raw = r#"{"hook_event_name":"UserPromptSubmit","session_id":"s1","prompt":"hi"}"#;
        let env = HookEnvelope::parse(raw).unwrap();
        assert_eq!(env.hook_event_name, "UserPromptSubmit");
        assert_eq!(env.session_id, "s1");
        assert_eq!(env.prompt(), "hi");
    }

    #[test]
    fn test_missing_hook_event_name_errors() {
        let raw = r#"{"session_id":"s1"}"#;
        let err = HookEnvelope::parse(raw).unwrap_err();
        assert!(matches!(err, Error::Envelope(_)));
    }

    #[test]
    fn test_missing_session_id_errors() {
        let raw = r#"{"hook_event_name":"Stop"}"#;
        let err = HookEnvelope::parse(raw).unwrap_err();
        assert!(matches!(err, Error::Envelope(_)));
    }

    #[test]
    fn test_malformed_json_errors() {
        let err = HookEnvelope::parse("{not json").unwrap_err();
        assert!(matches!(err, Error::Envelope(_)));
    }

    #[test]
    fn test_tool_fields() {
        let raw = r#"{"hook_event_name":"PreToolUse","session_id":"s1",
            "tool_name":"Bash","tool_use_id":"t1","tool_input":{"command":"ls"}}"#;
        let env = HookEnvelope::parse(raw).unwrap();
        assert_eq!(env.tool_name(), Some("Bash"));
        assert_eq!(env.tool_use_id(), Some("t1"));
        assert_eq!(env.tool_input()["command"], "ls");
    }

    #[test]
    fn test_transcript_path_optional() {
        let raw = r#"{"hook_event_name":"SessionEnd","session_id":"s1"}"#;
        let env = HookEnvelope::parse(raw).unwrap();
        assert!(env.transcript_path.is_none());
    }
}
