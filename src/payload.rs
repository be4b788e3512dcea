//! Payload builder: translates a normalized event into the Policy API's
//! CREATE/UPDATE request shape.

use serde::Serialize;
use serde_json::Value;

use crate::classify::EventClass;
use crate::config::RunConfig;

/// Request body for a Policy API CREATE call.
#[derive(Debug, Serialize, Clone)]
pub struct CreateRequest {
    pub api_key: String,
    pub profile_id: String,
    pub use_case_id: String,
    pub event_type: &'static str,
    pub session_id: String,
    pub input: String,
    pub metadata: Value,
}

/// Request body for a Policy API UPDATE call.
#[derive(Debug, Serialize, Clone)]
pub struct UpdateRequest {
    pub api_key: String,
    pub profile_id: String,
    pub use_case_id: String,
    pub event_type: &'static str,
    pub session_id: String,
    pub event_id: String,
    pub output: String,
    pub metadata: Value,
}

/// Metadata attached to every request.metadata.
pub fn build_metadata(
    cfg: &RunConfig,
    tool_name: Option<&str>,
    source: &str,
    hook_event_name: &str,
) -> Value {
    serde_json::json!({
        "user_id": cfg.user_id,
        "tool_name": tool_name,
        "source": source,
        "hook_event_name": hook_event_name,
    })
}

pub fn build_create(
    cfg: &RunConfig,
    class: EventClass,
    session_id: &str,
    input: &str,
    metadata: Value,
) -> CreateRequest {
    CreateRequest {
        api_key: cfg.api_key.clone(),
        profile_id: cfg.profile_id.clone(),
        use_case_id: cfg.use_case_id.clone(),
        event_type: class.as_str(),
        session_id: session_id.to_string(),
        input: input.to_string(),
        metadata,
    }
}

pub fn build_update(
    cfg: &RunConfig,
    class: EventClass,
    session_id: &str,
    event_id: &str,
    output: &str,
    metadata: Value,
) -> UpdateRequest {
    UpdateRequest {
        api_key: cfg.api_key.clone(),
        profile_id: cfg.profile_id.clone(),
        use_case_id: cfg.use_case_id.clone(),
        event_type: class.as_str(),
        session_id: session_id.to_string(),
        event_id: event_id.to_string(),
        output: output.to_string(),
        metadata,
    }
}
