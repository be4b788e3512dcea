//! Event classifier: a pure function from (hook name, body) to [`EventClass`]
//! plus the pairing strategy for that hook.

use crate::envelope::HookEnvelope;

/// The closed set of semantic event classes the Policy API understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    UserAgt,
    AgtLlm,
    AgtTool,
    AgtMem,
    AgtAgt,
}

impl EventClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventClass::UserAgt => "user_agt",
            EventClass::AgtLlm => "agt_llm",
            EventClass::AgtTool => "agt_tool",
            EventClass::AgtMem => "agt_mem",
            EventClass::AgtAgt => "agt_agt",
        }
    }
}

/// How a classified event should be dispatched by the mediation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Open an INPUT event, to be closed by a later invocation.
    Open,
    /// Close a previously opened event.
    Close,
    /// Open and close within this single invocation.
    OneShot,
    /// No Policy API call by default; logged locally.
    Telemetry,
}

pub struct Classification {
    pub class: EventClass,
    pub disposition: Disposition,
}

const MEMORY_PATTERNS: &[&str] = &["memory", "store", "save"];
const SUBAGENT_PATTERNS: &[&str] = &["task", "agent", "subagent"];

/// Classify a tool name into its event class. Memory patterns win over
/// subagent patterns, which win over the generic tool class: the first
/// matching pattern group decides.
fn classify_tool(tool_name: &str) -> EventClass {
    let lower = tool_name.to_lowercase();
    if MEMORY_PATTERNS.iter().any(|p| lower.contains(p)) {
        EventClass::AgtMem
    } else if SUBAGENT_PATTERNS.iter().any(|p| lower.contains(p)) {
        EventClass::AgtAgt
    } else {
        EventClass::AgtTool
    }
}

/// Classify a tool name for `PermissionRequest`, which is restricted to
/// `agt_tool`/`agt_agt` — a permission prompt for a memory-shaped tool name
/// is still a tool permission, not a memory event.
fn classify_permission_request_tool(tool_name: &str) -> EventClass {
    let lower = tool_name.to_lowercase();
    if SUBAGENT_PATTERNS.iter().any(|p| lower.contains(p)) {
        EventClass::AgtAgt
    } else {
        EventClass::AgtTool
    }
}

/// Classify a hook invocation. Unknown/future hook names default to
/// `AgtAgt` + `Telemetry`, preserving fail-open behavior.
pub fn classify(envelope: &HookEnvelope) -> Classification {
    match envelope.hook_event_name.as_str() {
        "UserPromptSubmit" => Classification {
            class: EventClass::UserAgt,
            disposition: Disposition::Open,
        },
        "PreToolUse" => Classification {
            class: classify_tool(envelope.tool_name().unwrap_or("")),
            disposition: Disposition::Open,
        },
        "PostToolUse" | "PostToolUseFailure" => Classification {
            class: classify_tool(envelope.tool_name().unwrap_or("")),
            disposition: Disposition::Close,
        },
        "PermissionRequest" => Classification {
            class: classify_permission_request_tool(envelope.tool_name().unwrap_or("")),
            disposition: Disposition::OneShot,
        },
        "Stop" => Classification {
            class: EventClass::UserAgt,
            disposition: Disposition::Close,
        },
        "SubagentStop" => Classification {
            class: EventClass::AgtAgt,
            disposition: Disposition::Close,
        },
        "SessionStart" | "SessionEnd" | "Setup" | "Notification" | "PreCompact"
        | "TeammateIdle" | "TaskCompleted" | "ConfigChange" => Classification {
            class: EventClass::AgtAgt,
            disposition: Disposition::Telemetry,
        },
        name if name.starts_with("Worktree") => Classification {
            class: EventClass::AgtAgt,
            disposition: Disposition::Telemetry,
        },
        _ => Classification {
            class: EventClass::AgtAgt,
            disposition: Disposition::Telemetry,
        },
    }
}

/// Hooks the host will honor a block/deny decision for.
pub fn is_block_capable(hook_event_name: &str) -> bool {
    matches!(
        hook_event_name,
        "UserPromptSubmit"
            | "PreToolUse"
            | "PostToolUse"
            | "PermissionRequest"
            | "Stop"
            | "SubagentStop"
    )
}
