//! Host decision emitter: turns the mediation engine's verdict into the
//! JSON object written to stdout for the host process to read.
//!
//! The host never sees our internal [`crate::policy::VerdictResult`] or
//! [`crate::classify::EventClass`] — only one of three small shapes, keeping
//! the wire representation sent to the host separate from the internal
//! model used to reach it.

use serde::Serialize;

/// What we tell the host to do with this invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Proceed normally.
    Allow,
    /// Stop this specific action, but the session may continue.
    Block { reason: String },
    /// Stop the action and end the session.
    Deny { reason: String },
}

#[derive(Serialize)]
struct AllowWire {
    decision: &'static str,
}

#[derive(Serialize)]
struct BlockWire<'a> {
    decision: &'static str,
    reason: &'a str,
}

#[derive(Serialize)]
struct DenyWire<'a> {
    decision: &'static str,
    #[serde(rename = "permissionDecision")]
    permission_decision: &'static str,
    reason: &'a str,
}

impl Decision {
    /// Render the JSON object to print to stdout.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Decision::Allow => serde_json::to_value(AllowWire { decision: "allow" }).unwrap(),
            Decision::Block { reason } => serde_json::to_value(BlockWire {
                decision: "block",
                reason,
            })
            .unwrap(),
            // A deny is still a block to the host; `permissionDecision`
            // is what distinguishes "stop this action" from "end the
            // session" for a host that only checks `decision`.
            Decision::Deny { reason } => serde_json::to_value(DenyWire {
                decision: "block",
                permission_decision: "deny",
                reason,
            })
            .unwrap(),
        }
    }

    /// Print the decision as a single JSON line on stdout, as the host expects.
    pub fn emit(&self) {
        println!("{}", self.to_json());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_shape() {
        let v = Decision::Allow.to_json();
        assert_eq!(v["decision"], "allow");
        assert!(v.get("reason").is_none());
    }

    #[test]
    fn test_block_shape_includes_reason() {
        let v = Decision::Block {
            reason: "dangerous command".to_string(),
        }
        .to_json();
        assert_eq!(v["decision"], "block");
        assert_eq!(v["reason"], "dangerous command");
    }

    #[test]
    fn test_deny_shape_includes_reason() {
        let v = Decision::Deny {
            reason: "policy violation".to_string(),
        }
        .to_json();
        assert_eq!(v["decision"], "block");
        assert_eq!(v["permissionDecision"], "deny");
        assert_eq!(v["reason"], "policy violation");
    }
}
