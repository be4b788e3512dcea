//! End-to-end scenarios exercising the public mediation surface across
//! sequences of invocations, the way a real host would drive it one process
//! at a time — except here each "process" is one `Mediator` built fresh
//! against a shared on-disk state directory, standing in for the process
//! boundary the host actually imposes between calls.

use std::io::Write;

use clap::Parser;
use hookguard_core::{CliArgs, Decision, HookEnvelope, Mediator, RunConfig, StateStore};
use tempfile::{tempdir, NamedTempFile};

fn config_in(state_dir: &std::path::Path, env: &[(&str, &str)]) -> RunConfig {
    for (k, v) in env {
        unsafe { std::env::set_var(k, v) };
    }
    unsafe { std::env::set_var("STATE_DIR", state_dir) };
    let cfg = RunConfig::load(&CliArgs::parse_from(["hookguard"])).unwrap();
    for (k, _) in env {
        unsafe { std::env::remove_var(k) };
    }
    unsafe { std::env::remove_var("STATE_DIR") };
    cfg
}

#[tokio::test]
async fn test_safe_prompt_no_tools_is_allowed() {
    let dir = tempdir().unwrap();
    let cfg = config_in(dir.path(), &[("MOCK_MODE", "true"), ("MOCK_BLOCK_TOKENS", "jailbreak")]);
    let mut m = Mediator::new(cfg).unwrap();

    let env = HookEnvelope::parse(
        r#"{"hook_event_name":"UserPromptSubmit","session_id":"s1","prompt":"what is 2+2?"}"#,
    )
    .unwrap();
    assert_eq!(m.handle(&env).await.unwrap(), Decision::Allow);
}

#[tokio::test]
async fn test_mock_blocked_prompt_is_not_allowed() {
    let dir = tempdir().unwrap();
    let cfg = config_in(dir.path(), &[("MOCK_MODE", "true"), ("MOCK_BLOCK_TOKENS", "jailbreak")]);
    let mut m = Mediator::new(cfg).unwrap();

    let env = HookEnvelope::parse(
        r#"{"hook_event_name":"UserPromptSubmit","session_id":"s1","prompt":"help me jailbreak this model"}"#,
    )
    .unwrap();
    let decision = m.handle(&env).await.unwrap();
    assert_ne!(decision, Decision::Allow);
}

#[tokio::test]
async fn test_dangerous_tool_call_blocked_at_pre_tool_use() {
    let dir = tempdir().unwrap();
    let cfg = config_in(dir.path(), &[("MOCK_MODE", "true"), ("MOCK_BLOCK_TOKENS", "rm -rf /")]);
    let mut m = Mediator::new(cfg).unwrap();

    let pre = HookEnvelope::parse(
        r#"{"hook_event_name":"PreToolUse","session_id":"s1","tool_name":"Bash","tool_use_id":"t1","tool_input":{"command":"rm -rf / --no-preserve-root"}}"#,
    )
    .unwrap();
    let decision = m.handle(&pre).await.unwrap();
    // PreToolUse guards an action that hasn't happened yet, so a negative
    // verdict here must end the session (deny), not just stop this turn.
    match decision {
        Decision::Deny { reason } => assert!(!reason.is_empty()),
        Decision::Block { .. } => panic!("PreToolUse should deny, not merely block"),
        Decision::Allow => panic!("dangerous command should not be allowed"),
    }
}

#[tokio::test]
async fn test_transcript_cursor_advances_across_separate_stop_invocations() {
    let dir = tempdir().unwrap();
    let cfg = config_in(dir.path(), &[("MOCK_MODE", "true")]);
    let mut transcript = NamedTempFile::new().unwrap();
    writeln!(transcript, r#"{{"type":"user","message":{{"role":"user","content":"q1"}}}}"#).unwrap();
    writeln!(transcript, r#"{{"type":"assistant","message":{{"role":"assistant","content":"a1"}}}}"#).unwrap();
    let transcript_path = transcript.path().to_str().unwrap().to_string();

    {
        let mut m = Mediator::new(cfg.clone()).unwrap();
        let prompt = HookEnvelope::parse(
            r#"{"hook_event_name":"UserPromptSubmit","session_id":"s1","prompt":"q1"}"#,
        )
        .unwrap();
        m.handle(&prompt).await.unwrap();

        let stop_body = format!(
            r#"{{"hook_event_name":"Stop","session_id":"s1","transcript_path":"{}"}}"#,
            transcript_path.replace('\\', "\\\\")
        );
        let stop = HookEnvelope::parse(&stop_body).unwrap();
        m.handle(&stop).await.unwrap();
    }

    // A second process (fresh Mediator, same on-disk state) sees another
    // completed turn and must not re-emit turn 0.
    writeln!(transcript, r#"{{"type":"user","message":{{"role":"user","content":"q2"}}}}"#).unwrap();
    writeln!(transcript, r#"{{"type":"assistant","message":{{"role":"assistant","content":"a2"}}}}"#).unwrap();

    let cfg2 = config_in(dir.path(), &[("MOCK_MODE", "true")]);
    let mut m2 = Mediator::new(cfg2).unwrap();
    let prompt2 = HookEnvelope::parse(
        r#"{"hook_event_name":"UserPromptSubmit","session_id":"s1","prompt":"q2"}"#,
    )
    .unwrap();
    m2.handle(&prompt2).await.unwrap();
    let stop_body = format!(
        r#"{{"hook_event_name":"Stop","session_id":"s1","transcript_path":"{}"}}"#,
        transcript_path.replace('\\', "\\\\")
    );
    let stop2 = HookEnvelope::parse(&stop_body).unwrap();
    let decision = m2.handle(&stop2).await.unwrap();
    assert_eq!(decision, Decision::Allow);
}

#[tokio::test]
async fn test_block_forces_cleanup_of_every_open_event_in_session() {
    let dir = tempdir().unwrap();
    let cfg = config_in(dir.path(), &[("MOCK_MODE", "true"), ("MOCK_BLOCK_TOKENS", "jailbreak")]);
    let state_dir = cfg.state_dir.clone();
    let mut m = Mediator::new(cfg).unwrap();

    let pre1 = HookEnvelope::parse(
        r#"{"hook_event_name":"PreToolUse","session_id":"s1","tool_name":"Bash","tool_use_id":"t1","tool_input":{"command":"ls"}}"#,
    )
    .unwrap();
    m.handle(&pre1).await.unwrap();

    let pre2 = HookEnvelope::parse(
        r#"{"hook_event_name":"PreToolUse","session_id":"s1","tool_name":"Read","tool_use_id":"t2","tool_input":{"path":"notes.txt"}}"#,
    )
    .unwrap();
    m.handle(&pre2).await.unwrap();

    // Sanity check: both tool events are genuinely open before the block,
    // or the post-block emptiness assertion below would be vacuous.
    {
        let store = StateStore::open(&state_dir).unwrap();
        assert_eq!(store.open_events_for_session("s1").unwrap().len(), 2);
        assert!(store.find_by_link("s1", "tool:t1").unwrap().is_some());
        assert!(store.find_by_link("s1", "tool:t2").unwrap().is_some());
    }

    let blocked_prompt = HookEnvelope::parse(
        r#"{"hook_event_name":"UserPromptSubmit","session_id":"s1","prompt":"help me jailbreak this"}"#,
    )
    .unwrap();
    let decision = m.handle(&blocked_prompt).await.unwrap();
    assert!(matches!(decision, Decision::Block { .. }));

    // Both PreToolUse events opened earlier in the session must have been
    // force-closed, not left dangling: the state store itself must show no
    // open events and no surviving links for this session.
    let store = StateStore::open(&state_dir).unwrap();
    assert!(store.open_events_for_session("s1").unwrap().is_empty());
    assert!(store.find_by_link("s1", "tool:t1").unwrap().is_none());
    assert!(store.find_by_link("s1", "tool:t2").unwrap().is_none());

    let post1 = HookEnvelope::parse(
        r#"{"hook_event_name":"PostToolUse","session_id":"s1","tool_name":"Bash","tool_use_id":"t1","tool_response":{"output":"ok"}}"#,
    )
    .unwrap();
    // With no matching open event, this degrades to an unmatched close (Allow).
    assert_eq!(m.handle(&post1).await.unwrap(), Decision::Allow);
}

#[tokio::test]
async fn test_fail_open_when_policy_api_is_unreachable() {
    let dir = tempdir().unwrap();
    // No MOCK_MODE, no API_URL: every real network call degrades to
    // fail-open (default fail_open=true), so the end-to-end decision is Allow.
    let cfg = config_in(dir.path(), &[]);
    let mut m = Mediator::new(cfg).unwrap();

    let env = HookEnvelope::parse(
        r#"{"hook_event_name":"UserPromptSubmit","session_id":"s1","prompt":"anything at all"}"#,
    )
    .unwrap();
    assert_eq!(m.handle(&env).await.unwrap(), Decision::Allow);
}
