//! Mediation engine: the per-invocation dispatch procedure that ties every
//! other module together.
//!
//! One [`Mediator`] is built per process invocation (a fresh process per
//! hook call), producing exactly one [`Decision`]. The dispatch matches on
//! `hook_event_name` and delegates to one handler method per hook, the same
//! shape as any event-name-keyed handler table.

use std::path::Path;

use serde_json::Value;

use crate::audit::AuditLog;
use crate::classify::{self, Disposition, EventClass};
use crate::config::{Mode, RunConfig};
use crate::decision::Decision;
use crate::envelope::HookEnvelope;
use crate::error::Result;
use crate::payload::{self, CreateRequest, UpdateRequest};
use crate::policy::{PolicyClient, Verdict, VerdictResult};
use crate::state::StateStore;
use crate::transcript;

/// How long an open event may sit unclosed before `prune_stale` reclaims it.
/// A crashed or killed host process otherwise leaks rows forever.
const STALE_EVENT_TTL_SECS: i64 = 24 * 60 * 60;

pub struct Mediator {
    cfg: RunConfig,
    store: StateStore,
    policy: PolicyClient,
    audit: AuditLog,
}

impl Mediator {
    pub fn new(cfg: RunConfig) -> Result<Self> {
        let store = StateStore::open(&cfg.state_dir)?;
        let policy = PolicyClient::new(&cfg)?;
        let audit = AuditLog::new(&cfg.log_path);
        Ok(Mediator {
            cfg,
            store,
            policy,
            audit,
        })
    }

    #[cfg(test)]
    fn new_in_memory(cfg: RunConfig) -> Result<Self> {
        let store = StateStore::open_in_memory()?;
        let policy = PolicyClient::new(&cfg)?;
        let audit = AuditLog::new(&cfg.log_path);
        Ok(Mediator {
            cfg,
            store,
            policy,
            audit,
        })
    }

    /// Handle one hook invocation end to end, returning the decision to hand
    /// back to the host on stdout.
    pub async fn handle(&mut self, envelope: &HookEnvelope) -> Result<Decision> {
        if !self.cfg.enabled {
            return Ok(Decision::Allow);
        }

        if self.cfg.tiny_debug_mode {
            // A minimal smoke-test path: exercise stdin parsing and the
            // audit log without touching the store or the Policy API.
            self.audit.record_local_only(
                &invocation_id(&envelope.session_id, &envelope.hook_event_name),
                &envelope.hook_event_name,
                &envelope.session_id,
                envelope.body.clone(),
                "tiny_debug_mode",
                "bypassed classification and policy dispatch",
            )?;
            return Ok(Decision::Allow);
        }

        let now = chrono::Utc::now().timestamp();
        self.store.prune_stale(now, STALE_EVENT_TTL_SECS)?;

        if envelope.hook_event_name == "SessionEnd" {
            self.store.clear_session(&envelope.session_id)?;
            self.store.clear_cursors(&envelope.session_id)?;
        }

        let classification = classify::classify(envelope);

        if classification.disposition == Disposition::Telemetry {
            return self.handle_telemetry(envelope, classification.class, now);
        }

        let verdict = match envelope.hook_event_name.as_str() {
            "UserPromptSubmit" => self.handle_user_prompt_submit(envelope, now).await?,
            "PreToolUse" => {
                self.handle_pre_tool_use(envelope, classification.class, now)
                    .await?
            }
            "PostToolUse" | "PostToolUseFailure" => {
                self.handle_post_tool_use(envelope, classification.class)
                    .await?
            }
            "PermissionRequest" => {
                self.handle_permission_request(envelope, classification.class)
                    .await?
            }
            "Stop" => self.handle_stop(envelope, now).await?,
            "SubagentStop" => self.handle_subagent_stop(envelope).await?,
            _ => return Ok(Decision::Allow),
        };

        self.resolve_decision(envelope, verdict)
    }

    /// Apply the block-capable + enforce-mode gate shared by every handler
    /// that can produce a negative verdict.
    fn resolve_decision(&mut self, envelope: &HookEnvelope, verdict: Option<Verdict>) -> Result<Decision> {
        let Some(verdict) = verdict else {
            return Ok(Decision::Allow);
        };
        if !verdict.result.is_negative() {
            return Ok(Decision::Allow);
        }
        if !classify::is_block_capable(&envelope.hook_event_name) || self.cfg.mode != Mode::Enforce {
            return Ok(Decision::Allow);
        }
        // A negative, enforced verdict closes out every other open event for
        // this session: one blocked turn discards any in-flight tool/memory
        // pairs that would otherwise dangle forever.
        self.force_close_session(&envelope.session_id, &verdict.reason)?;
        Ok(decision_for_hook(&envelope.hook_event_name, verdict.reason))
    }

    /// Force-close every still-open event for a session, recording the
    /// triggering reason against each without re-contacting the Policy API:
    /// the block/deny verdict already settled this session's outcome.
    fn force_close_session(&mut self, session_id: &str, reason: &str) -> Result<()> {
        let open_events = self.store.open_events_for_session(session_id)?;
        for open in &open_events {
            self.audit.record_local_only(
                &invocation_id(session_id, "forced_close"),
                "forced_close",
                session_id,
                serde_json::json!({"event_id": open.event_id, "event_class": open.event_class}),
                "session_blocked",
                reason,
            )?;
        }
        self.store.clear_session(session_id)
    }

    fn handle_telemetry(
        &mut self,
        envelope: &HookEnvelope,
        class: EventClass,
        now: i64,
    ) -> Result<Decision> {
        let inv_id = invocation_id(&envelope.session_id, &envelope.hook_event_name);
        if self.cfg.skip_telemetry_api_send {
            self.audit.record_local_only(
                &inv_id,
                &envelope.hook_event_name,
                &envelope.session_id,
                envelope.body.clone(),
                "telemetry_skipped",
                "skip_telemetry_api_send=true",
            )?;
            return Ok(Decision::Allow);
        }

        // Telemetry is never block-capable; record it as an immediately
        // self-closed event without touching the store.
        let metadata = payload::build_metadata(&self.cfg, None, "hookguard", &envelope.hook_event_name);
        let input = crate::normalize::normalize_value(&envelope.body, self.cfg.max_content_chars);
        let req = payload::build_create(&self.cfg, class, &envelope.session_id, &input, metadata);
        let request_json = serde_json::to_value(&req)?;
        self.audit.record_call(
            &inv_id,
            &envelope.hook_event_name,
            &envelope.session_id,
            request_json,
            serde_json::json!({"event_result": "telemetry", "timestamp": now}),
        )?;
        Ok(Decision::Allow)
    }

    async fn handle_user_prompt_submit(
        &mut self,
        envelope: &HookEnvelope,
        now: i64,
    ) -> Result<Option<Verdict>> {
        let input = crate::normalize::normalize_str(envelope.prompt(), self.cfg.max_content_chars);
        let metadata = payload::build_metadata(&self.cfg, None, "hookguard", "UserPromptSubmit");
        let req = payload::build_create(
            &self.cfg,
            EventClass::UserAgt,
            &envelope.session_id,
            &input,
            metadata,
        );
        let resp = self.policy.create(&req).await?;
        self.audit_create(envelope, &req, &resp.event_id, &resp.verdict)?;

        if !resp.verdict.result.is_negative() {
            self.store.record_open(
                &resp.event_id,
                EventClass::UserAgt,
                &envelope.session_id,
                &prompt_link_key(&envelope.session_id),
                "UserPromptSubmit",
                &input,
                &req.metadata,
                now,
            )?;
        }
        Ok(Some(resp.verdict))
    }

    async fn handle_pre_tool_use(
        &mut self,
        envelope: &HookEnvelope,
        class: EventClass,
        now: i64,
    ) -> Result<Option<Verdict>> {
        let link_key = tool_link_key(envelope);
        let input = crate::normalize::normalize_value(&envelope.tool_input(), self.cfg.max_content_chars);
        let metadata = payload::build_metadata(
            &self.cfg,
            envelope.tool_name(),
            "hookguard",
            "PreToolUse",
        );
        let req = payload::build_create(&self.cfg, class, &envelope.session_id, &input, metadata);
        let resp = self.policy.create(&req).await?;
        self.audit_create(envelope, &req, &resp.event_id, &resp.verdict)?;

        if !resp.verdict.result.is_negative() {
            self.store.record_open(
                &resp.event_id,
                class,
                &envelope.session_id,
                &link_key,
                "PreToolUse",
                &input,
                &req.metadata,
                now,
            )?;
        }
        Ok(Some(resp.verdict))
    }

    async fn handle_post_tool_use(
        &mut self,
        envelope: &HookEnvelope,
        class: EventClass,
    ) -> Result<Option<Verdict>> {
        let link_key = tool_link_key(envelope);
        let Some(open) = self.store.find_by_link(&envelope.session_id, &link_key)? else {
            // No matching PreToolUse was ever opened (e.g. hookguard was
            // enabled mid-session). Nothing to close; allow by default.
            let inv_id = invocation_id(&envelope.session_id, &envelope.hook_event_name);
            self.audit.record_local_only(
                &inv_id,
                &envelope.hook_event_name,
                &envelope.session_id,
                envelope.body.clone(),
                "unmatched_close",
                "no open event for this tool_use_id",
            )?;
            return Ok(None);
        };

        let output = crate::normalize::normalize_value(&envelope.tool_response(), self.cfg.max_content_chars);
        let metadata = payload::build_metadata(
            &self.cfg,
            envelope.tool_name(),
            "hookguard",
            &envelope.hook_event_name,
        );
        let req = payload::build_update(
            &self.cfg,
            class,
            &envelope.session_id,
            &open.event_id,
            &output,
            metadata,
        );
        let verdict = self.policy.update(&req).await?;
        self.audit_update(envelope, &req, &verdict)?;
        self.store
            .remove_link_and_event(&envelope.session_id, &link_key)?;
        Ok(Some(verdict))
    }

    /// A permission prompt is opened and closed within this single
    /// invocation: there is no later hook call to pair it with.
    async fn handle_permission_request(
        &mut self,
        envelope: &HookEnvelope,
        class: EventClass,
    ) -> Result<Option<Verdict>> {
        let input = crate::normalize::normalize_value(&envelope.tool_input(), self.cfg.max_content_chars);
        let metadata = payload::build_metadata(
            &self.cfg,
            envelope.tool_name(),
            "hookguard",
            "PermissionRequest",
        );
        let req = payload::build_create(&self.cfg, class, &envelope.session_id, &input, metadata);
        let resp = self.policy.create(&req).await?;
        self.audit_create(envelope, &req, &resp.event_id, &resp.verdict)?;

        if resp.verdict.result.is_negative() {
            return Ok(Some(resp.verdict));
        }

        let close_req = payload::build_update(
            &self.cfg,
            class,
            &envelope.session_id,
            &resp.event_id,
            "",
            req.metadata.clone(),
        );
        let verdict = self.policy.update(&close_req).await?;
        self.audit_update(envelope, &close_req, &verdict)?;
        Ok(Some(verdict))
    }

    /// Drains every new transcript turn since the last cursor into paired
    /// agt_llm CREATE+UPDATE calls, advancing the cursor per turn. Returns
    /// the last turn's output and the first negative verdict encountered, if
    /// any — a blocked turn still needs its create/update checked, but must
    /// stop the caller from treating the rest of the session as clean.
    async fn drain_transcript(
        &mut self,
        envelope: &HookEnvelope,
        transcript_path: &str,
        hook_event_name: &str,
    ) -> Result<(String, Option<Verdict>)> {
        let cursor = self.store.get_cursor(&envelope.session_id, transcript_path)?;
        let turns = transcript::read_new_turns(Path::new(transcript_path), cursor)?;

        let mut last_output = String::new();
        let mut negative_verdict: Option<Verdict> = None;
        for turn in &turns {
            let input = crate::normalize::normalize_str(&turn.input, self.cfg.max_content_chars);
            let output = crate::normalize::normalize_str(&turn.output, self.cfg.max_content_chars);
            let metadata = payload::build_metadata(&self.cfg, None, "hookguard", hook_event_name);

            let create_req = payload::build_create(
                &self.cfg,
                EventClass::AgtLlm,
                &envelope.session_id,
                &input,
                metadata.clone(),
            );
            let resp = self.policy.create(&create_req).await?;
            self.audit_create(envelope, &create_req, &resp.event_id, &resp.verdict)?;

            if resp.verdict.result.is_negative() {
                negative_verdict.get_or_insert(resp.verdict);
            } else {
                let update_req = payload::build_update(
                    &self.cfg,
                    EventClass::AgtLlm,
                    &envelope.session_id,
                    &resp.event_id,
                    &output,
                    metadata,
                );
                let verdict = self.policy.update(&update_req).await?;
                self.audit_update(envelope, &update_req, &verdict)?;
                if verdict.result.is_negative() {
                    negative_verdict.get_or_insert(verdict);
                }
            }
            last_output = output;
            self.store
                .set_cursor(&envelope.session_id, transcript_path, turn.turn_idx)?;
        }

        Ok((last_output, negative_verdict))
    }

    /// Drains every new transcript turn since the last cursor, then closes
    /// the UserAgt event opened by `UserPromptSubmit` using the final turn's
    /// output. A negative verdict on any drained turn is returned as-is,
    /// without closing the prompt link normally — the caller force-closes
    /// the whole session instead.
    async fn handle_stop(&mut self, envelope: &HookEnvelope, _now: i64) -> Result<Option<Verdict>> {
        let Some(transcript_path) = envelope.transcript_path.clone() else {
            return Ok(None);
        };

        let (last_output, negative_verdict) =
            self.drain_transcript(envelope, &transcript_path, "Stop").await?;
        if let Some(verdict) = negative_verdict {
            return Ok(Some(verdict));
        }

        let link_key = prompt_link_key(&envelope.session_id);
        let Some(open) = self.store.find_by_link(&envelope.session_id, &link_key)? else {
            return Ok(None);
        };
        let metadata = payload::build_metadata(&self.cfg, None, "hookguard", "Stop");
        let req = payload::build_update(
            &self.cfg,
            EventClass::UserAgt,
            &envelope.session_id,
            &open.event_id,
            &last_output,
            metadata,
        );
        let verdict = self.policy.update(&req).await?;
        self.audit_update(envelope, &req, &verdict)?;
        self.store
            .remove_link_and_event(&envelope.session_id, &link_key)?;
        Ok(Some(verdict))
    }

    /// Same as `Stop` but scoped to the subagent's own transcript: drains any
    /// new turns on `envelope.transcript_path`, then closes the most
    /// recently opened agt_agt event for this session. `SubagentStop` carries
    /// no `tool_use_id` to pair against directly, so we take the newest
    /// still-open subagent event rather than a link lookup.
    async fn handle_subagent_stop(&mut self, envelope: &HookEnvelope) -> Result<Option<Verdict>> {
        let open_events = self.store.open_events_for_session(&envelope.session_id)?;
        let Some(open) = open_events
            .into_iter()
            .filter(|e| e.event_class == EventClass::AgtAgt.as_str())
            .max_by_key(|e| e.created_at)
        else {
            return Ok(None);
        };

        let mut output = crate::normalize::normalize_value(&envelope.body, self.cfg.max_content_chars);
        if let Some(transcript_path) = envelope.transcript_path.clone() {
            let (last_output, negative_verdict) = self
                .drain_transcript(envelope, &transcript_path, "SubagentStop")
                .await?;
            if let Some(verdict) = negative_verdict {
                return Ok(Some(verdict));
            }
            if !last_output.is_empty() {
                output = last_output;
            }
        }

        let metadata = payload::build_metadata(&self.cfg, None, "hookguard", "SubagentStop");
        let req = payload::build_update(
            &self.cfg,
            EventClass::AgtAgt,
            &envelope.session_id,
            &open.event_id,
            &output,
            metadata,
        );
        let verdict = self.policy.update(&req).await?;
        self.audit_update(envelope, &req, &verdict)?;
        self.store.remove_event_and_links(&open.event_id)?;
        Ok(Some(verdict))
    }

    fn audit_create(
        &self,
        envelope: &HookEnvelope,
        req: &CreateRequest,
        event_id: &str,
        verdict: &Verdict,
    ) -> Result<()> {
        self.audit.record_call(
            &invocation_id(&envelope.session_id, &envelope.hook_event_name),
            &envelope.hook_event_name,
            &envelope.session_id,
            serde_json::to_value(req)?,
            serde_json::json!({
                "event_id": event_id,
                "event_result": result_str(&verdict.result),
                "reason": verdict.reason,
            }),
        )
    }

    fn audit_update(&self, envelope: &HookEnvelope, req: &UpdateRequest, verdict: &Verdict) -> Result<()> {
        self.audit.record_call(
            &invocation_id(&envelope.session_id, &envelope.hook_event_name),
            &envelope.hook_event_name,
            &envelope.session_id,
            serde_json::to_value(req)?,
            serde_json::json!({
                "event_result": result_str(&verdict.result),
                "reason": verdict.reason,
            }),
        )
    }
}

/// PreToolUse and PermissionRequest guard an action that hasn't happened
/// yet, so a negative verdict there ends the session (`deny`); every other
/// block-capable hook guards something already underway and only stops
/// that one action (`block`).
fn decision_for_hook(hook_event_name: &str, reason: String) -> Decision {
    match hook_event_name {
        "PreToolUse" | "PermissionRequest" => Decision::Deny { reason },
        _ => Decision::Block { reason },
    }
}

fn result_str(r: &VerdictResult) -> &'static str {
    match r {
        VerdictResult::Passed => "passed",
        VerdictResult::Blocked => "blocked",
        VerdictResult::Rejected => "rejected",
    }
}

fn prompt_link_key(session_id: &str) -> String {
    format!("prompt:{session_id}")
}

fn tool_link_key(envelope: &HookEnvelope) -> String {
    match envelope.tool_use_id() {
        Some(id) => format!("tool:{id}"),
        None => format!("tool:{}:{}", envelope.tool_name().unwrap_or("unknown"), envelope.session_id),
    }
}

fn invocation_id(session_id: &str, hook_event_name: &str) -> String {
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0);
    format!("{session_id}-{hook_event_name}-{nanos}")
}
