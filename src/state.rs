//! Durable state store: open events, input/output links, and transcript
//! cursors, persisted across the fresh process spawned for every hook
//! invocation.
//!
//! Backed by a single SQLite file under `STATE_DIR` (`rusqlite`, bundled
//! feature) rather than a bespoke file format. Every mutating operation
//! below runs inside one `rusqlite::Transaction` so a reader never observes
//! a half-written open_event/link pair.
//!
//! This module owns persistence only — it does not call the Policy API.
//! The Mediation Engine composes a Policy Client call with the matching
//! store write so the two stay logically atomic from the caller's
//! perspective, while keeping the store unit-testable without a network.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;

use crate::classify::EventClass;
use crate::error::Result;

/// A still-unclosed INPUT event.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenEvent {
    pub event_id: String,
    pub event_class: String,
    pub session_id: String,
    pub hook_name: String,
    pub input_content: String,
    pub metadata: Value,
    pub created_at: i64,
}

pub struct StateStore {
    conn: Connection,
}

impl StateStore {
    /// Open (creating if absent) the state database under `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| {
            crate::error::Error::other(format!("cannot create state dir {dir:?}: {e}"))
        })?;
        let conn = Connection::open(dir.join("state.db"))?;
        Self::migrate(&conn)?;
        Ok(StateStore { conn })
    }

    /// In-memory store, used in tests where no on-disk state is desired.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::migrate(&conn)?;
        Ok(StateStore { conn })
    }

    fn migrate(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS open_events (
                event_id TEXT PRIMARY KEY,
                event_class TEXT NOT NULL,
                session_id TEXT NOT NULL,
                hook_name TEXT NOT NULL,
                input_content TEXT NOT NULL,
                metadata_json TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS links (
                session_id TEXT NOT NULL,
                link_key TEXT NOT NULL,
                event_id TEXT NOT NULL,
                PRIMARY KEY (session_id, link_key)
            );
            CREATE TABLE IF NOT EXISTS transcript_cursors (
                session_id TEXT NOT NULL,
                transcript_path TEXT NOT NULL,
                last_turn_idx INTEGER NOT NULL,
                PRIMARY KEY (session_id, transcript_path)
            );
            ",
        )?;
        Ok(())
    }

    /// Record a newly-opened event (the Policy CREATE has already
    /// succeeded and produced `event_id`) and its link, in one transaction.
    pub fn record_open(
        &mut self,
        event_id: &str,
        class: EventClass,
        session_id: &str,
        link_key: &str,
        hook_name: &str,
        input_content: &str,
        metadata: &Value,
        created_at: i64,
    ) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO open_events
                (event_id, event_class, session_id, hook_name, input_content, metadata_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event_id,
                class.as_str(),
                session_id,
                hook_name,
                input_content,
                metadata.to_string(),
                created_at
            ],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO links (session_id, link_key, event_id) VALUES (?1, ?2, ?3)",
            params![session_id, link_key, event_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Look up the open event for a (session, link_key) pair, if any.
    pub fn find_by_link(&self, session_id: &str, link_key: &str) -> Result<Option<OpenEvent>> {
        let event_id: Option<String> = self
            .conn
            .query_row(
                "SELECT event_id FROM links WHERE session_id = ?1 AND link_key = ?2",
                params![session_id, link_key],
                |row| row.get(0),
            )
            .optional()?;
        let Some(event_id) = event_id else {
            return Ok(None);
        };
        self.find_by_event_id(&event_id)
    }

    fn find_by_event_id(&self, event_id: &str) -> Result<Option<OpenEvent>> {
        self.conn
            .query_row(
                "SELECT event_id, event_class, session_id, hook_name, input_content, metadata_json, created_at
                 FROM open_events WHERE event_id = ?1",
                params![event_id],
                |row| {
                    let metadata_json: String = row.get(5)?;
                    Ok(OpenEvent {
                        event_id: row.get(0)?,
                        event_class: row.get(1)?,
                        session_id: row.get(2)?,
                        hook_name: row.get(3)?,
                        input_content: row.get(4)?,
                        metadata: serde_json::from_str(&metadata_json).unwrap_or(Value::Null),
                        created_at: row.get(6)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    /// Remove a link and its open_event row in one transaction. Called once
    /// the matching Policy UPDATE (or forced close) has been applied.
    pub fn remove_link_and_event(&mut self, session_id: &str, link_key: &str) -> Result<()> {
        let tx = self.conn.transaction()?;
        let event_id: Option<String> = tx
            .query_row(
                "SELECT event_id FROM links WHERE session_id = ?1 AND link_key = ?2",
                params![session_id, link_key],
                |row| row.get(0),
            )
            .optional()?;
        tx.execute(
            "DELETE FROM links WHERE session_id = ?1 AND link_key = ?2",
            params![session_id, link_key],
        )?;
        if let Some(event_id) = event_id {
            tx.execute(
                "DELETE FROM open_events WHERE event_id = ?1",
                params![event_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Remove an open event and whatever link(s) point at it, keyed directly
    /// by `event_id` rather than by link key. Used when the closing hook
    /// doesn't carry the original pairing key (e.g. `SubagentStop`).
    pub fn remove_event_and_links(&mut self, event_id: &str) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM links WHERE event_id = ?1", params![event_id])?;
        tx.execute(
            "DELETE FROM open_events WHERE event_id = ?1",
            params![event_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// All remaining open events for a session, e.g. to force-close them.
    pub fn open_events_for_session(&self, session_id: &str) -> Result<Vec<OpenEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT event_id, event_class, session_id, hook_name, input_content, metadata_json, created_at
             FROM open_events WHERE session_id = ?1",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            let metadata_json: String = row.get(5)?;
            Ok(OpenEvent {
                event_id: row.get(0)?,
                event_class: row.get(1)?,
                session_id: row.get(2)?,
                hook_name: row.get(3)?,
                input_content: row.get(4)?,
                metadata: serde_json::from_str(&metadata_json).unwrap_or(Value::Null),
                created_at: row.get(6)?,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Delete every link and open_event row belonging to a session. Used on
    /// block and session end.
    pub fn clear_session(&mut self, session_id: &str) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM links WHERE session_id = ?1",
            params![session_id],
        )?;
        tx.execute(
            "DELETE FROM open_events WHERE session_id = ?1",
            params![session_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Clear transcript cursors for a session.
    pub fn clear_cursors(&mut self, session_id: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM transcript_cursors WHERE session_id = ?1",
            params![session_id],
        )?;
        Ok(())
    }

    /// Last emitted turn index for (session, transcript_path); -1 if never set.
    pub fn get_cursor(&self, session_id: &str, transcript_path: &str) -> Result<i64> {
        let idx: Option<i64> = self
            .conn
            .query_row(
                "SELECT last_turn_idx FROM transcript_cursors WHERE session_id = ?1 AND transcript_path = ?2",
                params![session_id, transcript_path],
                |row| row.get(0),
            )
            .optional()?;
        Ok(idx.unwrap_or(-1))
    }

    /// Advance the cursor. The caller must ensure `idx` is monotonically
    /// non-decreasing; this method does not re-check.
    pub fn set_cursor(&mut self, session_id: &str, transcript_path: &str, idx: i64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO transcript_cursors (session_id, transcript_path, last_turn_idx)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(session_id, transcript_path) DO UPDATE SET last_turn_idx = excluded.last_turn_idx",
            params![session_id, transcript_path, idx],
        )?;
        Ok(())
    }

    /// Delete open_events (and their links) older than `ttl_secs`, relative
    /// to `now`. Invoked opportunistically at the top of every invocation.
    pub fn prune_stale(&mut self, now: i64, ttl_secs: i64) -> Result<usize> {
        let cutoff = now - ttl_secs;
        let tx = self.conn.transaction()?;
        let stale_ids: Vec<String> = {
            let mut stmt =
                tx.prepare("SELECT event_id FROM open_events WHERE created_at < ?1")?;
            let rows = stmt.query_map(params![cutoff], |row| row.get(0))?;
            let mut ids = Vec::new();
            for r in rows {
                ids.push(r?);
            }
            ids
        };
        for id in &stale_ids {
            tx.execute("DELETE FROM links WHERE event_id = ?1", params![id])?;
            tx.execute("DELETE FROM open_events WHERE event_id = ?1", params![id])?;
        }
        tx.commit()?;
        Ok(stale_ids.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_store() -> StateStore {
        StateStore::open_in_memory().unwrap()
    }

    #[test]
    fn test_record_open_and_find_by_link() {
        let mut store = sample_store();
        store
            .record_open(
                "evt1",
                EventClass::AgtTool,
                "sess1",
                "tool:t1",
                "PreToolUse",
                "{}",
                &json!({"tool_name": "Bash"}),
                100,
            )
            .unwrap();

        let found = store.find_by_link("sess1", "tool:t1").unwrap().unwrap();
        assert_eq!(found.event_id, "evt1");
        assert_eq!(found.event_class, "agt_tool");
    }

    #[test]
    fn test_missing_link_returns_none() {
        let store = sample_store();
        assert!(store.find_by_link("sess1", "tool:nope").unwrap().is_none());
    }

    #[test]
    fn test_remove_link_and_event_clears_both() {
        let mut store = sample_store();
        store
            .record_open(
                "evt1",
                EventClass::UserAgt,
                "sess1",
                "prompt:sess1",
                "UserPromptSubmit",
                "hi",
                &json!({}),
                100,
            )
            .unwrap();
        store.remove_link_and_event("sess1", "prompt:sess1").unwrap();
        assert!(
            store
                .find_by_link("sess1", "prompt:sess1")
                .unwrap()
                .is_none()
        );
        assert!(store.open_events_for_session("sess1").unwrap().is_empty());
    }

    #[test]
    fn test_session_scoped_keys_do_not_collide() {
        let mut store = sample_store();
        store
            .record_open(
                "evt-a",
                EventClass::AgtTool,
                "session-A",
                "tool:t1",
                "PreToolUse",
                "{}",
                &json!({}),
                1,
            )
            .unwrap();
        store
            .record_open(
                "evt-b",
                EventClass::AgtTool,
                "session-B",
                "tool:t1",
                "PreToolUse",
                "{}",
                &json!({}),
                1,
            )
            .unwrap();

        let a = store.find_by_link("session-A", "tool:t1").unwrap().unwrap();
        let b = store.find_by_link("session-B", "tool:t1").unwrap().unwrap();
        assert_eq!(a.event_id, "evt-a");
        assert_eq!(b.event_id, "evt-b");
    }

    #[test]
    fn test_clear_session_removes_all_open_events() {
        let mut store = sample_store();
        store
            .record_open("e1", EventClass::AgtTool, "s1", "tool:t1", "PreToolUse", "{}", &json!({}), 1)
            .unwrap();
        store
            .record_open("e2", EventClass::UserAgt, "s1", "prompt:s1", "UserPromptSubmit", "hi", &json!({}), 1)
            .unwrap();
        store.clear_session("s1").unwrap();
        assert!(store.open_events_for_session("s1").unwrap().is_empty());
    }

    #[test]
    fn test_remove_event_and_links_by_event_id() {
        let mut store = sample_store();
        store
            .record_open("e1", EventClass::AgtAgt, "s1", "tool:t1", "PreToolUse", "{}", &json!({}), 1)
            .unwrap();
        store.remove_event_and_links("e1").unwrap();
        assert!(store.find_by_link("s1", "tool:t1").unwrap().is_none());
        assert!(store.open_events_for_session("s1").unwrap().is_empty());
    }

    #[test]
    fn test_cursor_default_is_negative_one() {
        let store = sample_store();
        assert_eq!(store.get_cursor("s1", "/tmp/t.jsonl").unwrap(), -1);
    }

    #[test]
    fn test_cursor_monotonic_set() {
        let mut store = sample_store();
        store.set_cursor("s1", "/tmp/t.jsonl", 0).unwrap();
        assert_eq!(store.get_cursor("s1", "/tmp/t.jsonl").unwrap(), 0);
        store.set_cursor("s1", "/tmp/t.jsonl", 2).unwrap();
        assert_eq!(store.get_cursor("s1", "/tmp/t.jsonl").unwrap(), 2);
    }

    #[test]
    fn test_clear_cursors() {
        let mut store = sample_store();
        store.set_cursor("s1", "/tmp/t.jsonl", 3).unwrap();
        store.clear_cursors("s1").unwrap();
        assert_eq!(store.get_cursor("s1", "/tmp/t.jsonl").unwrap(), -1);
    }

    #[test]
    fn test_prune_stale_deletes_old_rows_only() {
        let mut store = sample_store();
        store
            .record_open("old", EventClass::AgtTool, "s1", "tool:old", "PreToolUse", "{}", &json!({}), 0)
            .unwrap();
        store
            .record_open("new", EventClass::AgtTool, "s1", "tool:new", "PreToolUse", "{}", &json!({}), 1000)
            .unwrap();
        let pruned = store.prune_stale(1000, 500).unwrap();
        assert_eq!(pruned, 1);
        assert!(store.find_by_link("s1", "tool:old").unwrap().is_none());
        assert!(store.find_by_link("s1", "tool:new").unwrap().is_some());
    }
}
