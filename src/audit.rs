//! Local audit log: an append-only line-delimited JSON record of every
//! Policy API request and its outcome.
//!
//! Uses direct file I/O rather than a logging crate abstraction: one JSON
//! object per line, opened in append mode, flushed per write so a process
//! crash never loses a record that was already returned to the caller.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

/// One audit record: a faithful account of a single Policy API interaction
/// (or, for telemetry-skipped/local-only events, a synthetic stand-in).
#[derive(Debug, Serialize)]
pub struct AuditRecord<'a> {
    pub timestamp: String,
    pub invocation_id: &'a str,
    pub hook_name: &'a str,
    pub session_id: &'a str,
    pub request: Value,
    pub response: Value,
}

pub struct AuditLog {
    path: std::path::PathBuf,
}

impl AuditLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        AuditLog {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Append one record as a single JSON line.
    pub fn record(&self, record: &AuditRecord<'_>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| crate::error::Error::other(format!("audit log dir: {e}")))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| crate::error::Error::other(format!("opening audit log: {e}")))?;
        let line = serde_json::to_string(record)?;
        writeln!(file, "{line}")
            .map_err(|e| crate::error::Error::other(format!("writing audit log: {e}")))?;
        file.flush()
            .map_err(|e| crate::error::Error::other(format!("flushing audit log: {e}")))?;
        Ok(())
    }

    /// Record a telemetry-only or LLM-local-only event: no network call
    /// occurred, so the response is a synthetic marker.
    pub fn record_local_only(
        &self,
        invocation_id: &str,
        hook_name: &str,
        session_id: &str,
        request: Value,
        event_result: &str,
        reason: &str,
    ) -> Result<()> {
        self.record(&AuditRecord {
            timestamp: now_rfc3339(),
            invocation_id,
            hook_name,
            session_id,
            request,
            response: serde_json::json!({"event_result": event_result, "reason": reason}),
        })
    }

    pub fn record_call(
        &self,
        invocation_id: &str,
        hook_name: &str,
        session_id: &str,
        request: Value,
        response: Value,
    ) -> Result<()> {
        self.record(&AuditRecord {
            timestamp: now_rfc3339(),
            invocation_id,
            hook_name,
            session_id,
            request,
            response,
        })
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
