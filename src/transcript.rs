//! Transcript reader: turns the host's growing line-delimited JSON
//! transcript file into `(turn_idx, input, output)` triples, never
//! re-emitting a turn at or below the caller's cursor.
//!
//! Records are read incrementally with a `BufRead` line iterator, tolerating
//! a truncated final line (the host may still be writing it) and skipping
//! any record whose `type` isn't recognized.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde_json::Value;

use crate::error::Result;

/// One extracted model turn.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub turn_idx: i64,
    pub input: String,
    pub output: String,
}

fn flatten_content(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|b| {
                if let Some(text) = b.get("text").and_then(Value::as_str) {
                    Some(text.to_string())
                } else if b.get("type").and_then(Value::as_str) == Some("tool_result") {
                    Some(serde_json::to_string(b).unwrap_or_default())
                } else {
                    None
                }
            })
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

fn record_role(record: &Value) -> Option<&str> {
    record
        .get("message")
        .and_then(|m| m.get("role"))
        .and_then(Value::as_str)
}

fn record_text(record: &Value) -> String {
    record
        .get("message")
        .and_then(|m| m.get("content"))
        .map(flatten_content)
        .unwrap_or_default()
}

fn is_assistant(record: &Value) -> bool {
    record.get("type").and_then(Value::as_str) == Some("assistant")
        || record_role(record) == Some("assistant")
}

/// Known, parseable record types. Anything else is skipped without
/// advancing the cursor.
fn is_recognized(record: &Value) -> bool {
    matches!(
        record.get("type").and_then(Value::as_str),
        Some("user") | Some("assistant") | Some("tool_result")
    )
}

/// Read every record from `path`, reconstruct turns, and return those with
/// `turn_idx > cursor`, in order. A turn is a maximal contiguous run of
/// assistant records; its INPUT is the concatenation of every non-assistant
/// record since the previous assistant run.
pub fn read_new_turns(path: &Path, cursor: i64) -> Result<Vec<Turn>> {
    let file = File::open(path)
        .map_err(|e| crate::error::Error::transcript(format!("opening {path:?}: {e}")))?;
    let reader = BufReader::new(file);

    let mut turns = Vec::new();
    let mut pending_input = String::new();
    let mut in_assistant_run = false;
    let mut current_output = String::new();
    let mut turn_idx: i64 = -1;

    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            // A truncated final line (the host may still be writing) is not
            // an error: stop reading, don't advance past it.
            Err(_) => break,
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let record: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            // Partial/unparseable final line: stop here, nothing beyond it is reliable.
            Err(_) => break,
        };

        if !is_recognized(&record) {
            continue;
        }

        if is_assistant(&record) {
            if !in_assistant_run {
                turn_idx += 1;
                in_assistant_run = true;
                current_output.clear();
            }
            current_output.push_str(&record_text(&record));
        } else {
            if in_assistant_run {
                // The assistant run just ended; flush the completed turn.
                if turn_idx > cursor {
                    turns.push(Turn {
                        turn_idx,
                        input: std::mem::take(&mut pending_input),
                        output: std::mem::take(&mut current_output),
                    });
                } else {
                    pending_input.clear();
                    current_output.clear();
                }
                in_assistant_run = false;
            }
            pending_input.push_str(&record_text(&record));
        }
    }

    // A transcript ending mid-assistant-run (host still streaming) still
    // counts as a complete turn for our purposes — the host only invokes
    // Stop/SubagentStop once that run is done being written.
    if in_assistant_run && turn_idx > cursor {
        turns.push(Turn {
            turn_idx,
            input: pending_input,
            output: current_output,
        });
    }

    Ok(turns)
}
