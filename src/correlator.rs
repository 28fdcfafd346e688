//! Tool-result correlator.
//!
//! Stream-parses the agent's external JSONL session log, watching for
//! `tool_result` content elements that confirm a pending tool use has
//! completed. Grounded in `examples/original_source/tool_correlator.go`'s
//! `ToolCompletionCorrelator` — the callback-driven variant design notes
//! call "the most feature-complete" draft, here expressed with an
//! `mpsc::Sender` instead of a raw closure callback, matching how the
//! teacher's own `sse.rs` emits events over a channel rather than via
//! callbacks.

use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::warn;

use crate::pending_tools::PendingTools;

/// Emitted when a pending tool use is confirmed completed by a matching
/// `tool_result` log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCompletionEvent {
    pub tool_use_id: String,
    pub timestamp: String,
    pub line_no: usize,
}

#[derive(Deserialize)]
struct LogEntry {
    #[serde(rename = "type")]
    entry_type: String,
    #[serde(default)]
    timestamp: String,
    message: Option<LogMessage>,
}

#[derive(Deserialize)]
struct LogMessage {
    role: String,
    #[serde(default)]
    content: Value,
}

/// Stream `path` line by line, emitting a [`ToolCompletionEvent`] on `tx`
/// for every `tool_result` entry whose `tool_use_id` is in `pending`, and
/// removing that id from `pending`. Malformed lines are logged and skipped;
/// if any line failed to parse, the aggregate error is returned after the
/// whole file has been read — matching the Go prototype's "log and
/// continue, report last error at EOF" behavior.
pub async fn run(path: &Path, pending: &PendingTools, tx: &mpsc::Sender<ToolCompletionEvent>) -> anyhow::Result<()> {
    let file = File::open(path).await?;
    let mut lines = BufReader::new(file).lines();
    let mut line_no = 0usize;
    let mut last_error: Option<anyhow::Error> = None;

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let entry: LogEntry = match serde_json::from_str(&line) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(line = line_no + 1, error = %e, "skipping malformed correlator log line");
                last_error = Some(e.into());
                continue;
            }
        };
        line_no += 1;

        if entry.entry_type != "user" {
            continue;
        }
        let Some(message) = &entry.message else { continue };
        if message.role != "user" {
            continue;
        }
        let Value::Array(items) = &message.content else { continue };

        for item in items {
            if item.is_null() {
                continue;
            }
            let Some(item_type) = item.get("type").and_then(Value::as_str) else {
                continue;
            };
            if item_type != "tool_result" {
                continue;
            }
            let Some(tool_use_id) = item.get("tool_use_id").and_then(Value::as_str) else {
                continue;
            };
            if tool_use_id.is_empty() || !pending.contains(tool_use_id).await {
                continue;
            }

            pending.remove(tool_use_id).await;
            let event = ToolCompletionEvent {
                tool_use_id: tool_use_id.to_string(),
                timestamp: entry.timestamp.clone(),
                line_no,
            };
            if tx.send(event).await.is_err() {
                return Ok(());
            }
        }
    }

    match last_error {
        Some(e) => Err(e.context("correlator stream completed with errors")),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    async fn run_on(contents: &str, pending: &PendingTools) -> (anyhow::Result<()>, Vec<ToolCompletionEvent>) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let result = run(file.path(), pending, &tx).await;
        drop(tx);
        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        (result, events)
    }

    #[tokio::test]
    async fn matches_pending_tool_result() {
        let pending = PendingTools::new();
        pending.add("toolu_x").await;
        let line = r#"{"type":"user","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"toolu_x","content":"ok"}]},"timestamp":"2025-01-01T00:00:00Z"}"#;
        let (result, events) = run_on(line, &pending).await;
        assert!(result.is_ok());
        assert_eq!(
            events,
            vec![ToolCompletionEvent {
                tool_use_id: "toolu_x".to_string(),
                timestamp: "2025-01-01T00:00:00Z".to_string(),
                line_no: 1,
            }]
        );
        assert!(pending.is_empty().await);
    }

    #[tokio::test]
    async fn ignores_non_pending_tool_result() {
        let pending = PendingTools::new();
        let line = r#"{"type":"user","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"toolu_y"}]},"timestamp":"2025-01-01T00:00:00Z"}"#;
        let (result, events) = run_on(line, &pending).await;
        assert!(result.is_ok());
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn skips_malformed_lines_and_reports_aggregate_error() {
        let pending = PendingTools::new();
        pending.add("toolu_z").await;
        let contents = "not json\n{\"type\":\"user\",\"message\":{\"role\":\"user\",\"content\":[{\"type\":\"tool_result\",\"tool_use_id\":\"toolu_z\"}]},\"timestamp\":\"t\"}\n";
        let (result, events) = run_on(contents, &pending).await;
        assert!(result.is_err());
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn string_content_bypasses_scanning() {
        let pending = PendingTools::new();
        pending.add("toolu_z").await;
        let line = r#"{"type":"user","message":{"role":"user","content":"plain text"},"timestamp":"t"}"#;
        let (result, events) = run_on(line, &pending).await;
        assert!(result.is_ok());
        assert!(events.is_empty());
        assert!(pending.contains("toolu_z").await);
    }
}
