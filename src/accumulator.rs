//! Stream event accumulator.
//!
//! Reconstructs a full model message from the SSE delta event sequence:
//! `message_start` opens a message, `content_block_start/delta/stop` build
//! up its content list, `message_delta` merges in the stop reason, and
//! `message_stop` closes it out. Shaped after
//! `model_gateway/src/routers/anthropic/sse.rs`'s `BlockAccumulator`/
//! `EventProcessor` (the per-block accumulation-by-delta-type logic is kept
//! near verbatim; the index-remapping and `tool_use` → `mcp_tool_use`
//! transform are dropped since this proxy only inspects the stream, never
//! rewrites it) and in the event transitions listed in the original Go
//! prototype's SSE handling.

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ProxyError;
use crate::sse::SseEvent;

/// One element of an accumulated message's content list.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
    Thinking { thinking: String, signature: String },
}

/// A fully reconstructed model message, emitted at `message_stop`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccumulatedMessage {
    pub stop_reason: Option<String>,
    pub content: Vec<ContentBlock>,
}

impl AccumulatedMessage {
    /// `tool_use` ids present in this message's content, in order.
    pub fn tool_use_ids(&self) -> Vec<&str> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Per-block builder, mirroring the shape the content block was opened with.
enum BlockBuilder {
    Text { text: String },
    ToolUse { id: String, name: String, input_json: String },
    Thinking { thinking: String, signature: String },
}

impl BlockBuilder {
    fn for_block_start(content_block: &Value) -> Self {
        let block_type = content_block.get("type").and_then(Value::as_str).unwrap_or("");
        match block_type {
            "tool_use" => BlockBuilder::ToolUse {
                id: content_block.get("id").and_then(Value::as_str).unwrap_or("").to_string(),
                name: content_block.get("name").and_then(Value::as_str).unwrap_or("").to_string(),
                input_json: String::new(),
            },
            "thinking" => BlockBuilder::Thinking {
                thinking: String::new(),
                signature: String::new(),
            },
            _ => BlockBuilder::Text { text: String::new() },
        }
    }

    fn accumulate_delta(&mut self, delta: &Value) {
        let delta_type = delta.get("type").and_then(Value::as_str).unwrap_or("");
        match self {
            BlockBuilder::Text { text } if delta_type == "text_delta" => {
                if let Some(t) = delta.get("text").and_then(Value::as_str) {
                    text.push_str(t);
                }
            }
            BlockBuilder::ToolUse { input_json, .. } if delta_type == "input_json_delta" => {
                if let Some(j) = delta.get("partial_json").and_then(Value::as_str) {
                    input_json.push_str(j);
                }
            }
            BlockBuilder::Thinking { thinking, signature } => {
                if delta_type == "thinking_delta" {
                    if let Some(t) = delta.get("thinking").and_then(Value::as_str) {
                        thinking.push_str(t);
                    }
                } else if delta_type == "signature_delta" {
                    if let Some(s) = delta.get("signature").and_then(Value::as_str) {
                        signature.push_str(s);
                    }
                }
            }
            _ => {}
        }
    }

    fn finalize(self) -> ContentBlock {
        match self {
            BlockBuilder::Text { text } => ContentBlock::Text { text },
            BlockBuilder::ToolUse { id, name, input_json } => {
                let input = serde_json::from_str(&input_json).unwrap_or_else(|e| {
                    warn!(error = %e, json = %input_json, "tool_use input was not valid JSON, using empty object");
                    Value::Object(serde_json::Map::new())
                });
                ContentBlock::ToolUse { id, name, input }
            }
            BlockBuilder::Thinking { thinking, signature } => ContentBlock::Thinking { thinking, signature },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Active,
}

/// Drives the `Idle`/`Active` state machine across a single SSE connection's
/// lifetime, which may carry several complete messages back to back.
pub struct Accumulator {
    state: State,
    blocks: Vec<Option<BlockBuilder>>,
    stop_reason: Option<String>,
}

impl Default for Accumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Accumulator {
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            blocks: Vec::new(),
            stop_reason: None,
        }
    }

    /// Feed one SSE event in. Returns `Some(message)` exactly when the event
    /// was a `message_stop` closing out an active message. A malformed
    /// `data` payload is a fatal parse error for the caller to propagate;
    /// unrecognized event kinds are ignored.
    pub fn feed(&mut self, event: &SseEvent) -> Result<Option<AccumulatedMessage>, ProxyError> {
        let kind = self.event_kind(event)?;
        let Some(kind) = kind else {
            return Ok(None);
        };

        let data: Value = if event.data.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&event.data).map_err(|e| ProxyError::SseParse(e.to_string()))?
        };

        match kind.as_str() {
            "message_start" => {
                self.state = State::Active;
                self.blocks.clear();
                self.stop_reason = None;
                Ok(None)
            }
            "content_block_start" if self.state == State::Active => {
                let index = data.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
                let content_block = data.get("content_block").cloned().unwrap_or(Value::Null);
                while self.blocks.len() <= index {
                    self.blocks.push(None);
                }
                self.blocks[index] = Some(BlockBuilder::for_block_start(&content_block));
                Ok(None)
            }
            "content_block_delta" if self.state == State::Active => {
                let index = data.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
                if let (Some(delta), Some(Some(block))) = (data.get("delta"), self.blocks.get_mut(index)) {
                    block.accumulate_delta(delta);
                }
                Ok(None)
            }
            "content_block_stop" if self.state == State::Active => {
                // Content is finalized lazily at message_stop; nothing to do
                // beyond keeping the builder in place.
                Ok(None)
            }
            "message_delta" if self.state == State::Active => {
                if let Some(delta) = data.get("delta") {
                    if let Some(reason) = delta.get("stop_reason").and_then(Value::as_str) {
                        self.stop_reason = Some(reason.to_string());
                    }
                }
                Ok(None)
            }
            "message_stop" if self.state == State::Active => {
                let content = std::mem::take(&mut self.blocks)
                    .into_iter()
                    .flatten()
                    .map(BlockBuilder::finalize)
                    .collect();
                let message = AccumulatedMessage {
                    stop_reason: self.stop_reason.take(),
                    content,
                };
                self.state = State::Idle;
                debug!(stop_reason = ?message.stop_reason, blocks = message.content.len(), "message accumulated");
                Ok(Some(message))
            }
            _ => {
                debug!(event = %kind, "ignoring SSE event outside expected transition");
                Ok(None)
            }
        }
    }

    /// The event's discriminator: its `event:` field, falling back to the
    /// `type` field of its JSON payload.
    fn event_kind(&self, event: &SseEvent) -> Result<Option<String>, ProxyError> {
        if let Some(kind) = &event.event {
            return Ok(Some(kind.clone()));
        }
        if event.data.is_empty() {
            return Ok(None);
        }
        let parsed: Value = serde_json::from_str(&event.data).map_err(|e| ProxyError::SseParse(e.to_string()))?;
        Ok(parsed.get("type").and_then(Value::as_str).map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(kind: &str, data: Value) -> SseEvent {
        SseEvent {
            id: None,
            event: Some(kind.to_string()),
            data: data.to_string(),
            retry: None,
        }
    }

    #[test]
    fn accumulates_a_text_message() {
        let mut acc = Accumulator::new();
        assert!(acc.feed(&ev("message_start", serde_json::json!({"type":"message_start"}))).unwrap().is_none());
        acc.feed(&ev(
            "content_block_start",
            serde_json::json!({"index":0,"content_block":{"type":"text","text":""}}),
        ))
        .unwrap();
        acc.feed(&ev(
            "content_block_delta",
            serde_json::json!({"index":0,"delta":{"type":"text_delta","text":"hi"}}),
        ))
        .unwrap();
        acc.feed(&ev("content_block_stop", serde_json::json!({"index":0}))).unwrap();
        acc.feed(&ev(
            "message_delta",
            serde_json::json!({"delta":{"stop_reason":"end_turn"}}),
        ))
        .unwrap();
        let message = acc.feed(&ev("message_stop", serde_json::json!({}))).unwrap().unwrap();
        assert_eq!(message.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(message.content, vec![ContentBlock::Text { text: "hi".to_string() }]);
    }

    #[test]
    fn collects_tool_use_ids() {
        let mut acc = Accumulator::new();
        acc.feed(&ev("message_start", serde_json::json!({"type":"message_start"}))).unwrap();
        acc.feed(&ev(
            "content_block_start",
            serde_json::json!({"index":0,"content_block":{"type":"tool_use","id":"toolu_1","name":"bash"}}),
        ))
        .unwrap();
        acc.feed(&ev(
            "content_block_delta",
            serde_json::json!({"index":0,"delta":{"type":"input_json_delta","partial_json":"{\"cmd\":\"ls\"}"}}),
        ))
        .unwrap();
        acc.feed(&ev("content_block_stop", serde_json::json!({"index":0}))).unwrap();
        let message = acc.feed(&ev("message_stop", serde_json::json!({}))).unwrap().unwrap();
        assert_eq!(message.tool_use_ids(), vec!["toolu_1"]);
    }

    #[test]
    fn malformed_data_is_fatal() {
        let mut acc = Accumulator::new();
        let bad = SseEvent {
            id: None,
            event: Some("message_start".to_string()),
            data: "{not json".to_string(),
            retry: None,
        };
        assert!(matches!(acc.feed(&bad), Err(ProxyError::SseParse(_))));
    }

    #[test]
    fn unknown_event_kind_is_ignored() {
        let mut acc = Accumulator::new();
        acc.feed(&ev("message_start", serde_json::json!({"type":"message_start"}))).unwrap();
        assert!(acc.feed(&ev("ping", serde_json::json!({"type":"ping"}))).unwrap().is_none());
    }
}
