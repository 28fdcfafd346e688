//! Request-history matcher.
//!
//! Detects when the agent resubmits a prefix of an earlier turn's message
//! list — the signature of a rolled-back session — so the snapshot/rollback
//! controller can tell the Manager to `load` the matching history index.
//! No prototype implements this algorithm directly; it's a fresh
//! implementation of the matching and "trim to JSON boundary" logic,
//! written in the same small-guarded-state-behind-a-`Mutex` shape as the
//! pending-tool set.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

/// Append-only turn-marker history, shared across requests.
#[derive(Clone, Default)]
pub struct RequestHistory {
    entries: Arc<Mutex<Vec<Vec<u8>>>>,
}

/// Outcome of processing one outgoing request against the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// No match: either the request was too short, or `content` was a bare
    /// string (matching bypassed), or no stored marker was a boundary-clean
    /// prefix of this one.
    NoMatch,
    /// A full-prefix match against the marker at this history index.
    Load { history_index: i64 },
}

impl RequestHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one outgoing request's JSON body. `messages` must be the
    /// request's `messages` array. Fewer than 3 messages: no match, no
    /// append. The third-to-last message must have `role == "user"` and an
    /// array-valued `content`, or matching is bypassed (history untouched).
    pub async fn process(&self, messages: &[Value]) -> MatchOutcome {
        if messages.len() < 3 {
            return MatchOutcome::NoMatch;
        }
        let marker = &messages[messages.len() - 3];
        if marker.get("role").and_then(Value::as_str) != Some("user") {
            return MatchOutcome::NoMatch;
        }
        let Some(content) = marker.get("content") else {
            return MatchOutcome::NoMatch;
        };
        let Value::Array(items) = content else {
            return MatchOutcome::NoMatch;
        };

        let cur = canonicalize(items);

        let mut entries = self.entries.lock().await;
        let outcome = entries
            .iter()
            .enumerate()
            .rev()
            .find_map(|(index, prev)| {
                let common = common_prefix_len(&cur, prev);
                let boundary = trim_to_json_boundary(&cur[..common]);
                (boundary == prev.len()).then_some(index as i64)
            })
            .map(|history_index| MatchOutcome::Load { history_index })
            .unwrap_or(MatchOutcome::NoMatch);

        entries.push(cur);
        outcome
    }
}

/// Canonical byte form of a content array: each element independently
/// serialized to compact JSON, joined with commas (no enclosing brackets —
/// the boundary trimmer below treats the whole thing as a comma-separated
/// stream of complete JSON values).
fn canonicalize(items: &[Value]) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(b',');
        }
        // `to_vec` on a `Value` cannot fail.
        out.extend_from_slice(&serde_json::to_vec(item).unwrap_or_default());
    }
    out
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// Given a byte prefix that may split a JSON value mid-token, find the
/// longest leading region that is a comma-separated run of complete JSON
/// values.
fn trim_to_json_boundary(prefix: &[u8]) -> usize {
    let mut committed = 0;
    let mut offset = 0;

    loop {
        let mut stream = serde_json::Deserializer::from_slice(&prefix[offset..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(_)) => {
                offset += stream.byte_offset();
                committed = offset;
                if prefix.get(offset) == Some(&b',') {
                    offset += 1;
                } else {
                    break;
                }
            }
            _ => break,
        }
    }

    committed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn messages_with_marker(marker_content: Value) -> Vec<Value> {
        vec![
            json!({"role": "user", "content": marker_content}),
            json!({"role": "assistant", "content": []}),
            json!({"role": "user", "content": "placeholder"}),
        ]
    }

    #[tokio::test]
    async fn fewer_than_three_messages_is_no_match_no_append() {
        let history = RequestHistory::new();
        let messages = vec![json!({"role": "user", "content": []})];
        assert_eq!(history.process(&messages).await, MatchOutcome::NoMatch);
        assert!(history.entries.lock().await.is_empty());
    }

    #[tokio::test]
    async fn string_content_bypasses_matching() {
        let history = RequestHistory::new();
        let messages = messages_with_marker(Value::String("not an array".to_string()));
        assert_eq!(history.process(&messages).await, MatchOutcome::NoMatch);
        assert!(history.entries.lock().await.is_empty());
    }

    #[tokio::test]
    async fn detects_rollback_prefix_match() {
        // Mirrors the three-request scenario: req1=A, req2=A,B, req3=A.
        // req2's marker also has req1's marker as a byte-boundary-clean
        // prefix of its own (A is a prefix of "A,B"), so it matches too —
        // the decisive check is req3, which must resolve back to req1's
        // index (0) rather than req2's (1).
        let history = RequestHistory::new();

        let a = json!({"type": "text", "text": "A"});
        let b = json!({"type": "text", "text": "B"});

        let req1 = messages_with_marker(Value::Array(vec![a.clone()]));
        assert_eq!(history.process(&req1).await, MatchOutcome::NoMatch);

        let req2 = messages_with_marker(Value::Array(vec![a.clone(), b.clone()]));
        assert_eq!(history.process(&req2).await, MatchOutcome::Load { history_index: 0 });

        let req3 = messages_with_marker(Value::Array(vec![a.clone()]));
        assert_eq!(history.process(&req3).await, MatchOutcome::Load { history_index: 0 });
    }

    #[tokio::test]
    async fn no_match_when_no_prefix_relationship_exists() {
        let history = RequestHistory::new();
        let req1 = messages_with_marker(Value::Array(vec![json!({"type": "text", "text": "A"})]));
        history.process(&req1).await;

        let req2 = messages_with_marker(Value::Array(vec![json!({"type": "text", "text": "Z"})]));
        assert_eq!(history.process(&req2).await, MatchOutcome::NoMatch);
    }

    #[test]
    fn boundary_trim_stops_before_partial_value() {
        let full = canonicalize(&[json!({"a": 1}), json!({"b": 2})]);
        let partial = &full[..full.len() - 2];
        let trimmed = trim_to_json_boundary(partial);
        assert_eq!(&partial[..trimmed], canonicalize(&[json!({"a": 1})]).as_slice());
    }
}
