//! Response-side inspection.
//!
//! Once the upstream response headers arrive, the handler hands the decoded
//! body here: one sink goes back to the agent untouched, the other is
//! consumed by either the SSE-driven inspector (accumulator wired to the
//! pending-tool set and the control link) or a plain drain-to-log, and
//! releasing the ordering gate is this module's job in both cases.
//! Grounded in `examples/original_source/proxy/proxy.go`'s
//! `ModifyResponse`, which spawns exactly this kind of background
//! goroutine per response.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::io::AsyncReadExt;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::accumulator::Accumulator;
use crate::fanout::FanoutSink;
use crate::proxy::state::AppState;
use crate::sse::SseFrameReader;

pub const SSE_MEDIA_TYPE: &str = "text/event-stream";

/// Drain `sink` to nowhere but the log, then release the gate. Used for
/// any non-SSE response body — there is nothing in a plain JSON or binary
/// response this proxy needs to inspect, but the inspector side of the
/// fan-out must still be fully drained or its pipe backs up.
pub async fn drain_to_log(mut sink: FanoutSink, media_type: String, guard: OwnedMutexGuard<()>, request_no: u64) {
    let mut discard = [0u8; 8 * 1024];
    let mut total = 0usize;
    loop {
        match sink.read(&mut discard).await {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) => {
                debug!(request_no, error = %e, "response inspector drain error");
                break;
            }
        }
    }
    debug!(request_no, %media_type, bytes = total, "drained non-SSE response body");
    drop(guard);
}

/// Feed `sink` through the SSE frame reader and accumulator, issuing
/// `commit`s for any turn that ends in `end_turn` with queued tools, then
/// release the gate once the stream is exhausted.
pub async fn drive_sse(state: Arc<AppState>, sink: FanoutSink, guard: OwnedMutexGuard<()>, request_no: u64) {
    let mut frames = SseFrameReader::new(sink);
    let mut accumulator = Accumulator::new();

    loop {
        let event = match frames.next().await {
            Some(Ok(event)) => event,
            Some(Err(e)) => {
                warn!(request_no, error = %e, "SSE parse error, abandoning this response's inspection");
                break;
            }
            None => break,
        };

        let message = match accumulator.feed(&event) {
            Ok(Some(message)) => message,
            Ok(None) => continue,
            Err(e) => {
                warn!(request_no, error = %e, "malformed SSE event data, abandoning this response's inspection");
                break;
            }
        };

        let queued: Vec<String> = message.tool_use_ids().into_iter().map(str::to_string).collect();
        for id in &queued {
            state.pending_tools.add(id).await;
        }

        if message.stop_reason.as_deref() == Some("end_turn") && !queued.is_empty() {
            // Minimal comment per the commit policy: the last queued tool_use_id.
            let comment = queued.last().cloned().unwrap_or_default();
            if let Some(link) = state.control_link.get() {
                link.commit(comment.clone()).await;
                info!(request_no, tool_use_id = %comment, "commit issued for completed turn");
            } else {
                warn!(request_no, "commit due but control link is not yet connected, dropping frame");
            }
        }
    }

    drop(guard);
}

/// Decode, classify, and dispatch one upstream response: build the
/// agent-visible `axum::Response` immediately and spawn the appropriate
/// response-side inspector in the background. The gate is released by
/// whichever inspector path is chosen, never by this function directly.
pub async fn build_response(
    state: Arc<AppState>,
    upstream: reqwest::Response,
    guard: OwnedMutexGuard<()>,
    request_no: u64,
) -> axum::response::Response {
    let status = upstream.status();
    let mut headers = upstream.headers().clone();

    let encoding = headers
        .get(crate::decode::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let content_type_header = headers
        .get(crate::decode::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let content_type = match crate::decode::parse_content_type(content_type_header.as_deref()) {
        Ok(ct) => ct,
        Err(e) => {
            warn!(request_no, error = %e, "invalid response media type or charset");
            drop(guard);
            return crate::error::unprocessable("invalid_media_type", e.to_string());
        }
    };

    let decoded = match crate::decode::decode_stream(encoding.as_deref(), upstream.bytes_stream()) {
        Ok(body) => body,
        Err(e) => {
            warn!(request_no, error = %e, "unhandled response content-encoding");
            drop(guard);
            return crate::error::unprocessable("unhandled_encoding", e.to_string());
        }
    };

    crate::decode::strip_content_encoding(&mut headers);
    headers.remove(axum::http::header::CONTENT_LENGTH);

    let (fanout, mut sinks) = crate::fanout::FanOut::new(decoded, 2);
    let agent_sink = sinks.pop().expect("two sinks requested");
    let inspector_sink = sinks.pop().expect("two sinks requested");
    // The pump self-terminates at the decoded source's EOF; see the comment
    // in `fanout::pump_loop` for why dropping this handle doesn't cancel it.
    drop(fanout);

    if content_type.media_type == SSE_MEDIA_TYPE {
        tokio::spawn(drive_sse(state, inspector_sink, guard, request_no));
    } else {
        tokio::spawn(drain_to_log(inspector_sink, content_type.media_type.clone(), guard, request_no));
    }

    let body = axum::body::Body::from_stream(tokio_util::io::ReaderStream::new(agent_sink.into_reader()));

    let mut response = axum::response::Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
