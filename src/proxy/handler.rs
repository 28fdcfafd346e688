//! Reverse-proxy pipeline.
//!
//! The single axum handler every agent request passes through: acquire the
//! ordering gate, fan the request body out to the request-history inspector,
//! rewrite and forward upstream, then hand the response off to
//! [`super::response`] for decoding and response-side inspection. Grounded
//! in `examples/original_source/proxy/proxy.go`'s `startProxy` (`Rewrite`/
//! `ModifyResponse` hooks translated to an axum handler plus a `reqwest`
//! client) and in `routers/anthropic/handler.rs`'s composed entry-point
//! shape (`build_*`/`send_*`/`parse_*` steps chained in one function).

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderValue, Method};
use axum::response::Response;
use futures_util::TryStreamExt;
use serde_json::Value;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{info, warn};

use crate::error;
use crate::fanout::FanOut;
use crate::history::MatchOutcome;
use crate::proxy::response;
use crate::proxy::state::AppState;

/// Hop-by-hop headers stripped from both directions, per RFC 7230 §6.1,
/// plus `host`, which is rewritten rather than forwarded verbatim.
const STRIPPED_REQUEST_HEADERS: &[&str] = &["host", "connection", "keep-alive", "transfer-encoding", "upgrade"];

pub async fn handle(State(state): State<Arc<AppState>>, req: Request) -> Response {
    if req.method() == Method::CONNECT {
        warn!("CONNECT is not supported by this proxy, shutting down");
        state.shutdown.cancel();
        return error::bad_gateway("connect_unsupported", "CONNECT tunneling is not supported");
    }

    let guard = state.gate.acquire().await;
    let request_no = state.next_request_number();

    let (parts, body) = req.into_parts();
    let body_reader = StreamReader::new(TryStreamExt::map_err(body.into_data_stream(), std::io::Error::other));
    let (request_fanout, mut request_sinks) = FanOut::new(body_reader, 2);
    let inspect_sink = request_sinks.pop().expect("two sinks requested");
    let forward_sink = request_sinks.pop().expect("two sinks requested");

    tokio::spawn(inspect_request_body(state.clone(), inspect_sink, request_no));

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .to_string();
    let url = format!("https://{}{}", state.upstream_host, path_and_query);

    let mut out_headers = parts.headers.clone();
    for name in STRIPPED_REQUEST_HEADERS {
        out_headers.remove(*name);
    }
    if let Ok(host_value) = HeaderValue::from_str(&state.upstream_host) {
        out_headers.insert(axum::http::header::HOST, host_value);
    }

    let outbound_body = reqwest::Body::wrap_stream(ReaderStream::new(forward_sink.into_reader()));

    let outbound = state
        .http_client
        .request(parts.method.clone(), &url)
        .headers(out_headers)
        .body(outbound_body)
        .send()
        .await;

    // The pump runs to the source's natural EOF on its own; dropping the
    // handle here does not cancel it (see the comment in `fanout::pump_loop`).
    drop(request_fanout);

    let upstream_response = match outbound {
        Ok(resp) => resp,
        Err(e) => {
            warn!(request_no, error = %e, "upstream request failed");
            drop(guard);
            return error::bad_gateway("upstream_transport_error", e.to_string());
        }
    };

    response::build_response(state, upstream_response, guard, request_no).await
}

/// Parse the duplicated request body as JSON and run it through the
/// request-history matcher, issuing a `load` over the control link on a
/// full-prefix match. Runs independently of the agent-visible forwarding
/// path; any failure here is logged and otherwise inert.
async fn inspect_request_body(state: Arc<AppState>, sink: crate::fanout::FanoutSink, request_no: u64) {
    use tokio::io::AsyncReadExt;

    let mut reader = sink.into_reader();
    let mut buf = Vec::new();
    if let Err(e) = reader.read_to_end(&mut buf).await {
        warn!(request_no, error = %e, "request inspector read error");
        return;
    }
    if buf.is_empty() {
        return;
    }

    let parsed: Value = match serde_json::from_slice(&buf) {
        Ok(v) => v,
        Err(e) => {
            warn!(request_no, error = %e, "request body is not valid JSON, skipping history match");
            return;
        }
    };

    let Some(messages) = parsed.get("messages").and_then(Value::as_array) else {
        return;
    };

    match state.history.process(messages).await {
        MatchOutcome::Load { history_index } => {
            info!(request_no, history_index, "history prefix match, issuing load");
            if let Some(link) = state.control_link.get() {
                link.load(history_index).await;
            } else {
                warn!(request_no, "load due but control link is not yet connected, dropping frame");
            }
        }
        MatchOutcome::NoMatch => {}
    }
}
