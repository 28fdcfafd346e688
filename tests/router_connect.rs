//! CONNECT handling at the full `axum::Router` level: HTTPS tunneling is
//! unsupported by design (§4.H.6), so a CONNECT request must get a 502 and
//! trigger proxy shutdown rather than being forwarded anywhere. Uses the
//! same `tower::ServiceExt::oneshot` router-testing pattern as the
//! teacher's `tests/routing/pd_routing_test.rs`.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{Method, StatusCode};
use cosmos_proxy::proxy::{router, AppState};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

fn test_state() -> Arc<AppState> {
    let http_client = reqwest::Client::builder().build().unwrap();
    Arc::new(AppState::new(http_client, "api.anthropic.com".to_string(), CancellationToken::new()))
}

#[tokio::test]
async fn connect_is_rejected_with_bad_gateway_and_triggers_shutdown() {
    let state = test_state();
    let app = router(state.clone());

    let request = Request::builder()
        .method(Method::CONNECT)
        .uri("api.anthropic.com:443")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert!(state.shutdown.is_cancelled());
}

#[tokio::test]
async fn non_connect_requests_do_not_trigger_shutdown() {
    // An upstream-unreachable GET still exercises the handler up through
    // the failed `send()`, at which point it must bail out with a 502
    // without touching the shutdown token — only CONNECT does that.
    // The upstream host points at a loopback port nothing listens on, so
    // the connection is refused immediately rather than depending on any
    // real network reachability.
    let http_client = reqwest::Client::builder().build().unwrap();
    let state = Arc::new(AppState::new(http_client, "127.0.0.1:1".to_string(), CancellationToken::new()));
    let app = router(state.clone());

    let request = Request::builder()
        .method(Method::GET)
        .uri("/v1/messages")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert!(!state.shutdown.is_cancelled());
}
