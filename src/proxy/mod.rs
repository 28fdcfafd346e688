//! Reverse-proxy pipeline wiring: fan-out, decoding, accumulation, history
//! matching, and the ordering gate assembled behind one axum router.
//! `main.rs` owns startup order; this module only builds the `Router` and
//! the shared state it closes over.

pub mod handler;
pub mod response;
pub mod state;

use std::sync::Arc;

use axum::Router;
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// The proxy accepts any method on any path, routing everything through
/// the single handler — a fallback route matches regardless of method.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .fallback(handler::handle)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
