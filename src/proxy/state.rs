//! Shared state threaded through every request handler: the history
//! matcher, pending-tool set, ordering gate, and control link all wire
//! together here, mirroring how `AppContext` threads its worker registry
//! and HTTP client through `routers/anthropic/context.rs`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::control_link::ControlLink;
use crate::history::RequestHistory;
use crate::ordering_gate::OrderingGate;
use crate::pending_tools::PendingTools;

pub struct AppState {
    pub http_client: reqwest::Client,
    pub upstream_host: String,
    pub history: RequestHistory,
    pub pending_tools: PendingTools,
    pub gate: OrderingGate,
    /// Populated once the Manager dials in. Frames submitted before that
    /// are simply not sent — the Manager is expected to connect promptly
    /// after the container starts, and a missed commit/load before it does
    /// is a startup race, not a steady-state condition worth blocking on.
    pub control_link: Arc<OnceCell<ControlLink>>,
    pub shutdown: CancellationToken,
    request_counter: AtomicU64,
}

impl AppState {
    pub fn new(http_client: reqwest::Client, upstream_host: String, shutdown: CancellationToken) -> Self {
        Self {
            http_client,
            upstream_host,
            history: RequestHistory::new(),
            pending_tools: PendingTools::new(),
            gate: OrderingGate::new(),
            control_link: Arc::new(OnceCell::new()),
            shutdown,
            request_counter: AtomicU64::new(0),
        }
    }

    /// Monotonic per-request sequence number, for log correlation only.
    pub fn next_request_number(&self) -> u64 {
        self.request_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub async fn set_control_link(&self, link: ControlLink) {
        let _ = self.control_link.set(link);
    }
}
