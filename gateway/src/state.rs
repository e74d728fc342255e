//! Shared application state, cloned and passed to each request handler —
//! same role as the teacher's `AppState`, now holding the session
//! registry, routing table, and the public-path request-id counter
//! instead of the teacher's flat agent/connection/session maps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::routes::RoutingTable;
use crate::session::SessionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionRegistry,
    pub routes: RoutingTable,
    pub request_timeout: Duration,
    request_id: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            sessions: SessionRegistry::new(),
            routes: RoutingTable::new(),
            request_timeout,
            request_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Allocates a fresh, process-monotonic request id. May safely
    /// reset on restart — the only requirement is uniqueness within a
    /// session's lifetime.
    pub fn next_request_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }
}
