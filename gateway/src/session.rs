//! # Agent Session Registry
//!
//! Holds the live control-channel connections, keyed by tunnel token.
//! Generalizes the teacher's `state.agents: DashMap<String, AgentInfo>`
//! (keyed there by a server-assigned short ID) to key by the
//! caller-supplied token instead, and adds the pending-response slot map
//! the teacher's plain TCP relay never needed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use tunnel_protocol::Envelope;

/// The agent's answer for a single `proxy_request`, or a reason the
/// answer will never arrive.
#[derive(Debug, Clone)]
pub struct ProxyOutcome {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body_b64: String,
}

/// Why a pending slot was resolved without a real `proxy_response`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotFailure {
    /// The session was torn down (read error, close, or superseded by a
    /// reconnect) before the agent answered.
    SessionClosed,
}

pub type PendingResult = Result<ProxyOutcome, SlotFailure>;

/// A single live control-channel connection.
///
/// Owned exclusively by the reader task spawned for that socket; every
/// other task only ever touches it through `Arc<AgentSession>`.
pub struct AgentSession {
    pub token: String,
    /// Internal correlation id for log lines — distinct reconnects of
    /// the same token get distinct ids, so a "replacing session" log
    /// line can be tied back to the specific predecessor it closed.
    pub id: uuid::Uuid,
    outbound: Mutex<Option<mpsc::UnboundedSender<Envelope>>>,
    pending: Mutex<HashMap<u64, oneshot::Sender<PendingResult>>>,
    closed: AtomicBool,
}

impl AgentSession {
    fn new(token: String, tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self {
            token,
            id: uuid::Uuid::new_v4(),
            outbound: Mutex::new(Some(tx)),
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Serializes a write onto this session's outbound queue. The
    /// per-session write-lock is this queue itself: every caller sends
    /// into the same channel, and the single spawned writer task drains
    /// it in FIFO order, so contention never needs an explicit mutex
    /// around the socket.
    pub fn send(&self, envelope: Envelope) -> Result<(), ()> {
        let guard = self.outbound.lock().expect("outbound lock poisoned");
        match guard.as_ref() {
            Some(tx) => tx.send(envelope).map_err(|_| ()),
            None => Err(()),
        }
    }

    /// Registers a single-shot slot for `request_id` and returns the
    /// receiving half the public handler awaits.
    pub fn register_pending(&self, request_id: u64) -> oneshot::Receiver<PendingResult> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending lock poisoned")
            .insert(request_id, tx);
        rx
    }

    /// Removes a pending slot without resolving it — used after a
    /// timeout, so a late `proxy_response` for the same id is discarded
    /// as "unknown request_id" rather than delivered to a dead waiter.
    pub fn remove_pending(&self, request_id: u64) {
        self.pending
            .lock()
            .expect("pending lock poisoned")
            .remove(&request_id);
    }

    /// Delivers a `proxy_response` to its waiter. Returns `false` if no
    /// slot exists for `request_id` (already timed out, or never
    /// existed) — the caller discards silently per the wire contract.
    pub fn resolve(&self, request_id: u64, outcome: ProxyOutcome) -> bool {
        let slot = self
            .pending
            .lock()
            .expect("pending lock poisoned")
            .remove(&request_id);
        match slot {
            Some(tx) => tx.send(Ok(outcome)).is_ok(),
            None => false,
        }
    }

    /// Tears down this session: drops the outbound sender (ending the
    /// writer task and, with it, the socket's write half) and fails
    /// every pending slot. Idempotent — safe to call from both the
    /// swap-in-a-new-session path and the reader's own cleanup path.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.outbound
            .lock()
            .expect("outbound lock poisoned")
            .take();
        let mut pending = self.pending.lock().expect("pending lock poisoned");
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(SlotFailure::SessionClosed));
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// `token -> live session` registry. At most one entry per token at any
/// time (§3 invariant).
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, Arc<AgentSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a session for `token` and installs it in the registry.
    /// If a session already exists for that token, it is swapped out
    /// first and only then closed — swap-then-close, never the reverse,
    /// so no observer ever sees the registry without a session for an
    /// agent that is mid-reconnect.
    pub fn accept(&self, token: String, tx: mpsc::UnboundedSender<Envelope>) -> Arc<AgentSession> {
        let session = Arc::new(AgentSession::new(token.clone(), tx));
        // `insert` atomically swaps the map entry and hands back whatever
        // was there before; only after the swap is visible do we close
        // the predecessor, so no observer ever sees a gap.
        let previous = self.sessions.insert(token.clone(), session.clone());
        if let Some(previous) = previous {
            info!(token = %token, "replacing existing session for token");
            previous.close();
        }
        session
    }

    pub fn get(&self, token: &str) -> Option<Arc<AgentSession>> {
        self.sessions.get(token).map(|entry| entry.value().clone())
    }

    /// Tokens currently holding a live session, for the admin listing.
    pub fn tokens(&self) -> Vec<String> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Runs when a session's reader task returns. Always fails that
    /// session's pending slots; only removes it from the registry (and
    /// reports that the caller should also drop its routing bindings)
    /// if a successor hasn't already replaced it.
    pub fn cleanup(&self, session: &Arc<AgentSession>) -> bool {
        session.close();
        let still_current = self
            .sessions
            .get(&session.token)
            .map(|entry| Arc::ptr_eq(entry.value(), session))
            .unwrap_or(false);
        if still_current {
            self.sessions.remove(&session.token);
            true
        } else {
            warn!(token = %session.token, "session already superseded, skipping registry removal");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(status: u16) -> ProxyOutcome {
        ProxyOutcome {
            status,
            headers: vec![],
            body_b64: String::new(),
        }
    }

    #[tokio::test]
    async fn resolve_delivers_to_waiter() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let registry = SessionRegistry::new();
        let session = registry.accept("tok-a".to_string(), tx);
        let waiter = session.register_pending(1);
        assert!(session.resolve(1, outcome(200)));
        let result = waiter.await.unwrap().unwrap();
        assert_eq!(result.status, 200);
    }

    #[tokio::test]
    async fn resolve_on_unknown_request_id_is_discarded() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let registry = SessionRegistry::new();
        let session = registry.accept("tok-a".to_string(), tx);
        assert!(!session.resolve(999, outcome(200)));
    }

    #[tokio::test]
    async fn close_fails_every_pending_slot() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let registry = SessionRegistry::new();
        let session = registry.accept("tok-a".to_string(), tx);
        let waiter_a = session.register_pending(1);
        let waiter_b = session.register_pending(2);
        session.close();
        assert!(matches!(
            waiter_a.await.unwrap(),
            Err(SlotFailure::SessionClosed)
        ));
        assert!(matches!(
            waiter_b.await.unwrap(),
            Err(SlotFailure::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn accept_swaps_then_closes_predecessor() {
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();
        let registry = SessionRegistry::new();
        let first = registry.accept("tok-a".to_string(), tx_a);
        let waiter = first.register_pending(1);

        let second = registry.accept("tok-a".to_string(), tx_b);

        // the registry already points at the new session...
        assert!(Arc::ptr_eq(&registry.get("tok-a").unwrap(), &second));
        // ...and the old one was closed, failing its outstanding slot.
        assert!(matches!(
            waiter.await.unwrap(),
            Err(SlotFailure::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn cleanup_skips_removal_when_superseded() {
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();
        let registry = SessionRegistry::new();
        let first = registry.accept("tok-a".to_string(), tx_a);
        let _second = registry.accept("tok-a".to_string(), tx_b);

        // first's own reader returning later must not evict the second
        // session's registry entry.
        let removed = registry.cleanup(&first);
        assert!(!removed);
        assert!(registry.get("tok-a").is_some());
    }

    #[tokio::test]
    async fn cleanup_removes_current_session() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let registry = SessionRegistry::new();
        let session = registry.accept("tok-a".to_string(), tx);
        let removed = registry.cleanup(&session);
        assert!(removed);
        assert!(registry.get("tok-a").is_none());
    }
}
