//! Connection contract and lifecycle tracking.
//!
//! # Responsibilities
//! - Define what the manager needs from a per-connection protocol object
//! - Track connection state (Accepting → Active → Closing → Closed → Terminated)
//! - Generate unique connection IDs for tracing
//! - Carry close requests from the manager to an independently running connection

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{watch, Notify};

use crate::http::DefaultHeaders;
use crate::net::listener::ListeningSocket;
use crate::pool::PendingWaiter;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection state for lifecycle tracking.
///
/// States only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    /// Created and initialized, transport accept not finished yet.
    Accepting,
    /// Connection is active and processing requests.
    Active,
    /// Connection is shutting down its transport.
    Closing,
    /// Transport is closed.
    Closed,
    /// The executor that ran this connection has exited.
    Terminated,
}

#[derive(Debug)]
struct LifecycleInner {
    id: ConnectionId,
    state: watch::Sender<ConnectionState>,
    close_requested: AtomicBool,
    close_notify: Notify,
}

/// Shared lifecycle handle for one connection.
///
/// The connection owns the transitions; the manager keeps a clone so it can
/// observe termination and request a close without touching the connection.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    inner: Arc<LifecycleInner>,
}

impl Lifecycle {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Accepting);
        Self {
            inner: Arc::new(LifecycleInner {
                id: ConnectionId::new(),
                state,
                close_requested: AtomicBool::new(false),
                close_notify: Notify::new(),
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Move to `next`. Backwards transitions are ignored.
    pub fn set(&self, next: ConnectionState) {
        self.inner.state.send_if_modified(|state| {
            if next > *state {
                *state = next;
                true
            } else {
                false
            }
        });
    }

    pub fn is_closed(&self) -> bool {
        self.state() >= ConnectionState::Closed
    }

    pub fn is_terminated(&self) -> bool {
        self.state() == ConnectionState::Terminated
    }

    /// Mark the executor as finished. Implies closed.
    pub fn terminate(&self) {
        self.set(ConnectionState::Terminated);
    }

    /// Ask the connection to close. Idempotent.
    pub fn request_close(&self) {
        if !self.inner.close_requested.swap(true, Ordering::SeqCst) {
            tracing::trace!(connection_id = %self.inner.id, "Close requested");
        }
        self.inner.close_notify.notify_waiters();
    }

    pub fn is_close_requested(&self) -> bool {
        self.inner.close_requested.load(Ordering::SeqCst)
    }

    /// Wait until a close has been requested.
    pub async fn close_requested(&self) {
        loop {
            let notified = self.inner.close_notify.notified();
            if self.is_close_requested() {
                return;
            }
            notified.await;
        }
    }

    /// Subscribe to state changes. The current state counts as seen.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// A per-connection protocol object owned by one slot.
///
/// The manager initializes it, asks it to accept one client, and then either
/// steps it (cooperative mode) or hands it to its own executor (task mode).
#[async_trait]
pub trait Connection: Send + 'static {
    /// Bind protocol state to the listening endpoint and header defaults.
    fn initialize(&mut self, endpoint: Arc<ListeningSocket>, headers: Arc<DefaultHeaders>);

    /// Accept one client from the endpoint, including any TLS handshake.
    async fn accept_connection(&mut self) -> io::Result<()>;

    /// Advance protocol state by one increment without blocking.
    fn step(&mut self);

    /// Drive the connection until it closes.
    ///
    /// While idle, an implementation may claim a notification from `pending`
    /// and close itself so the waiting client gets its slot.
    async fn run_to_completion(&mut self, pending: PendingWaiter);

    /// Close the transport. May need several calls before `is_closed` holds.
    fn close_connection(&mut self);

    fn lifecycle(&self) -> &Lifecycle;

    fn is_closed(&self) -> bool {
        self.lifecycle().is_closed()
    }
}

/// Creates a fresh connection for each slot activation.
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: Connection;

    fn create(&self) -> Self::Connection;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
        assert!(id2.as_u64() > id1.as_u64());
    }

    #[test]
    fn state_only_moves_forward() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), ConnectionState::Accepting);

        lifecycle.set(ConnectionState::Closed);
        lifecycle.set(ConnectionState::Active);
        assert_eq!(lifecycle.state(), ConnectionState::Closed);
        assert!(lifecycle.is_closed());
        assert!(!lifecycle.is_terminated());

        lifecycle.terminate();
        assert!(lifecycle.is_terminated());
    }

    #[tokio::test]
    async fn subscribers_see_transitions() {
        let lifecycle = Lifecycle::new();
        let mut rx = lifecycle.subscribe();

        lifecycle.set(ConnectionState::Active);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), ConnectionState::Active);
    }

    #[tokio::test]
    async fn close_request_wakes_waiter() {
        let lifecycle = Lifecycle::new();
        let waiter = lifecycle.clone();
        let handle = tokio::spawn(async move { waiter.close_requested().await });

        tokio::task::yield_now().await;
        lifecycle.request_close();

        let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(result.is_ok());
        assert!(lifecycle.is_close_requested());
    }

    #[tokio::test]
    async fn close_requested_returns_if_already_requested() {
        let lifecycle = Lifecycle::new();
        lifecycle.request_close();
        lifecycle.close_requested().await;
    }
}
