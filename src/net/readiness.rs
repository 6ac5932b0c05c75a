//! Readiness-multiplexing wait for one manager tick.
//!
//! Built fresh every tick from slot occupancy: the listener is watched for
//! readability only when admission is open, and every occupied slot
//! contributes its lifecycle watch so a closing connection wakes the manager.

use std::time::Duration;

use futures_util::future::select_all;
use tokio::sync::watch;

use crate::net::connection::{ConnectionState, Lifecycle};
use crate::net::listener::ListeningSocket;

/// What ended a readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// A client is waiting in the listener backlog.
    Listener,
    /// An occupied slot changed lifecycle state.
    Connection,
    /// Nothing happened before the timeout.
    TimedOut,
}

impl Readiness {
    pub fn listener_readable(self) -> bool {
        self == Readiness::Listener
    }
}

/// The set of things one tick waits on.
#[derive(Debug, Default)]
pub struct ReadinessSet<'a> {
    listener: Option<&'a ListeningSocket>,
    watches: Vec<watch::Receiver<ConnectionState>>,
    already_ready: bool,
}

impl<'a> ReadinessSet<'a> {
    pub fn new() -> Self {
        Self {
            listener: None,
            watches: Vec::new(),
            already_ready: false,
        }
    }

    /// Watch the listener for a new client.
    pub fn watch_listener(&mut self, listener: &'a ListeningSocket) {
        self.listener = Some(listener);
    }

    /// Watch one connection for state changes.
    pub fn watch_connection(&mut self, lifecycle: &Lifecycle) {
        self.watches.push(lifecycle.subscribe());
    }

    /// Make the wait return immediately, e.g. because an occupant is
    /// already reapable.
    pub fn mark_ready(&mut self) {
        self.already_ready = true;
    }

    pub fn is_watching_listener(&self) -> bool {
        self.listener.is_some()
    }

    pub fn connection_count(&self) -> usize {
        self.watches.len()
    }

    /// Wait for the first event, at most `timeout`.
    pub async fn wait(mut self, timeout: Duration) -> Readiness {
        if self.already_ready {
            return Readiness::Connection;
        }

        let listener = self.listener;
        let listener_ready = async move {
            match listener {
                Some(listener) => {
                    if let Err(e) = listener.readable().await {
                        tracing::warn!(error = %e, "Listener readiness failed");
                        std::future::pending::<()>().await;
                    }
                }
                None => std::future::pending::<()>().await,
            }
        };

        let watches = &mut self.watches;
        let connection_changed = async move {
            if watches.is_empty() {
                std::future::pending::<()>().await;
            }
            let changes = watches.iter_mut().map(|rx| Box::pin(rx.changed()));
            let _ = select_all(changes).await;
        };

        tokio::select! {
            _ = listener_ready => Readiness::Listener,
            _ = connection_changed => Readiness::Connection,
            _ = tokio::time::sleep(timeout) => Readiness::TimedOut,
        }
    }
}
