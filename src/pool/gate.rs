//! Pending-client handoff.
//!
//! When every slot is busy and a client is waiting in the listen backlog, the
//! manager records exactly one pending client and drops a notification into
//! a capacity-one mailbox. Idle executors in task mode wait on that mailbox and
//! give up their slot when they claim it.

use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;
use tokio::time::Instant;

/// A single-slot mailbox.
///
/// Holds at most one item. Sending into a full mailbox hands the item back.
#[derive(Debug)]
pub struct Mailbox<T> {
    item: Mutex<Option<T>>,
    notify: Notify,
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            item: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    /// Deposit `item` without blocking. Returns it back if the mailbox is full.
    pub fn try_send(&self, item: T) -> Result<(), T> {
        let mut slot = self.item.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(item);
        }
        *slot = Some(item);
        drop(slot);
        self.notify.notify_one();
        Ok(())
    }

    /// Remove the held item, if any, without blocking.
    pub fn try_recv(&self) -> Option<T> {
        self.item
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn is_full(&self) -> bool {
        self.item
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Wait until an item is available and take it.
    ///
    /// Cancel-safe: the item is only removed once this future completes.
    pub async fn recv(&self) -> T {
        loop {
            let notified = self.notify.notified();
            if let Some(item) = self.try_recv() {
                return item;
            }
            notified.await;
        }
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Notification that a client is waiting for a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingClient {
    /// When the manager noticed the client.
    pub since: Instant,
}

/// Manager-owned pending flag plus the handoff mailbox.
#[derive(Debug)]
pub struct PendingGate {
    pending: bool,
    cell: Arc<Mailbox<PendingClient>>,
}

impl PendingGate {
    pub fn new() -> Self {
        Self {
            pending: false,
            cell: Arc::new(Mailbox::new()),
        }
    }

    /// Whether a client is currently waiting for a slot.
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Record a pending client and notify idle executors.
    ///
    /// Returns `false` if a client is already pending; the second client
    /// stays in the transport backlog.
    pub fn publish(&mut self, client: PendingClient) -> bool {
        if self.pending {
            return false;
        }
        self.pending = true;
        // A full cell already carries an unclaimed notification.
        let _ = self.cell.try_send(client);
        true
    }

    /// Clear the pending flag and drain the handoff cell.
    pub fn take(&mut self) -> Option<PendingClient> {
        self.pending = false;
        self.cell.try_recv()
    }

    /// Handle for executors that want to yield their slot to a pending client.
    pub fn waiter(&self) -> PendingWaiter {
        PendingWaiter {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl Default for PendingGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Executor-side view of the pending gate.
#[derive(Debug, Clone)]
pub struct PendingWaiter {
    cell: Arc<Mailbox<PendingClient>>,
}

impl PendingWaiter {
    /// Block until a pending-client notification is claimed.
    pub async fn claim(&self) -> PendingClient {
        self.cell.recv().await
    }

    /// Claim a notification if one is waiting.
    pub fn try_claim(&self) -> Option<PendingClient> {
        self.cell.try_recv()
    }
}
