//! Execution strategies shared by the connection manager.
//!
//! Both strategies implement the same admit / detect-termination / reap
//! contract against the slot pool. They differ in who drives a connection
//! once it owns a slot:
//!
//! - [`CooperativeStepper`] accepts inline and steps every connection from
//!   the manager's own tick. No other tasks exist.
//! - [`TaskPerConnectionSupervisor`] spawns one task per connection that
//!   accepts and then runs the connection to completion. The manager only
//!   observes its lifecycle afterwards.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::config::ConcurrencyMode;
use crate::net::connection::{Connection, ConnectionId, ConnectionState, Lifecycle};
use crate::pool::{PendingWaiter, SlotError, SlotPool};

/// Why a client could not be put into a slot.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    #[error("accept timed out after {0:?}")]
    AcceptTimeout(Duration),

    #[error("failed to start connection task: {0}")]
    Spawn(String),

    #[error("listener is not running")]
    NotListening,

    #[error(transparent)]
    Slot(#[from] SlotError),
}

/// How an occupant's connection is held.
#[derive(Debug)]
enum Held<C> {
    /// Owned by the manager and stepped from its tick.
    Local(C),
    /// Moved into its own task; only the join handle stays behind.
    Task(JoinHandle<()>),
}

/// What a slot holds: one connection and its lifecycle handle.
#[derive(Debug)]
pub struct Occupant<C> {
    lifecycle: Lifecycle,
    held: Held<C>,
}

impl<C: Connection> Occupant<C> {
    pub fn local(connection: C) -> Self {
        Self {
            lifecycle: connection.lifecycle().clone(),
            held: Held::Local(connection),
        }
    }

    pub fn task(lifecycle: Lifecycle, handle: JoinHandle<()>) -> Self {
        Self {
            lifecycle,
            held: Held::Task(handle),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.lifecycle.id()
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn task_finished(&self) -> bool {
        matches!(&self.held, Held::Task(handle) if handle.is_finished())
    }

    /// One close attempt against whatever holds the connection.
    fn close(&mut self) -> bool {
        match &mut self.held {
            Held::Local(connection) => {
                connection.close_connection();
                connection.is_closed()
            }
            Held::Task(handle) => {
                self.lifecycle.request_close();
                self.lifecycle.is_terminated() || handle.is_finished()
            }
        }
    }

    fn release(self) {
        if let Held::Task(handle) = self.held {
            handle.abort();
        }
    }
}

/// Strategy interface selected once per server from configuration.
#[async_trait]
pub trait ExecutionStrategy<C: Connection>: Send + Sync {
    fn mode(&self) -> ConcurrencyMode;

    /// Start an initialized connection. On error the connection is dropped
    /// and the slot stays free.
    async fn activate(&self, connection: C, pending: PendingWaiter) -> Result<Occupant<C>, AdmissionError>;

    /// Advance every locally owned connection by one step.
    fn drive(&self, slots: &mut SlotPool<Occupant<C>>);

    /// Whether the slot can be reaped.
    fn is_terminated(&self, occupant: &Occupant<C>) -> bool;

    /// Whether an accept is still running outside the manager.
    fn admission_in_flight(&self, _slots: &SlotPool<Occupant<C>>) -> bool {
        false
    }

    /// One close attempt. Returns `true` once the slot may be freed.
    fn close(&self, occupant: &mut Occupant<C>) -> bool;

    /// Release an occupant that did not close in time.
    fn force_release(&self, occupant: Occupant<C>);
}

/// Select the strategy for `mode`.
pub fn for_mode<C: Connection>(mode: ConcurrencyMode, accept_timeout: Duration) -> Box<dyn ExecutionStrategy<C>> {
    match mode {
        ConcurrencyMode::Cooperative => Box::new(CooperativeStepper::new(accept_timeout)),
        ConcurrencyMode::TaskPerConnection => Box::new(TaskPerConnectionSupervisor::new(accept_timeout)),
    }
}

/// Single-task execution: the manager drives everything.
#[derive(Debug, Clone)]
pub struct CooperativeStepper {
    accept_timeout: Duration,
}

impl CooperativeStepper {
    pub fn new(accept_timeout: Duration) -> Self {
        Self { accept_timeout }
    }
}

#[async_trait]
impl<C: Connection> ExecutionStrategy<C> for CooperativeStepper {
    fn mode(&self) -> ConcurrencyMode {
        ConcurrencyMode::Cooperative
    }

    async fn activate(&self, mut connection: C, _pending: PendingWaiter) -> Result<Occupant<C>, AdmissionError> {
        match tokio::time::timeout(self.accept_timeout, connection.accept_connection()).await {
            Ok(Ok(())) => Ok(Occupant::local(connection)),
            Ok(Err(e)) => Err(AdmissionError::Accept(e)),
            Err(_) => Err(AdmissionError::AcceptTimeout(self.accept_timeout)),
        }
    }

    fn drive(&self, slots: &mut SlotPool<Occupant<C>>) {
        for (_, occupant) in slots.iter_mut() {
            if let Held::Local(connection) = &mut occupant.held {
                connection.step();
            }
        }
    }

    fn is_terminated(&self, occupant: &Occupant<C>) -> bool {
        occupant.lifecycle.is_closed() || occupant.task_finished()
    }

    fn close(&self, occupant: &mut Occupant<C>) -> bool {
        occupant.close()
    }

    fn force_release(&self, occupant: Occupant<C>) {
        occupant.release();
    }
}

/// One task per connection, supervised from the manager's tick.
#[derive(Debug, Clone)]
pub struct TaskPerConnectionSupervisor {
    accept_timeout: Duration,
}

impl TaskPerConnectionSupervisor {
    pub fn new(accept_timeout: Duration) -> Self {
        Self { accept_timeout }
    }
}

#[async_trait]
impl<C: Connection> ExecutionStrategy<C> for TaskPerConnectionSupervisor {
    fn mode(&self) -> ConcurrencyMode {
        ConcurrencyMode::TaskPerConnection
    }

    async fn activate(&self, connection: C, pending: PendingWaiter) -> Result<Occupant<C>, AdmissionError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            tracing::error!(error = %e, "Error starting connection task");
            AdmissionError::Spawn(e.to_string())
        })?;

        let lifecycle = connection.lifecycle().clone();
        let task_lifecycle = lifecycle.clone();
        let accept_timeout = self.accept_timeout;

        let handle = runtime.spawn(async move {
            let mut connection = connection;
            let id = task_lifecycle.id();
            match tokio::time::timeout(accept_timeout, connection.accept_connection()).await {
                Ok(Ok(())) => connection.run_to_completion(pending).await,
                Ok(Err(e)) => {
                    tracing::warn!(connection_id = %id, error = %e, "Failed to accept connection in task");
                }
                Err(_) => {
                    tracing::warn!(connection_id = %id, timeout = ?accept_timeout, "Accept timed out in task");
                }
            }
            connection.close_connection();
            task_lifecycle.terminate();
            tracing::debug!(connection_id = %id, "Ending connection task");
        });

        tracing::debug!(connection_id = %lifecycle.id(), "Started connection task");
        Ok(Occupant::task(lifecycle, handle))
    }

    fn drive(&self, _slots: &mut SlotPool<Occupant<C>>) {}

    fn is_terminated(&self, occupant: &Occupant<C>) -> bool {
        occupant.lifecycle.is_terminated() || occupant.task_finished()
    }

    fn admission_in_flight(&self, slots: &SlotPool<Occupant<C>>) -> bool {
        slots.iter().any(|(_, occupant)| {
            occupant.lifecycle.state() == ConnectionState::Accepting && !occupant.task_finished()
        })
    }

    fn close(&self, occupant: &mut Occupant<C>) -> bool {
        occupant.close()
    }

    fn force_release(&self, occupant: Occupant<C>) {
        occupant.release();
    }
}
