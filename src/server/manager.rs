//! The connection manager.
//!
//! Owns the listener, a fixed number of connection slots and the pending
//! gate. Every call to [`Server::tick`] performs one round: reap, admit a
//! waiting client, drive connections, wait for readiness, admit or mark
//! pending.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::{ConcurrencyMode, ServerConfig};
use crate::http::DefaultHeaders;
use crate::lifecycle::shutdown::{DrainPolicy, DrainReport, Shutdown};
use crate::net::connection::{Connection, ConnectionFactory, ConnectionId};
use crate::net::listener::{ListenerError, ListeningSocket};
use crate::net::readiness::ReadinessSet;
use crate::observability::metrics::{self, Admission};
use crate::pool::{PendingClient, PendingGate, SlotError, SlotPool};
use crate::server::strategy::{self, AdmissionError, ExecutionStrategy, Occupant};

/// Construction parameters for a [`Server`].
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub port: u16,
    pub bind_address: Ipv4Addr,
    pub max_connections: u8,
    pub mode: ConcurrencyMode,
    /// Upper bound on one accept, including the TLS handshake.
    pub accept_timeout: Duration,
    pub drain: DrainPolicy,
}

impl ServerSettings {
    pub fn new(port: u16, max_connections: u8, bind_address: Ipv4Addr) -> Self {
        Self {
            port,
            bind_address,
            max_connections,
            mode: ConcurrencyMode::default(),
            accept_timeout: Duration::from_secs(5),
            drain: DrainPolicy::default(),
        }
    }

    pub fn with_mode(mut self, mode: ConcurrencyMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_drain(mut self, drain: DrainPolicy) -> Self {
        self.drain = drain;
        self
    }

    pub fn with_accept_timeout(mut self, timeout: Duration) -> Self {
        self.accept_timeout = timeout;
        self
    }
}

impl From<&ServerConfig> for ServerSettings {
    fn from(config: &ServerConfig) -> Self {
        let drain = DrainPolicy {
            deadline: config.timeouts.drain_ms.map(Duration::from_millis),
            pause: Duration::from_millis(config.timeouts.drain_pause_ms),
        };
        Self::new(
            config.listener.port,
            config.listener.max_connections,
            config.listener.bind_address,
        )
        .with_mode(config.execution.mode)
        .with_accept_timeout(Duration::from_millis(config.timeouts.accept_ms))
        .with_drain(drain)
    }
}

/// A fixed-capacity server for connections produced by `F`.
pub struct Server<F: ConnectionFactory> {
    settings: ServerSettings,
    factory: F,
    strategy: Box<dyn ExecutionStrategy<F::Connection>>,
    listener: Option<Arc<ListeningSocket>>,
    slots: SlotPool<Occupant<F::Connection>>,
    gate: PendingGate,
    headers: Arc<DefaultHeaders>,
    running: bool,
}

impl<F: ConnectionFactory> Server<F> {
    /// Create a stopped server using the default concurrency mode.
    pub fn new(port: u16, max_connections: u8, bind_address: Ipv4Addr, factory: F) -> Self {
        Self::with_settings(
            ServerSettings::new(port, max_connections, bind_address),
            factory,
        )
    }

    pub fn with_settings(mut settings: ServerSettings, factory: F) -> Self {
        if settings.max_connections == 0 {
            tracing::warn!("max_connections is 0, using 1");
            settings.max_connections = 1;
        }
        let strategy = strategy::for_mode(settings.mode, settings.accept_timeout);
        let slots = SlotPool::new(usize::from(settings.max_connections));

        Self {
            settings,
            factory,
            strategy,
            listener: None,
            slots,
            gate: PendingGate::new(),
            headers: Arc::new(DefaultHeaders::new()),
            running: false,
        }
    }

    /// Bind and listen. Calling `start` on a running server does nothing.
    ///
    /// The listen backlog equals the slot capacity.
    pub fn start(&mut self) -> Result<(), ListenerError> {
        if self.running {
            return Ok(());
        }

        let addr = SocketAddrV4::new(self.settings.bind_address, self.settings.port);
        let listener = ListeningSocket::bind(addr, u32::from(self.settings.max_connections))?;

        tracing::info!(
            address = %listener.local_addr(),
            max_connections = self.settings.max_connections,
            mode = ?self.strategy.mode(),
            "Server started"
        );

        self.listener = Some(Arc::new(listener));
        self.running = true;
        metrics::record_slots(self.slots.occupied(), self.slots.capacity());
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Add or replace a header sent with every response.
    ///
    /// Connections already admitted keep the headers they were given.
    pub fn set_default_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        Arc::make_mut(&mut self.headers).set(name, value);
    }

    pub fn default_headers(&self) -> &DefaultHeaders {
        &self.headers
    }

    /// The bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().map(|listener| listener.local_addr())
    }

    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    pub fn occupied_slots(&self) -> usize {
        self.slots.occupied()
    }

    /// Whether a client is waiting for a slot to free up.
    pub fn is_pending(&self) -> bool {
        self.gate.is_pending()
    }

    pub fn mode(&self) -> ConcurrencyMode {
        self.strategy.mode()
    }

    /// Run one manager round, spending at most about `budget`.
    ///
    /// Returns what is left of the budget. A stopped server sleeps through
    /// the whole budget and returns zero.
    pub async fn tick(&mut self, budget: Duration) -> Duration {
        if !self.running {
            tokio::time::sleep(budget).await;
            return Duration::ZERO;
        }
        let started = Instant::now();

        let mut free = self.reap();

        // A waiting client takes a freed slot before any new arrival.
        if self.gate.is_pending() {
            if let Some(idx) = free {
                self.admit(idx).await;
                free = self.slots.last_free();
            }
        }

        self.strategy.drive(&mut self.slots);

        let readiness = {
            let mut set = ReadinessSet::new();
            for (_, occupant) in self.slots.iter() {
                // Subscribe before checking so a transition in between still wakes us.
                set.watch_connection(occupant.lifecycle());
                if self.strategy.is_terminated(occupant) {
                    set.mark_ready();
                }
            }
            if !self.gate.is_pending() && !self.strategy.admission_in_flight(&self.slots) {
                if let Some(listener) = &self.listener {
                    set.watch_listener(listener);
                }
            }
            tracing::trace!(
                connections = set.connection_count(),
                listener = set.is_watching_listener(),
                "Waiting for readiness"
            );
            set.wait(budget.saturating_sub(started.elapsed())).await
        };

        if readiness.listener_readable() {
            match free {
                Some(idx) => self.admit(idx).await,
                None => self.mark_pending(),
            }
        }

        metrics::record_slots(self.slots.occupied(), self.slots.capacity());
        budget.saturating_sub(started.elapsed())
    }

    /// Tick until `shutdown` is triggered.
    ///
    /// The trigger is only checked between ticks, so an admission in
    /// progress (including a TLS handshake) is never cut short.
    pub async fn run_until(&mut self, shutdown: &Shutdown, budget: Duration) {
        while !shutdown.is_triggered() {
            self.tick(budget).await;
        }
        tracing::debug!("Shutdown requested, leaving tick loop");
    }

    /// Close every connection and release the listener.
    ///
    /// Sweeps all slots until each reports closed, pausing between sweeps.
    /// Connections still open when the drain deadline passes are released
    /// forcibly. Stopping a stopped server does nothing.
    pub async fn stop(&mut self) -> DrainReport {
        let mut report = DrainReport::default();
        if !self.running {
            return report;
        }
        self.running = false;
        tracing::info!(open = self.slots.occupied(), "Stopping server");

        let started = Instant::now();
        loop {
            let mut open = 0;
            for idx in 0..self.slots.capacity() {
                let Some(occupant) = self.slots.get_mut(idx) else {
                    continue;
                };
                if self.strategy.close(occupant) {
                    self.slots.take(idx);
                    report.closed += 1;
                } else {
                    open += 1;
                }
            }
            if open == 0 {
                break;
            }

            if self.settings.drain.expired(started.elapsed()) {
                for (idx, occupant) in self.slots.drain() {
                    tracing::warn!(
                        slot = idx,
                        connection_id = %occupant.id(),
                        "Drain deadline passed, releasing connection"
                    );
                    self.strategy.force_release(occupant);
                    report.forced += 1;
                }
                break;
            }
            tokio::time::sleep(self.settings.drain.pause).await;
        }

        self.gate.take();
        self.listener = None;
        metrics::record_pending(false);
        metrics::record_slots(0, self.slots.capacity());

        tracing::info!(
            closed = report.closed,
            forced = report.forced,
            "Server stopped"
        );
        report
    }

    /// Free every terminated slot and return the last free index.
    fn reap(&mut self) -> Option<usize> {
        let strategy = &self.strategy;
        let (reaped, free) = self.slots.reap(|occupant| strategy.is_terminated(occupant));
        for (idx, occupant) in reaped {
            tracing::debug!(slot = idx, connection_id = %occupant.id(), "Connection reaped");
            metrics::record_reaped();
        }
        free
    }

    async fn admit(&mut self, idx: usize) {
        match self.start_connection(idx).await {
            Ok(id) => {
                metrics::record_admission(Admission::Accepted);
                tracing::debug!(slot = idx, connection_id = %id, "Connection admitted");
            }
            Err(e) => {
                metrics::record_admission(Admission::Failed);
                tracing::warn!(slot = idx, error = %e, "Admission failed");
            }
        }
    }

    /// Start a connection in slot `idx`, clearing any pending client.
    async fn start_connection(&mut self, idx: usize) -> Result<ConnectionId, AdmissionError> {
        if let Some(client) = self.gate.take() {
            tracing::debug!(
                slot = idx,
                waited_ms = client.since.elapsed().as_millis() as u64,
                "Admitting pending client"
            );
        }
        metrics::record_pending(false);
        self.create_connection(idx).await
    }

    async fn create_connection(&mut self, idx: usize) -> Result<ConnectionId, AdmissionError> {
        let listener = self.listener.as_ref().ok_or(AdmissionError::NotListening)?;
        if !self.slots.is_free(idx) {
            return Err(SlotError::Occupied(idx).into());
        }

        let mut connection = self.factory.create();
        connection.initialize(Arc::clone(listener), Arc::clone(&self.headers));
        let id = connection.lifecycle().id();

        let occupant = self.strategy.activate(connection, self.gate.waiter()).await?;
        self.slots.insert(idx, occupant)?;
        Ok(id)
    }

    fn mark_pending(&mut self) {
        let client = PendingClient {
            since: Instant::now(),
        };
        if self.gate.publish(client) {
            metrics::record_pending(true);
            metrics::record_admission(Admission::Pending);
            tracing::debug!(
                occupied = self.slots.occupied(),
                "All slots busy, client pending"
            );
        }
    }
}

impl<F: ConnectionFactory> Drop for Server<F> {
    fn drop(&mut self) {
        if !self.running || self.slots.is_empty() {
            return;
        }
        tracing::warn!(
            open = self.slots.occupied(),
            "Server dropped while running, releasing connections"
        );
        for (_, mut occupant) in self.slots.drain() {
            if !self.strategy.close(&mut occupant) {
                self.strategy.force_release(occupant);
            }
        }
    }
}
