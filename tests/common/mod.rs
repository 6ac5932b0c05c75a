//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

use slotserve::net::connection::{ConnectionId, ConnectionState, Lifecycle};
use slotserve::net::listener::ListeningSocket;
use slotserve::pool::PendingWaiter;
use slotserve::{Connection, ConnectionFactory, ConcurrencyMode, DefaultHeaders, Server, ServerSettings};

/// What a connection saw when it accepted a client.
#[derive(Debug, Clone)]
pub struct Accepted {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    pub headers: DefaultHeaders,
}

/// How the first few accepts misbehave after taking the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Fault {
    #[default]
    None,
    /// The handshake fails with an error.
    Refuse,
    /// The handshake never completes.
    Stall,
}

/// A connection that accepts, records, and closes when the peer does.
///
/// A stubborn connection ignores every close request.
pub struct RecordingConnection {
    lifecycle: Lifecycle,
    endpoint: Option<Arc<ListeningSocket>>,
    headers: Arc<DefaultHeaders>,
    stream: Option<TcpStream>,
    stubborn: bool,
    fault: Fault,
    faults_left: Arc<AtomicUsize>,
    accept_delay: Duration,
    attempts: Arc<AtomicUsize>,
    log: Arc<Mutex<Vec<Accepted>>>,
}

impl RecordingConnection {
    fn finish(&mut self) {
        self.lifecycle.set(ConnectionState::Closing);
        self.stream = None;
        self.lifecycle.set(ConnectionState::Closed);
    }

    fn take_fault(&self) -> Fault {
        let claimed = self
            .faults_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        match claimed {
            Ok(_) => self.fault,
            Err(_) => Fault::None,
        }
    }
}

#[async_trait]
impl Connection for RecordingConnection {
    fn initialize(&mut self, endpoint: Arc<ListeningSocket>, headers: Arc<DefaultHeaders>) {
        self.endpoint = Some(endpoint);
        self.headers = headers;
    }

    async fn accept_connection(&mut self) -> std::io::Result<()> {
        let endpoint = self.endpoint.clone().expect("initialized before accept");
        let (stream, peer) = endpoint.accept().await?;
        self.attempts.fetch_add(1, Ordering::SeqCst);

        match self.take_fault() {
            Fault::None => {}
            Fault::Refuse => return Err(std::io::Error::other("handshake refused")),
            Fault::Stall => std::future::pending::<()>().await,
        }
        if !self.accept_delay.is_zero() {
            tokio::time::sleep(self.accept_delay).await;
        }

        self.stream = Some(stream);
        self.lifecycle.set(ConnectionState::Active);
        self.log.lock().unwrap().push(Accepted {
            id: self.lifecycle.id(),
            peer,
            headers: (*self.headers).clone(),
        });
        Ok(())
    }

    fn step(&mut self) {
        let Some(stream) = &self.stream else { return };
        let mut buf = [0u8; 64];
        match stream.try_read(&mut buf) {
            Ok(0) => self.finish(),
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(_) => self.finish(),
        }
    }

    async fn run_to_completion(&mut self, _pending: PendingWaiter) {
        let lifecycle = self.lifecycle.clone();
        let stubborn = self.stubborn;
        let Some(stream) = self.stream.as_mut() else { return };
        let mut buf = [0u8; 64];
        loop {
            tokio::select! {
                read = stream.read(&mut buf) => {
                    if matches!(read, Ok(0) | Err(_)) {
                        break;
                    }
                }
                _ = lifecycle.close_requested(), if !stubborn => break,
            }
        }
        self.finish();
    }

    fn close_connection(&mut self) {
        if self.stubborn || self.lifecycle.is_closed() {
            return;
        }
        self.finish();
    }

    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }
}

#[derive(Clone, Default)]
pub struct RecordingFactory {
    stubborn: bool,
    fault: Fault,
    faults_left: Arc<AtomicUsize>,
    accept_delay: Duration,
    attempts: Arc<AtomicUsize>,
    log: Arc<Mutex<Vec<Accepted>>>,
}

impl RecordingFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stubborn() -> Self {
        Self {
            stubborn: true,
            ..Self::default()
        }
    }

    /// The first `count` accepts take a client and then hit `fault`.
    pub fn faulty(fault: Fault, count: usize) -> Self {
        Self {
            fault,
            faults_left: Arc::new(AtomicUsize::new(count)),
            ..Self::default()
        }
    }

    /// Every handshake takes `delay` to complete.
    pub fn slow(delay: Duration) -> Self {
        Self {
            accept_delay: delay,
            ..Self::default()
        }
    }

    pub fn accepted(&self) -> Vec<Accepted> {
        self.log.lock().unwrap().clone()
    }

    /// Clients taken off the listener, whether or not admission succeeded.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl ConnectionFactory for RecordingFactory {
    type Connection = RecordingConnection;

    fn create(&self) -> RecordingConnection {
        RecordingConnection {
            lifecycle: Lifecycle::new(),
            endpoint: None,
            headers: Arc::new(DefaultHeaders::new()),
            stream: None,
            stubborn: self.stubborn,
            fault: self.fault,
            faults_left: Arc::clone(&self.faults_left),
            accept_delay: self.accept_delay,
            attempts: Arc::clone(&self.attempts),
            log: Arc::clone(&self.log),
        }
    }
}

/// Loopback settings on an ephemeral port.
pub fn loopback(max_connections: u8, mode: ConcurrencyMode) -> ServerSettings {
    ServerSettings::new(0, max_connections, Ipv4Addr::LOCALHOST).with_mode(mode)
}

/// A started loopback server on an ephemeral port.
pub fn started<F: ConnectionFactory>(max_connections: u8, mode: ConcurrencyMode, factory: F) -> Server<F> {
    started_with(loopback(max_connections, mode), factory)
}

pub fn started_with<F: ConnectionFactory>(settings: ServerSettings, factory: F) -> Server<F> {
    let mut server = Server::with_settings(settings, factory);
    server.start().unwrap();
    server
}

/// Tick until `done` holds, failing after `rounds` ticks.
pub async fn tick_until<F, P>(server: &mut Server<F>, rounds: usize, mut done: P)
where
    F: ConnectionFactory,
    P: FnMut(&Server<F>) -> bool,
{
    for _ in 0..rounds {
        if done(server) {
            return;
        }
        server.tick(Duration::from_millis(20)).await;
    }
    assert!(done(server), "condition not reached after {rounds} ticks");
}
