//! Built-in HTTP/1.1 connection.
//!
//! # Responsibilities
//! - Accept one client from the listening endpoint (plain TCP or TLS)
//! - Answer each request with the default headers and a fixed body
//! - Support keep-alive, pipelining, and discarding request bodies
//! - Give up an idle keep-alive slot when a client is pending (task mode)
//!
//! Every protocol increment is one read, one write, or one flush. That keeps
//! `step()` and `run_to_completion()` on the same state machine, and lets
//! either drop an in-flight increment without losing data.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tokio_rustls::TlsAcceptor;

use crate::config::ServerConfig;
use crate::http::request::{head_len, parse_head};
use crate::http::response::{render, Status};
use crate::http::DefaultHeaders;
use crate::net::connection::{Connection, ConnectionFactory, ConnectionState, Lifecycle};
use crate::net::listener::ListeningSocket;
use crate::net::tickets::SessionTickets;
use crate::net::tls::{load_server_config, TlsError};
use crate::pool::{PendingClient, PendingWaiter};

const READ_CHUNK: usize = 1024;

/// Tag used for the session ticket context.
const TICKET_TAG: &str = "slotserve";

/// Byte stream a connection talks over once accepted.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// Responder settings shared by every connection from one factory.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    /// Body sent with every `200 OK`.
    pub response_body: Vec<u8>,
    /// Largest request head accepted before answering `431`.
    pub max_request_bytes: usize,
    /// Close after this long without progress.
    pub idle_timeout: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            response_body: b"OK\n".to_vec(),
            max_request_bytes: 4096,
            idle_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    ReadingHead,
    Discarding(usize),
    Writing { keep_alive: bool, discard: usize },
    Flushing { keep_alive: bool, discard: usize },
}

/// Result of one transport operation, acted on after the borrow ends.
enum Progress {
    Read(usize),
    Wrote(usize),
    Flushed,
    Eof,
    Failed(io::Error),
}

enum RunEvent {
    Progress,
    CloseRequested,
    YieldToPending(PendingClient),
    IdleTimeout,
}

/// A minimal HTTP/1.1 responder owning one client.
pub struct HttpConnection {
    lifecycle: Lifecycle,
    settings: Arc<HttpSettings>,
    tls: Option<TlsAcceptor>,
    endpoint: Option<Arc<ListeningSocket>>,
    headers: Arc<DefaultHeaders>,
    io: Option<Box<dyn Transport>>,
    peer_addr: Option<SocketAddr>,
    phase: Phase,
    inbound: Vec<u8>,
    outbound: Vec<u8>,
    written: usize,
    last_activity: Instant,
    requests: u64,
}

impl HttpConnection {
    pub fn new(settings: Arc<HttpSettings>, tls: Option<TlsAcceptor>) -> Self {
        Self {
            lifecycle: Lifecycle::new(),
            settings,
            tls,
            endpoint: None,
            headers: Arc::new(DefaultHeaders::new()),
            io: None,
            peer_addr: None,
            phase: Phase::ReadingHead,
            inbound: Vec::new(),
            outbound: Vec::new(),
            written: 0,
            last_activity: Instant::now(),
            requests: 0,
        }
    }

    /// Requests answered so far.
    pub fn requests(&self) -> u64 {
        self.requests
    }

    pub fn headers(&self) -> &DefaultHeaders {
        &self.headers
    }

    fn is_idle(&self) -> bool {
        self.phase == Phase::ReadingHead && self.inbound.is_empty()
    }

    fn idle_deadline(&self) -> Instant {
        self.last_activity + self.settings.idle_timeout
    }

    /// Perform one protocol increment.
    async fn advance(&mut self) {
        if self.lifecycle.is_closed() {
            return;
        }
        if Instant::now() >= self.idle_deadline() {
            tracing::debug!(connection_id = %self.lifecycle.id(), "Idle timeout");
            self.close_connection();
            return;
        }
        let Some(io) = self.io.as_mut() else {
            self.close_connection();
            return;
        };

        let progress = match self.phase {
            Phase::ReadingHead | Phase::Discarding(_) => {
                let mut chunk = [0u8; READ_CHUNK];
                match io.read(&mut chunk).await {
                    Ok(0) => Progress::Eof,
                    Ok(n) => {
                        self.inbound.extend_from_slice(&chunk[..n]);
                        Progress::Read(n)
                    }
                    Err(e) => Progress::Failed(e),
                }
            }
            Phase::Writing { .. } => match io.write(&self.outbound[self.written..]).await {
                Ok(0) => Progress::Eof,
                Ok(n) => Progress::Wrote(n),
                Err(e) => Progress::Failed(e),
            },
            Phase::Flushing { .. } => match io.flush().await {
                Ok(()) => Progress::Flushed,
                Err(e) => Progress::Failed(e),
            },
        };

        match progress {
            Progress::Read(_) => {
                self.last_activity = Instant::now();
                self.process_inbound();
            }
            Progress::Wrote(n) => {
                self.last_activity = Instant::now();
                self.written += n;
                if let Phase::Writing { keep_alive, discard } = self.phase {
                    if self.written >= self.outbound.len() {
                        self.phase = Phase::Flushing { keep_alive, discard };
                    }
                }
            }
            Progress::Flushed => self.finish_response(),
            Progress::Eof => {
                tracing::debug!(connection_id = %self.lifecycle.id(), "Peer closed connection");
                self.close_connection();
            }
            Progress::Failed(e) => {
                tracing::debug!(connection_id = %self.lifecycle.id(), error = %e, "Connection I/O failed");
                self.close_connection();
            }
        }
    }

    fn finish_response(&mut self) {
        let Phase::Flushing { keep_alive, discard } = self.phase else {
            return;
        };
        self.outbound.clear();
        self.written = 0;
        if !keep_alive {
            self.close_connection();
            return;
        }
        self.phase = if discard > 0 {
            Phase::Discarding(discard)
        } else {
            Phase::ReadingHead
        };
        self.process_inbound();
    }

    /// Consume buffered request bytes and queue a response if a head is complete.
    fn process_inbound(&mut self) {
        if let Phase::Discarding(remaining) = self.phase {
            let n = remaining.min(self.inbound.len());
            self.inbound.drain(..n);
            if remaining > n {
                self.phase = Phase::Discarding(remaining - n);
                return;
            }
            self.phase = Phase::ReadingHead;
        }
        if self.phase != Phase::ReadingHead {
            return;
        }

        match head_len(&self.inbound) {
            Some(len) => {
                let parsed = parse_head(&self.inbound[..len]);
                self.inbound.drain(..len);
                match parsed {
                    Ok(head) => {
                        self.requests += 1;
                        tracing::debug!(
                            connection_id = %self.lifecycle.id(),
                            method = %head.method,
                            target = %head.target,
                            "Request received"
                        );
                        let body = self.settings.response_body.as_slice();
                        self.queue(
                            render(Status::Ok, &self.headers, body, head.keep_alive, head.is_head()),
                            head.keep_alive,
                            head.content_length,
                        );
                    }
                    Err(e) => {
                        tracing::debug!(connection_id = %self.lifecycle.id(), error = ?e, "Malformed request");
                        self.queue(render(Status::BadRequest, &self.headers, b"", false, false), false, 0);
                    }
                }
            }
            None if self.inbound.len() > self.settings.max_request_bytes => {
                self.inbound.clear();
                self.queue(
                    render(Status::HeaderFieldsTooLarge, &self.headers, b"", false, false),
                    false,
                    0,
                );
            }
            None => {}
        }
    }

    fn queue(&mut self, response: Vec<u8>, keep_alive: bool, discard: usize) {
        self.outbound = response;
        self.written = 0;
        self.phase = Phase::Writing { keep_alive, discard };
    }
}

#[async_trait]
impl Connection for HttpConnection {
    fn initialize(&mut self, endpoint: Arc<ListeningSocket>, headers: Arc<DefaultHeaders>) {
        self.endpoint = Some(endpoint);
        self.headers = headers;
    }

    async fn accept_connection(&mut self) -> io::Result<()> {
        let endpoint = self
            .endpoint
            .clone()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "connection not initialized"))?;

        let (stream, peer_addr) = endpoint.accept().await?;
        stream.set_nodelay(true)?;

        let io: Box<dyn Transport> = match &self.tls {
            Some(acceptor) => Box::new(acceptor.accept(stream).await?),
            None => Box::new(stream),
        };

        self.io = Some(io);
        self.peer_addr = Some(peer_addr);
        self.last_activity = Instant::now();
        self.lifecycle.set(ConnectionState::Active);

        tracing::debug!(
            connection_id = %self.lifecycle.id(),
            peer_addr = %peer_addr,
            tls = self.tls.is_some(),
            "Connection active"
        );
        Ok(())
    }

    fn step(&mut self) {
        if self.lifecycle.is_closed() {
            return;
        }
        // Dropping a pending increment is safe: see module docs.
        let _ = self.advance().now_or_never();
    }

    async fn run_to_completion(&mut self, pending: PendingWaiter) {
        let lifecycle = self.lifecycle.clone();
        while !lifecycle.is_closed() {
            let idle = self.is_idle();
            let deadline = self.idle_deadline();
            let event = tokio::select! {
                _ = self.advance() => RunEvent::Progress,
                _ = lifecycle.close_requested() => RunEvent::CloseRequested,
                client = pending.claim(), if idle => RunEvent::YieldToPending(client),
                _ = tokio::time::sleep_until(deadline) => RunEvent::IdleTimeout,
            };

            match event {
                RunEvent::Progress => {}
                RunEvent::CloseRequested => self.close_connection(),
                RunEvent::YieldToPending(client) => {
                    tracing::debug!(
                        connection_id = %lifecycle.id(),
                        waited_ms = client.since.elapsed().as_millis() as u64,
                        "Yielding idle connection to pending client"
                    );
                    self.close_connection();
                }
                RunEvent::IdleTimeout => {
                    tracing::debug!(connection_id = %lifecycle.id(), "Idle timeout");
                    self.close_connection();
                }
            }
        }
    }

    fn close_connection(&mut self) {
        if self.lifecycle.is_closed() {
            return;
        }
        self.lifecycle.set(ConnectionState::Closing);
        if let Some(mut io) = self.io.take() {
            let _ = io.shutdown().now_or_never();
        }
        self.lifecycle.set(ConnectionState::Closed);
        tracing::debug!(
            connection_id = %self.lifecycle.id(),
            peer_addr = ?self.peer_addr,
            requests = self.requests,
            "Connection closed"
        );
    }

    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }
}

/// Creates [`HttpConnection`]s, optionally over TLS.
#[derive(Clone)]
pub struct HttpConnectionFactory {
    settings: Arc<HttpSettings>,
    tls: Option<TlsAcceptor>,
}

impl HttpConnectionFactory {
    pub fn new(settings: HttpSettings) -> Self {
        Self {
            settings: Arc::new(settings),
            tls: None,
        }
    }

    pub fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls = Some(acceptor);
        self
    }

    /// Build the factory from configuration, loading TLS material if configured.
    pub fn from_config(config: &ServerConfig) -> Result<Self, TlsError> {
        let settings = HttpSettings {
            response_body: config.http.response_body.clone().into_bytes(),
            max_request_bytes: config.http.max_request_bytes,
            idle_timeout: Duration::from_millis(config.timeouts.idle_ms),
        };
        let factory = Self::new(settings);

        let Some(tls) = &config.tls else {
            return Ok(factory);
        };

        let mut server_config = load_server_config(&tls.cert_path, &tls.key_path)?;
        server_config.alpn_protocols = vec![b"http/1.1".to_vec()];
        if tls.session_tickets {
            let tickets = SessionTickets::new(TICKET_TAG, tls.ticket_lifetime_secs);
            if !tickets.enable(&mut server_config) {
                tracing::warn!("TLS session tickets requested but unavailable");
            }
        }

        Ok(factory.with_tls(TlsAcceptor::from(Arc::new(server_config))))
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }
}

impl ConnectionFactory for HttpConnectionFactory {
    type Connection = HttpConnection;

    fn create(&self) -> HttpConnection {
        HttpConnection::new(Arc::clone(&self.settings), self.tls.clone())
    }
}
