//! Listening socket with a backlog sized to the slot pool.
//!
//! # Responsibilities
//! - Create, bind, and listen on the configured IPv4 endpoint
//! - Report when a client is really waiting, holding at most one aside
//! - Accept a client on behalf of a connection
//! - Release the socket on drop

use std::io;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::{Mutex, PoisonError};

use thiserror::Error;
use tokio::io::unix::AsyncFd;
use tokio::net::{TcpSocket, TcpStream};

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// No tokio runtime to register the socket with.
    #[error("no async runtime available to register the listener")]
    NoRuntime,
    /// Failed to create the socket.
    #[error("failed to create socket: {0}")]
    Socket(#[source] io::Error),
    /// Failed to bind to address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddrV4,
        #[source]
        source: io::Error,
    },
    /// Failed to enter the listening state.
    #[error("failed to listen: {0}")]
    Listen(#[source] io::Error),
}

/// A bound TCP listener whose readiness can be observed before a slot is
/// assigned.
///
/// Confirming readiness takes one client off the backlog and holds it until
/// the next [`accept`](Self::accept). Any further clients stay queued in the
/// kernel.
#[derive(Debug)]
pub struct ListeningSocket {
    inner: AsyncFd<std::net::TcpListener>,
    local_addr: SocketAddr,
    held: Mutex<Option<(std::net::TcpStream, SocketAddr)>>,
}

impl ListeningSocket {
    /// Bind to `addr` and start listening with the given backlog.
    ///
    /// Must be called from within a tokio runtime. Every partially created
    /// resource is released when this returns an error.
    pub fn bind(addr: SocketAddrV4, backlog: u32) -> Result<Self, ListenerError> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(ListenerError::NoRuntime);
        }

        let socket = TcpSocket::new_v4().map_err(ListenerError::Socket)?;
        socket.set_reuseaddr(true).map_err(ListenerError::Socket)?;
        socket
            .bind(SocketAddr::V4(addr))
            .map_err(|source| ListenerError::Bind { addr, source })?;

        let listener = socket.listen(backlog).map_err(ListenerError::Listen)?;
        let std_listener = listener.into_std().map_err(ListenerError::Listen)?;
        std_listener
            .set_nonblocking(true)
            .map_err(ListenerError::Listen)?;
        let local_addr = std_listener.local_addr().map_err(ListenerError::Listen)?;
        let inner = AsyncFd::new(std_listener).map_err(ListenerError::Listen)?;

        tracing::info!(
            address = %local_addr,
            backlog,
            "Listener bound"
        );

        Ok(Self {
            inner,
            local_addr,
            held: Mutex::new(None),
        })
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait until a client is waiting. The client is held for the next
    /// [`accept`](Self::accept), so the wait never reports an empty backlog.
    ///
    /// Cancel-safe: a client taken off the backlog is stored before this
    /// returns.
    pub async fn readable(&self) -> io::Result<()> {
        loop {
            if self.is_holding() {
                return Ok(());
            }
            let mut guard = self.inner.readable().await?;
            // `try_io` clears stale readiness when the backlog turns out empty.
            match guard.try_io(|listener| listener.get_ref().accept()) {
                Ok(Ok(client)) => {
                    tracing::trace!(peer_addr = %client.1, "Client waiting");
                    *self.lock_held() = Some(client);
                    return Ok(());
                }
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => continue,
            }
        }
    }

    /// Whether a client has been taken off the backlog but not yet accepted.
    fn is_holding(&self) -> bool {
        self.lock_held().is_some()
    }

    /// Accept the next client, waiting for one if none is waiting.
    pub async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        loop {
            let held = self.lock_held().take();
            let (stream, peer_addr) = match held {
                Some(client) => client,
                None => {
                    let mut guard = self.inner.readable().await?;
                    match guard.try_io(|listener| listener.get_ref().accept()) {
                        Ok(result) => result?,
                        Err(_would_block) => continue,
                    }
                }
            };
            stream.set_nonblocking(true)?;
            let stream = TcpStream::from_std(stream)?;
            tracing::debug!(peer_addr = %peer_addr, "Client accepted");
            return Ok((stream, peer_addr));
        }
    }

    fn lock_held(&self) -> std::sync::MutexGuard<'_, Option<(std::net::TcpStream, SocketAddr)>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ListeningSocket {
    fn drop(&mut self) {
        tracing::debug!(address = %self.local_addr, "Listener released");
    }
}
