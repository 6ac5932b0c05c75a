//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection (held in the listen backlog)
//!     → listener.rs (readable? → manager decides: admit or mark pending)
//!     → connection.rs (Connection::accept_connection pulls it from the backlog)
//!     → tls.rs / tickets.rs (optional TLS handshake, ticket resumption)
//!     → readiness.rs (lifecycle changes wake the manager for reaping)
//!
//! Connection States:
//!     Accepting → Active → Closing → Closed → Terminated
//! ```
//!
//! # Design Decisions
//! - Backlog equals slot capacity; clients beyond it wait in the kernel
//! - The listener is only watched while admission is open
//! - TLS is optional and handled inside the connection

pub mod connection;
pub mod listener;
pub mod readiness;
pub mod tickets;
pub mod tls;

pub use connection::{Connection, ConnectionFactory, ConnectionId, ConnectionState, Lifecycle};
pub use listener::{ListenerError, ListeningSocket};
pub use readiness::{Readiness, ReadinessSet};
pub use tickets::SessionTickets;
