//! Fixed-capacity connection server.
//!
//! A single manager owns a listening socket and a fixed number of
//! connection slots. Each [`Server::tick`] reaps finished connections,
//! admits new clients into free slots and parks at most one client as
//! pending when all slots are busy. Connections are either stepped
//! cooperatively by the manager or run on their own tasks.

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod pool;
pub mod server;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::schema::{ConcurrencyMode, ServerConfig};
pub use http::{DefaultHeaders, HttpConnection, HttpConnectionFactory};
pub use lifecycle::Shutdown;
pub use net::connection::{Connection, ConnectionFactory};
pub use server::{Server, ServerSettings};
