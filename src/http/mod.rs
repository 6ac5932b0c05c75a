//! HTTP layer subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted transport (TCP or TLS)
//!     → request.rs (find and parse request head)
//!     → response.rs (status line + default headers + body)
//!     → connection.rs (keep-alive, body discard, idle handling)
//! ```
//!
//! This is a deliberately small responder. The connection manager does not
//! depend on anything here except [`DefaultHeaders`]; any other
//! [`Connection`](crate::net::Connection) implementation can replace it.

pub mod connection;
pub mod headers;
pub mod request;
pub mod response;

pub use connection::{HttpConnection, HttpConnectionFactory, HttpSettings};
pub use headers::DefaultHeaders;
