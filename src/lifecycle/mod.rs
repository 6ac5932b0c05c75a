//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Bind listener → on failure back off and retry → running
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     Trigger observed by tick loop → Server::stop → drain under DrainPolicy
//! ```
//!
//! # Design Decisions
//! - Listener starts last, after headers and TLS are configured
//! - Drain has a deadline: connections still open are force-released

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{DrainPolicy, DrainReport, Shutdown};
pub use startup::start_with_retry;
