//! Connection manager subsystem.
//!
//! # Data Flow
//! ```text
//! Server::tick(budget)
//!     → reap terminated slots
//!     → pending client? take the freed slot first
//!     → strategy.drive (cooperative: step each connection)
//!     → ReadinessSet::wait (listener if admission open, lifecycles, timeout)
//!     → listener readable: free slot → admit, none → mark pending
//! ```
//!
//! # Design Decisions
//! - Strategy chosen once at construction from `ConcurrencyMode`
//! - Only the manager mutates slots; executors signal through lifecycles
//! - Shutdown drains under a deadline instead of waiting forever

pub mod manager;
pub mod strategy;

pub use manager::{Server, ServerSettings};
pub use strategy::{
    AdmissionError, CooperativeStepper, ExecutionStrategy, Occupant,
    TaskPerConnectionSupervisor,
};
