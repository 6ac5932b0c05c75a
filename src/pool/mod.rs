//! Fixed-capacity connection bookkeeping.
//!
//! # Data Flow
//! ```text
//! Listener readable
//!     → slots.rs (free index available?) ── yes ──→ activate into slot
//!                                          └─ no ──→ gate.rs (mark pending, notify executors)
//!
//! Next tick:
//!     reap terminated slots → pending client takes the freed index first
//! ```
//!
//! # Design Decisions
//! - Capacity is fixed at construction; nothing here allocates per connection
//! - At most one owner per slot index, enforced by `SlotPool::insert`
//! - At most one pending client system-wide, enforced by `PendingGate::publish`

pub mod gate;
pub mod slots;

pub use gate::{Mailbox, PendingClient, PendingGate, PendingWaiter};
pub use slots::{SlotError, SlotPool};
