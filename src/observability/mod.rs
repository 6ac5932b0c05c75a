//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! server, strategies, connections produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (slot gauges, admission counters)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Metric updates are no-ops until a recorder is installed
//! - Log level comes from config, overridable with `RUST_LOG`

pub mod logging;
pub mod metrics;
