//! Metrics collection and exposition.
//!
//! # Metrics
//! - `server_connection_slots_occupied` (gauge): slots holding a connection
//! - `server_connection_slots_capacity` (gauge): configured slot count
//! - `server_pending_client` (gauge): 1 while a client waits for a slot
//! - `server_admissions_total` (counter, labels: outcome): accepted, pending, failed
//! - `server_connections_reaped_total` (counter): terminated connections freed

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

pub const SLOTS_OCCUPIED: &str = "server_connection_slots_occupied";
pub const SLOTS_CAPACITY: &str = "server_connection_slots_capacity";
pub const PENDING_CLIENT: &str = "server_pending_client";
pub const ADMISSIONS_TOTAL: &str = "server_admissions_total";
pub const REAPED_TOTAL: &str = "server_connections_reaped_total";

/// Outcome label for [`record_admission`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    Pending,
    Failed,
}

impl Admission {
    pub fn as_str(self) -> &'static str {
        match self {
            Admission::Accepted => "accepted",
            Admission::Pending => "pending",
            Admission::Failed => "failed",
        }
    }
}

/// Install the Prometheus recorder and its scrape listener on `addr`.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Prometheus metrics endpoint listening");
    Ok(())
}

pub fn record_slots(occupied: usize, capacity: usize) {
    gauge!(SLOTS_OCCUPIED).set(occupied as f64);
    gauge!(SLOTS_CAPACITY).set(capacity as f64);
}

pub fn record_pending(pending: bool) {
    gauge!(PENDING_CLIENT).set(if pending { 1.0 } else { 0.0 });
}

pub fn record_admission(outcome: Admission) {
    counter!(ADMISSIONS_TOTAL, "outcome" => outcome.as_str()).increment(1);
}

pub fn record_reaped() {
    counter!(REAPED_TOTAL).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_labels() {
        assert_eq!(Admission::Accepted.as_str(), "accepted");
        assert_eq!(Admission::Pending.as_str(), "pending");
        assert_eq!(Admission::Failed.as_str(), "failed");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_slots(1, 4);
        record_pending(true);
        record_admission(Admission::Accepted);
        record_reaped();
    }
}
