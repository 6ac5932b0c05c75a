//! Shutdown coordination and drain policy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Coordinator for graceful shutdown.
///
/// Cloned handles share one flag. The tick loop polls it between ticks.
#[derive(Debug, Clone)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Trigger the shutdown signal. Repeated triggers are no-ops.
    pub fn trigger(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            tracing::debug!("Shutdown triggered");
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// How long [`stop`](crate::server::Server::stop) waits for connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainPolicy {
    /// `None` waits until every connection has closed.
    pub deadline: Option<Duration>,
    /// Pause between close sweeps.
    pub pause: Duration,
}

impl DrainPolicy {
    pub fn bounded(deadline: Duration) -> Self {
        Self {
            deadline: Some(deadline),
            ..Self::default()
        }
    }

    pub fn unbounded() -> Self {
        Self {
            deadline: None,
            ..Self::default()
        }
    }

    pub fn expired(&self, elapsed: Duration) -> bool {
        self.deadline.is_some_and(|deadline| elapsed >= deadline)
    }
}

impl Default for DrainPolicy {
    fn default() -> Self {
        Self {
            deadline: Some(Duration::from_secs(5)),
            pause: Duration::from_millis(1),
        }
    }
}

/// Outcome of a drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Connections that reached a closed state on their own.
    pub closed: usize,
    /// Connections released at the deadline.
    pub forced: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_is_shared_across_clones() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_triggered());

        let handle = shutdown.clone();
        handle.trigger();
        handle.trigger();

        assert!(shutdown.is_triggered());
        assert!(!Shutdown::default().is_triggered());
    }

    #[test]
    fn drain_deadline() {
        let policy = DrainPolicy::bounded(Duration::from_millis(10));
        assert!(!policy.expired(Duration::from_millis(9)));
        assert!(policy.expired(Duration::from_millis(10)));
        assert!(!DrainPolicy::unbounded().expired(Duration::from_secs(3600)));
        assert_eq!(DrainPolicy::default().pause, Duration::from_millis(1));
    }
}
