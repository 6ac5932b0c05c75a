//! Startup with retry.
//!
//! A port still held by a previous process makes `start` fail. The binary
//! retries with exponential backoff instead of exiting on the first error.

use std::time::Duration;

use rand::Rng;

use crate::config::StartupConfig;
use crate::net::connection::ConnectionFactory;
use crate::net::listener::ListenerError;
use crate::server::Server;

/// Calculate exponential backoff delay with jitter.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exponential = 2u64.saturating_pow(attempt - 1);
    let capped = base_ms.saturating_mul(exponential).min(max_ms);

    // Up to 10% jitter on top of the capped delay.
    let jitter_range = capped / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped + jitter)
}

/// Start `server`, retrying failed binds per `policy`.
///
/// Returns the last error once all attempts are used. A missing runtime is
/// not retried.
pub async fn start_with_retry<F: ConnectionFactory>(
    server: &mut Server<F>,
    policy: &StartupConfig,
) -> Result<(), ListenerError> {
    let attempts = policy.retry_attempts.max(1);
    let mut attempt = 1;
    loop {
        match server.start() {
            Ok(()) => return Ok(()),
            Err(ListenerError::NoRuntime) => return Err(ListenerError::NoRuntime),
            Err(e) if attempt >= attempts => {
                tracing::error!(attempt, error = %e, "Giving up starting server");
                return Err(e);
            }
            Err(e) => {
                let delay = calculate_backoff(attempt, policy.base_delay_ms, policy.max_delay_ms);
                tracing::warn!(
                    attempt,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Server start failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(calculate_backoff(0, 100, 2000), Duration::ZERO);

        let b1 = calculate_backoff(1, 100, 2000);
        assert!(b1.as_millis() >= 100 && b1.as_millis() < 110);

        let b2 = calculate_backoff(2, 100, 2000);
        assert!(b2.as_millis() >= 200);

        let max = calculate_backoff(10, 100, 1000);
        assert!(max.as_millis() >= 1000 && max.as_millis() < 1100);
    }

    #[test]
    fn backoff_survives_huge_attempts() {
        let delay = calculate_backoff(200, u64::MAX / 2, 5_000);
        assert!(delay.as_millis() >= 5_000);
    }
}
