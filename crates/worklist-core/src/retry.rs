//! Bounded retry for device I/O.

use crate::error::{DriverError, DriverErrorKind, DriverResult};
use std::future::Future;
use std::time::Duration;

/// Fixed-backoff retry policy for transient transport failures.
///
/// Only `Communication` and `Timeout` errors are retried. A connection
/// failure or a device fault is returned at once. A transient error that is
/// still there after the last retry is returned as `Connection`, so the
/// adapter drops its connected flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Pause between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub const NONE: RetryPolicy = RetryPolicy {
        attempts: 1,
        backoff: Duration::ZERO,
    };

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, F, Fut>(&self, device: &str, operation: &str, mut op: F) -> DriverResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DriverResult<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < attempts && err.is_transient() =>
                {
                    tracing::debug!(
                        device,
                        operation,
                        attempt,
                        error = %err,
                        "Transient device error, retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(self.backoff).await;
                }
                Err(err) if attempt > 1 && err.is_transient() => {
                    tracing::warn!(device, operation, attempt, error = %err, "Giving up after retries");
                    return Err(DriverError::new(
                        err.device,
                        DriverErrorKind::Connection,
                        format!("{} failed after {} attempts: {}", operation, attempt, err.message),
                    ));
                }
                Err(err) => return Err(err),
            }
        }
    }
}
