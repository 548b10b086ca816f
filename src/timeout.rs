//! Per-attempt deadline for backend calls.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Largest accepted timeout; longer values are clamped.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// The wrapped future did not finish in time. It has been dropped.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("operation timed out after {elapsed:?} (limit: {timeout:?})")]
pub struct TimeoutError {
    /// Time spent before giving up.
    pub elapsed: Duration,
    /// Configured limit.
    pub timeout: Duration,
}

/// Bounds a future by a deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    duration: Duration,
}

impl TimeoutPolicy {
    /// Timeout of `duration`, clamped to [`MAX_TIMEOUT`].
    pub fn new(duration: Duration) -> Self {
        Self { duration: duration.min(MAX_TIMEOUT) }
    }

    /// Configured limit.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Await `fut`, dropping it if the deadline passes first.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, TimeoutError> {
        let start = Instant::now();
        tokio::time::timeout(self.duration, fut)
            .await
            .map_err(|_| TimeoutError { elapsed: start.elapsed(), timeout: self.duration })
    }
}
