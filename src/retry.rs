//! Retry loop for backend calls.
//!
//! Semantics:
//! - `max_attempts` counts total attempts (initial try + retries) and is at least 1.
//! - The caller's predicate decides whether an error is retryable; non-retryable errors
//!   return immediately.
//! - Backoff computes the delay per retry, jitter spreads it, the sleeper applies it.
//! - Exhaustion returns the last error.

use crate::backoff::{Backoff, Jitter};
use crate::sleeper::{Sleeper, TokioSleeper};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Retry schedule shared by every route; attempts are set per call.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
    jitter: Jitter,
    sleeper: Arc<dyn Sleeper>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::default(),
            jitter: Jitter::Full,
            sleeper: Arc::new(TokioSleeper),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, default backoff, full jitter, tokio sleeper.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total attempts; zero is treated as one.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set backoff schedule.
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set jitter strategy.
    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Provide a custom sleeper implementation.
    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Configured attempt budget.
    pub fn attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `operation` until it succeeds, fails non-retryably, or attempts run out.
    ///
    /// `operation` receives the 1-based attempt number.
    pub async fn execute<T, E, Fut, Op, P>(&self, mut operation: Op, should_retry: P) -> Result<T, E>
    where
        E: Display,
        Fut: Future<Output = Result<T, E>>,
        Op: FnMut(u32) -> Fut,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.max_attempts || !should_retry(&e) => return Err(e),
                Err(e) => {
                    let delay = self.jitter.apply(self.backoff.delay(attempt));
                    debug!(target: "switchyard::forward", attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying backend call");
                    self.sleeper.sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sleeper::{InstantSleeper, TrackingSleeper};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError(&'static str);

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "TestError: {}", self.0)
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let policy = RetryPolicy::new().max_attempts(3).with_sleeper(InstantSleeper);
        let calls = AtomicU32::new(0);
        let result = policy
            .execute(
                |attempt| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if attempt < 3 {
                            Err(TestError("refused"))
                        } else {
                            Ok(attempt)
                        }
                    }
                },
                |_| true,
            )
            .await;
        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_on_non_retryable_error() {
        let policy = RetryPolicy::new().max_attempts(5).with_sleeper(InstantSleeper);
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy
            .execute(
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(TestError("bad request")) }
                },
                |e: &TestError| e.0 != "bad request",
            )
            .await;
        assert_eq!(result, Err(TestError("bad request")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_returns_last_error_and_sleeps_between_attempts() {
        let sleeper = TrackingSleeper::new();
        let policy = RetryPolicy::new()
            .max_attempts(3)
            .backoff(Backoff::exponential(Duration::from_millis(100)))
            .with_jitter(Jitter::None)
            .with_sleeper(sleeper.clone());
        let result: Result<(), _> = policy
            .execute(|_| async { Err(TestError("down")) }, |_| true)
            .await;
        assert_eq!(result, Err(TestError("down")));
        assert_eq!(sleeper.calls(), vec![Duration::from_millis(100), Duration::from_millis(200)]);
    }

    #[test]
    fn zero_attempts_means_one() {
        assert_eq!(RetryPolicy::new().max_attempts(0).attempts(), 1);
    }
}
