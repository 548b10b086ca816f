//! Delay schedules between backend retry attempts.
//!
//! Attempt index `0` is the initial call and never waits; retries start at `1`.
//! Computations that would overflow saturate to [`MAX_BACKOFF`].
//!
//! ```rust
//! use std::time::Duration;
//! use switchyard::backoff::Backoff;
//!
//! let backoff = Backoff::exponential(Duration::from_millis(100))
//!     .with_max(Duration::from_secs(2))
//!     .unwrap();
//! assert_eq!(backoff.delay(0), Duration::ZERO);
//! assert_eq!(backoff.delay(3), Duration::from_millis(400));
//! assert_eq!(backoff.delay(10), Duration::from_secs(2));
//! ```

use rand::{rng, Rng};
use std::time::Duration;

/// Upper bound for any computed delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Errors returned by backoff configuration.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BackoffError {
    /// `with_max` on a constant schedule.
    #[error("with_max is only valid for linear or exponential backoff")]
    ConstantDoesNotSupportMax,
    /// Cap below the base delay.
    #[error("max ({max:?}) must be >= base ({base:?})")]
    MaxLessThanBase {
        /// Base delay.
        base: Duration,
        /// Requested cap.
        max: Duration,
    },
}

/// Delay schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every retry.
    Constant(Duration),
    /// `base * attempt`, optionally capped.
    Linear {
        /// Step.
        base: Duration,
        /// Cap.
        max: Option<Duration>,
    },
    /// `base * 2^(attempt-1)`, optionally capped.
    Exponential {
        /// First retry delay.
        base: Duration,
        /// Cap.
        max: Option<Duration>,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential {
            base: Duration::from_millis(100),
            max: Some(Duration::from_secs(2)),
        }
    }
}

impl Backoff {
    /// Constant delay.
    pub fn constant(delay: Duration) -> Self {
        Backoff::Constant(delay)
    }

    /// Linear growth.
    pub fn linear(base: Duration) -> Self {
        Backoff::Linear { base, max: None }
    }

    /// Exponential growth.
    pub fn exponential(base: Duration) -> Self {
        Backoff::Exponential { base, max: None }
    }

    /// Cap a growing schedule.
    pub fn with_max(self, cap: Duration) -> Result<Self, BackoffError> {
        match self {
            Backoff::Constant(_) => Err(BackoffError::ConstantDoesNotSupportMax),
            Backoff::Linear { base, .. } | Backoff::Exponential { base, .. } if cap < base => {
                Err(BackoffError::MaxLessThanBase { base, max: cap })
            }
            Backoff::Linear { base, .. } => Ok(Backoff::Linear { base, max: Some(cap) }),
            Backoff::Exponential { base, .. } => Ok(Backoff::Exponential { base, max: Some(cap) }),
        }
    }

    /// Delay before `attempt` (0 = initial call).
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let (raw, max) = match self {
            Backoff::Constant(d) => (*d, None),
            Backoff::Linear { base, max } => (base.checked_mul(attempt).unwrap_or(MAX_BACKOFF), *max),
            Backoff::Exponential { base, max } => {
                let factor = 2u32.checked_pow(attempt - 1).unwrap_or(u32::MAX);
                (base.checked_mul(factor).unwrap_or(MAX_BACKOFF), *max)
            }
        };
        max.map_or(raw, |m| raw.min(m)).min(MAX_BACKOFF)
    }
}

/// Randomization applied on top of a backoff delay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Jitter {
    /// Exact delay.
    None,
    /// Uniform in `[0, delay]`.
    #[default]
    Full,
    /// Uniform in `[delay/2, delay]`.
    Equal,
}

impl Jitter {
    /// Apply jitter using the thread-local RNG.
    pub fn apply(&self, delay: Duration) -> Duration {
        self.apply_with_rng(delay, &mut rng())
    }

    /// Apply jitter with a caller-provided RNG.
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        match self {
            _ if millis == 0 => Duration::ZERO,
            Jitter::None => delay,
            Jitter::Full => Duration::from_millis(rng.random_range(0..=millis)),
            Jitter::Equal => Duration::from_millis(rng.random_range(millis / 2..=millis)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn exponential_doubles_until_cap() {
        let backoff = Backoff::exponential(Duration::from_millis(100))
            .with_max(Duration::from_millis(500))
            .unwrap();
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(200));
        assert_eq!(backoff.delay(3), Duration::from_millis(400));
        assert_eq!(backoff.delay(4), Duration::from_millis(500));
    }

    #[test]
    fn huge_attempts_saturate() {
        assert_eq!(Backoff::exponential(Duration::from_secs(1)).delay(500), MAX_BACKOFF);
        assert_eq!(Backoff::linear(Duration::from_secs(u64::MAX / 2)).delay(7), MAX_BACKOFF);
    }

    #[test]
    fn cap_validation() {
        assert_eq!(
            Backoff::constant(Duration::from_secs(1)).with_max(Duration::from_secs(2)),
            Err(BackoffError::ConstantDoesNotSupportMax)
        );
        assert!(matches!(
            Backoff::linear(Duration::from_secs(5)).with_max(Duration::from_secs(1)),
            Err(BackoffError::MaxLessThanBase { .. })
        ));
    }

    #[test]
    fn jitter_stays_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let delay = Duration::from_millis(200);
        for _ in 0..100 {
            let full = Jitter::Full.apply_with_rng(delay, &mut rng);
            assert!(full <= delay);
            let equal = Jitter::Equal.apply_with_rng(delay, &mut rng);
            assert!(equal >= Duration::from_millis(100) && equal <= delay);
        }
        assert_eq!(Jitter::None.apply(delay), delay);
        assert_eq!(Jitter::Full.apply(Duration::ZERO), Duration::ZERO);
    }
}
