//! Retry delay schedules for batch redelivery.
//!
//! Attempt semantics: attempt `0` is the first send (no delay); retry `n` waits `delay(n)`.
//! Exponential delays double from `base` and saturate at the cap, or at `MAX_BACKOFF` when no
//! cap is set, so large attempt numbers never overflow.
//!
//! ```rust
//! use std::time::Duration;
//! use searchtrail::Backoff;
//!
//! let backoff = Backoff::exponential(Duration::from_millis(200))
//!     .with_max(Duration::from_secs(1))
//!     .unwrap();
//! assert_eq!(backoff.delay(0), Duration::ZERO);
//! assert_eq!(backoff.delay(1), Duration::from_millis(200));
//! assert_eq!(backoff.delay(3), Duration::from_millis(800));
//! assert_eq!(backoff.delay(4), Duration::from_secs(1)); // capped
//! ```

use std::time::Duration;

/// Upper bound for any computed delay (1 hour).
pub const MAX_BACKOFF: Duration = Duration::from_secs(60 * 60);

/// Invalid backoff cap.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BackoffError {
    #[error("with_max is only valid for exponential backoff")]
    ConstantDoesNotSupportMax,
    #[error("max must be greater than zero")]
    MaxMustBePositive,
    #[error("max ({max:?}) must be >= base ({base:?})")]
    MaxLessThanBase { base: Duration, max: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Schedule {
    Constant(Duration),
    Exponential { base: Duration, max: Option<Duration> },
}

/// Delay schedule between redelivery attempts of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    schedule: Schedule,
}

impl Backoff {
    /// Same delay before every retry.
    pub fn constant(delay: Duration) -> Self {
        Self { schedule: Schedule::Constant(delay) }
    }

    /// `base * 2^(attempt - 1)`, uncapped until `with_max`.
    pub fn exponential(base: Duration) -> Self {
        Self { schedule: Schedule::Exponential { base, max: None } }
    }

    /// Cap an exponential schedule. Errors on constant schedules, a zero cap, or `max < base`.
    pub fn with_max(mut self, max: Duration) -> Result<Self, BackoffError> {
        if max.is_zero() {
            return Err(BackoffError::MaxMustBePositive);
        }
        match &mut self.schedule {
            Schedule::Exponential { base, max: cap } => {
                if max < *base {
                    return Err(BackoffError::MaxLessThanBase { base: *base, max });
                }
                *cap = Some(max);
                Ok(self)
            }
            Schedule::Constant(_) => Err(BackoffError::ConstantDoesNotSupportMax),
        }
    }

    /// Delay before the given attempt (0 = first send, no delay).
    pub fn delay(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        match self.schedule {
            Schedule::Constant(delay) => delay.min(MAX_BACKOFF),
            Schedule::Exponential { base, max } => {
                let exponent = attempt.saturating_sub(1).min(u32::MAX as usize) as u32;
                let multiplier = 2u128.saturating_pow(exponent);
                let nanos = base.as_nanos().saturating_mul(multiplier).min(MAX_BACKOFF.as_nanos());
                let raw = Duration::from_nanos(nanos as u64);
                max.map(|m| raw.min(m)).unwrap_or(raw).min(MAX_BACKOFF)
            }
        }
    }

    /// Configured cap, if any.
    pub fn max(&self) -> Option<Duration> {
        match self.schedule {
            Schedule::Constant(_) => None,
            Schedule::Exponential { max, .. } => max,
        }
    }
}
