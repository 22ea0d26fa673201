//! Delay schedules used between provisioning attempts and between existence polls.
//!
//! Index `0` is the initial call and never waits; the first retry asks for `delay(1)`. All
//! arithmetic saturates at [`MAX_BACKOFF`].
//!
//! ```rust
//! use std::time::Duration;
//! use bucketwise::Backoff;
//!
//! let backoff = Backoff::exponential(Duration::from_secs(5))
//!     .with_max(Duration::from_secs(120))
//!     .unwrap();
//! assert_eq!(backoff.delay(0), Duration::ZERO);
//! assert_eq!(backoff.delay(1), Duration::from_secs(5));
//! assert_eq!(backoff.delay(3), Duration::from_secs(20));
//! assert_eq!(backoff.delay(10), Duration::from_secs(120));
//! ```

use std::time::Duration;

/// Upper bound for any computed delay (1 hour).
pub const MAX_BACKOFF: Duration = Duration::from_secs(60 * 60);

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackoffError {
    #[error("with_max is only valid for linear or exponential backoff")]
    CapNotSupported,
    #[error("max must be greater than zero")]
    MaxMustBePositive,
    #[error("max ({max:?}) must be >= base ({base:?})")]
    MaxLessThanBase { base: Duration, max: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Schedule {
    Constant(Duration),
    Linear { base: Duration, max: Option<Duration> },
    Exponential { base: Duration, max: Option<Duration> },
}

/// Delay schedule indexed by retry number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    schedule: Schedule,
}

impl Backoff {
    /// Retry immediately.
    pub fn none() -> Self {
        Self::constant(Duration::ZERO)
    }

    /// The same `delay` before every retry.
    pub fn constant(delay: Duration) -> Self {
        Self { schedule: Schedule::Constant(delay) }
    }

    /// `base * n` for retry `n`.
    pub fn linear(base: Duration) -> Self {
        Self { schedule: Schedule::Linear { base, max: None } }
    }

    /// `base * 2^(n-1)` for retry `n`.
    pub fn exponential(base: Duration) -> Self {
        Self { schedule: Schedule::Exponential { base, max: None } }
    }

    /// Cap a linear or exponential schedule.
    pub fn with_max(mut self, cap: Duration) -> Result<Self, BackoffError> {
        if cap.is_zero() {
            return Err(BackoffError::MaxMustBePositive);
        }
        match &mut self.schedule {
            Schedule::Constant(_) => Err(BackoffError::CapNotSupported),
            Schedule::Linear { base, max } | Schedule::Exponential { base, max } => {
                if cap < *base {
                    return Err(BackoffError::MaxLessThanBase { base: *base, max: cap });
                }
                *max = Some(cap);
                Ok(self)
            }
        }
    }

    /// Delay before retry number `attempt` (0 = initial call).
    pub fn delay(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = u32::try_from(attempt).unwrap_or(u32::MAX);
        let (raw, cap) = match self.schedule {
            Schedule::Constant(delay) => (delay, None),
            Schedule::Linear { base, max } => {
                (base.checked_mul(factor).unwrap_or(MAX_BACKOFF), max)
            }
            Schedule::Exponential { base, max } => {
                let exponent = (factor - 1).min(63);
                let nanos = base.as_nanos().saturating_mul(1u128 << exponent);
                let nanos = nanos.min(MAX_BACKOFF.as_nanos());
                (Duration::from_nanos(nanos as u64), max)
            }
        };
        cap.map_or(raw, |cap| raw.min(cap)).min(MAX_BACKOFF)
    }

    /// True when every retry happens immediately.
    pub fn is_immediate(&self) -> bool {
        matches!(self.schedule, Schedule::Constant(d) if d.is_zero())
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::none()
    }
}
