//! Randomization applied on top of a [`Backoff`](crate::Backoff) delay.
//!
//! - `None`: use the delay as computed. Deterministic; what the tests use.
//! - `Full`: uniform in `[0, delay]`.
//! - `Equal`: uniform in `[delay/2, delay]`, keeping a floor under the poll interval.
//!
//! RNG: `rand`'s thread-local generator by default; pass your own through `apply_with_rng`.

use rand::{rng, Rng};
use std::time::Duration;

/// Jitter strategy for retry and poll delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Jitter {
    /// No randomization.
    #[default]
    None,
    /// Uniform in `[0, delay]`.
    Full,
    /// Uniform in `[delay/2, delay]`.
    Equal,
}

impl Jitter {
    /// Full jitter; spreads retries from many callers the most.
    pub fn full() -> Self {
        Jitter::Full
    }

    /// Equal jitter; keeps at least half of the delay.
    pub fn equal() -> Self {
        Jitter::Equal
    }

    /// Jitter `delay` with the thread-local RNG.
    pub fn apply(&self, delay: Duration) -> Duration {
        self.apply_with_rng(delay, &mut rng())
    }

    /// Jitter `delay` with a caller-supplied RNG, for reproducible sequences.
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        let nanos = u64::try_from(delay.as_nanos()).unwrap_or(u64::MAX);
        match self {
            Jitter::None => delay,
            _ if nanos == 0 => Duration::ZERO,
            Jitter::Full => Duration::from_nanos(rng.random_range(0..=nanos)),
            Jitter::Equal => {
                let half = nanos / 2;
                Duration::from_nanos(half + rng.random_range(0..=nanos - half))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn none_is_identity() {
        assert_eq!(Jitter::None.apply(Duration::from_millis(250)), Duration::from_millis(250));
    }

    #[test]
    fn full_stays_within_delay() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let d = Jitter::full().apply_with_rng(Duration::from_millis(100), &mut rng);
            assert!(d <= Duration::from_millis(100));
        }
    }

    #[test]
    fn equal_keeps_half_floor() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..200 {
            let d = Jitter::equal().apply_with_rng(Duration::from_secs(5), &mut rng);
            assert!(d >= Duration::from_millis(2500));
            assert!(d <= Duration::from_secs(5));
        }
    }

    #[test]
    fn zero_delay_stays_zero() {
        assert_eq!(Jitter::Full.apply(Duration::ZERO), Duration::ZERO);
        assert_eq!(Jitter::Equal.apply(Duration::ZERO), Duration::ZERO);
    }
}
