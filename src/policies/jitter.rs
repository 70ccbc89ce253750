//! # Randomized delays.
//!
//! Spreads out retries that would otherwise fire in lockstep, such as
//! several breakers that opened at the same moment.
//!
//! - [`JitterPolicy::None`]: the delay as computed
//! - [`JitterPolicy::Full`]: uniform in `[0, d)`
//! - [`JitterPolicy::Equal`]: `d/2` plus uniform in `[0, d/2)`
//!
//! Scaling keeps nanosecond precision, so sub-millisecond delays jitter too.

use std::time::Duration;

use rand::Rng;

/// Randomization applied to a computed delay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JitterPolicy {
    /// Delay used unchanged (default).
    #[default]
    None,

    /// Anywhere between zero and the full delay.
    Full,

    /// At least half the delay; about three quarters on average.
    Equal,
}

impl JitterPolicy {
    /// Returns `delay` with this policy's randomization applied.
    pub fn apply(&self, delay: Duration) -> Duration {
        match self {
            JitterPolicy::None => delay,
            JitterPolicy::Full => scaled(delay),
            JitterPolicy::Equal => {
                let half = delay / 2;
                half + scaled(half)
            }
        }
    }
}

/// `delay * r` for a uniform `r` in `[0, 1)`.
fn scaled(delay: Duration) -> Duration {
    if delay.is_zero() {
        return Duration::ZERO;
    }
    delay.mul_f64(rand::rng().random::<f64>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_is_identity() {
        let d = Duration::from_millis(1234);
        assert_eq!(JitterPolicy::None.apply(d), d);
    }

    #[test]
    fn full_jitter_bounds() {
        let d = Duration::from_millis(1000);
        for _ in 0..200 {
            assert!(JitterPolicy::Full.apply(d) <= d);
        }
        assert_eq!(JitterPolicy::Full.apply(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn sub_millisecond_delays_stay_bounded() {
        let d = Duration::from_micros(800);
        for _ in 0..200 {
            let j = JitterPolicy::Equal.apply(d);
            assert!(j >= Duration::from_micros(400) && j <= d);
        }
    }

    #[test]
    fn equal_jitter_bounds() {
        let d = Duration::from_millis(1000);
        for _ in 0..200 {
            let j = JitterPolicy::Equal.apply(d);
            assert!(j >= Duration::from_millis(500) && j <= d);
        }
    }
}
