//! # Growth policy for repeated open periods.
//!
//! [`BackoffPolicy`] scales a base duration (the breaker's open timeout)
//! by the number of consecutive re-opens:
//!
//! `delay(n) = min(base × factor^n, max(max, base))`, then jitter.
//!
//! The base is derived purely from `n`, so jitter output never feeds back
//! into later calculations.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use concur::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     factor: 2.0,
//!     max: Duration::from_secs(1),
//!     jitter: JitterPolicy::None,
//! };
//! let base = Duration::from_millis(100);
//!
//! assert_eq!(backoff.next(base, 0), Duration::from_millis(100));
//! assert_eq!(backoff.next(base, 1), Duration::from_millis(200));
//! assert_eq!(backoff.next(base, 10), Duration::from_secs(1));
//! ```

use std::time::Duration;

use crate::error::Error;
use crate::policies::jitter::JitterPolicy;

/// Exponential growth with a cap and optional jitter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Multiplicative growth factor (`>= 1.0`).
    pub factor: f64,
    /// Cap on the grown value. Never clamps below the base itself.
    pub max: Duration,
    /// Randomization applied after clamping.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// Returns a constant policy:
    /// - `factor = 1.0`;
    /// - `max = 60s`;
    /// - `jitter = None`.
    fn default() -> Self {
        Self {
            factor: 1.0,
            max: Duration::from_secs(60),
            jitter: JitterPolicy::None,
        }
    }
}

impl BackoffPolicy {
    /// Exponential policy without jitter.
    pub fn exponential(factor: f64, max: Duration) -> Self {
        Self {
            factor,
            max,
            jitter: JitterPolicy::None,
        }
    }

    /// Returns a copy with the given jitter.
    pub fn with_jitter(mut self, jitter: JitterPolicy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Rejects factors below 1.0 and non-finite factors.
    pub fn validate(&self) -> Result<(), Error> {
        if !self.factor.is_finite() || self.factor < 1.0 {
            return Err(Error::invalid_config(format!(
                "backoff factor must be finite and >= 1.0, got {}",
                self.factor
            )));
        }
        Ok(())
    }

    /// Computes the delay for the `attempt`-th growth step (0-indexed) of `base`.
    pub fn next(&self, base: Duration, attempt: u32) -> Duration {
        let cap = self.max.max(base);
        let exp = attempt.min(i32::MAX as u32) as i32;
        let grown = base.as_secs_f64() * self.factor.powi(exp);

        let clamped = if !grown.is_finite() || grown < 0.0 || grown > cap.as_secs_f64() {
            cap
        } else {
            Duration::from_secs_f64(grown)
        };
        self.jitter.apply(clamped)
    }
}
