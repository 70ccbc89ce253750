//! # Rate limiter configuration.
//!
//! ## Bounds
//! - `rate > 0` (tokens per second, finite)
//! - `burst >= 1`
//!
//! Violations surface as [`Error::InvalidConfig`] from
//! [`RateLimiter::from_config`](crate::RateLimiter::from_config).

use crate::error::Error;

/// Token bucket settings.
#[derive(Clone, Debug, PartialEq)]
pub struct LimiterConfig {
    /// Refill rate in tokens per second.
    pub rate: f64,
    /// Bucket capacity; also the number of tokens available at start.
    pub burst: u32,
    /// When `true`, [`wait`](crate::RateLimiter::wait) queues behind earlier
    /// waiters instead of retrying (see [`strict_wait`](crate::RateLimiter::strict_wait)).
    pub strict_fifo: bool,
}

impl Default for LimiterConfig {
    /// `rate = 10/s`, `burst = 10`, non-strict.
    fn default() -> Self {
        Self {
            rate: 10.0,
            burst: 10,
            strict_fifo: false,
        }
    }
}

impl LimiterConfig {
    /// Config with the given rate and burst, non-strict.
    pub fn new(rate: f64, burst: u32) -> Self {
        Self {
            rate,
            burst,
            strict_fifo: false,
        }
    }

    #[must_use]
    pub fn with_strict_fifo(mut self, strict: bool) -> Self {
        self.strict_fifo = strict;
        self
    }

    /// Checks the documented bounds.
    pub fn validate(&self) -> Result<(), Error> {
        if !self.rate.is_finite() || self.rate <= 0.0 {
            return Err(Error::invalid_config(format!(
                "limiter rate must be > 0, got {}",
                self.rate
            )));
        }
        if self.burst < 1 {
            return Err(Error::invalid_config("limiter burst must be >= 1"));
        }
        Ok(())
    }
}
