//! # Worker pool configuration.
//!
//! ## Sentinel values
//! - `queue_depth = 0` → a single hand-off slot (clamped to 1)
//! - `high_watermark = 0` → scale up as soon as anything is queued

use std::sync::Arc;
use std::time::Duration;

use crate::error::Error;

/// Settings for a [`WorkerPool`](crate::WorkerPool).
///
/// ## Field semantics
/// - `min`: workers kept alive while the pool runs (`> 0`); spawned at startup
/// - `max`: upper bound on workers (`>= min`)
/// - `queue_depth`: queued (not yet running) jobs across all priorities
/// - `high_watermark`: queued jobs tolerated before another worker is added
/// - `idle_cooldown`: idle time after which a worker above `min` exits
/// - `scale_tick`: period of the scaling supervisor (`> 0`)
/// - `nonblocking`: `submit` fails with `QueueFull` instead of waiting
/// - `name`: label used in events and logs
#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub min: usize,
    pub max: usize,
    pub queue_depth: usize,
    pub high_watermark: usize,
    pub idle_cooldown: Duration,
    pub scale_tick: Duration,
    pub nonblocking: bool,
    pub name: Arc<str>,
}

impl Default for PoolConfig {
    /// `min = 1`, `max = 4`, `queue_depth = 64`, `high_watermark = 0`,
    /// `idle_cooldown = 1s`, `scale_tick = 10ms`, blocking submit.
    fn default() -> Self {
        Self {
            min: 1,
            max: 4,
            queue_depth: 64,
            high_watermark: 0,
            idle_cooldown: Duration::from_secs(1),
            scale_tick: Duration::from_millis(10),
            nonblocking: false,
            name: Arc::from("pool"),
        }
    }
}

impl PoolConfig {
    /// Config with the given bounds and defaults elsewhere.
    pub fn new(min: usize, max: usize, queue_depth: usize) -> Self {
        Self {
            min,
            max,
            queue_depth,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_high_watermark(mut self, n: usize) -> Self {
        self.high_watermark = n;
        self
    }

    #[must_use]
    pub fn with_idle_cooldown(mut self, d: Duration) -> Self {
        self.idle_cooldown = d;
        self
    }

    #[must_use]
    pub fn with_scale_tick(mut self, d: Duration) -> Self {
        self.scale_tick = d;
        self
    }

    #[must_use]
    pub fn with_nonblocking(mut self, nonblocking: bool) -> Self {
        self.nonblocking = nonblocking;
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Effective queue capacity (`queue_depth`, at least 1).
    #[inline]
    pub fn queue_capacity(&self) -> usize {
        self.queue_depth.max(1)
    }

    /// Checks the documented bounds.
    pub fn validate(&self) -> Result<(), Error> {
        if self.min == 0 {
            return Err(Error::invalid_config("pool min must be > 0"));
        }
        if self.max < self.min {
            return Err(Error::invalid_config(format!(
                "pool max ({}) must be >= min ({})",
                self.max, self.min
            )));
        }
        if self.scale_tick.is_zero() {
            return Err(Error::invalid_config("pool scale_tick must be > 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_are_enforced() {
        assert!(PoolConfig::new(1, 4, 8).validate().is_ok());
        assert!(PoolConfig::new(0, 4, 8).validate().is_err());
        assert!(PoolConfig::new(3, 2, 8).validate().is_err());
        assert!(PoolConfig::new(1, 1, 0)
            .with_scale_tick(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn zero_depth_is_a_single_slot() {
        assert_eq!(PoolConfig::new(1, 1, 0).queue_capacity(), 1);
        assert_eq!(PoolConfig::new(1, 1, 5).queue_capacity(), 5);
    }
}
