//! # Circuit breaker configuration.

use std::sync::Arc;
use std::time::Duration;

use crate::error::Error;
use crate::policies::BackoffPolicy;

/// Breaker settings.
///
/// ## Field semantics
/// - `failure_threshold`: consecutive failures (from closed) that trip the breaker (`>= 1`)
/// - `open_timeout`: how long the breaker stays open before admitting a probe (`> 0`)
/// - `backoff`: growth of the open period on consecutive failed probes
///   (default constant: every open period equals `open_timeout`)
/// - `name`: label used in events and logs
#[derive(Clone, Debug)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub open_timeout: Duration,
    pub backoff: BackoffPolicy,
    pub name: Arc<str>,
}

impl Default for BreakerConfig {
    /// `failure_threshold = 5`, `open_timeout = 30s`, constant backoff, name `"breaker"`.
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(30),
            backoff: BackoffPolicy::default(),
            name: Arc::from("breaker"),
        }
    }
}

impl BreakerConfig {
    /// Config with the given threshold and open timeout.
    pub fn new(failure_threshold: u32, open_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            open_timeout,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Open period after the `reopens`-th consecutive failed probe (0 = first trip).
    pub(crate) fn open_period(&self, reopens: u32) -> Duration {
        self.backoff.next(self.open_timeout, reopens)
    }

    /// Checks the documented bounds.
    pub fn validate(&self) -> Result<(), Error> {
        if self.failure_threshold < 1 {
            return Err(Error::invalid_config("breaker failure_threshold must be >= 1"));
        }
        if self.open_timeout.is_zero() {
            return Err(Error::invalid_config("breaker open_timeout must be > 0"));
        }
        self.backoff.validate()
    }
}
