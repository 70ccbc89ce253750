//! # Breaker state and counters.

use std::fmt;

/// Position in the closed → open → half-open cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BreakerState {
    /// Calls pass through; failures are counted.
    Closed,
    /// Calls are refused until the open period elapses.
    Open,
    /// One probe call is admitted to test recovery.
    HalfOpen,
}

impl BreakerState {
    /// Returns a short stable label (snake_case).
    pub fn as_label(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Snapshot of breaker counters.
///
/// Totals are cumulative over the breaker's life; the consecutive counters
/// are reset by the opposite outcome (and by a close or [`reset`](crate::CircuitBreaker::reset)).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    /// Calls admitted (the guarded function was invoked).
    pub requests: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    /// Calls refused with `CircuitOpen`.
    pub rejected: u64,
}

impl Counts {
    pub(crate) fn on_success(&mut self) {
        self.total_successes += 1;
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
    }

    pub(crate) fn on_failure(&mut self) {
        self.total_failures += 1;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
    }

    pub(crate) fn clear_streaks(&mut self) {
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
    }
}
