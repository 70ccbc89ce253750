//! # Circuit breaker.
//!
//! - [`CircuitBreaker`]: guards an async call with closed / open / half-open states
//! - [`BreakerConfig`]: threshold, open timeout, open-period growth
//! - [`BreakerState`], [`Counts`]: observable state

mod circuit;
mod config;
mod state;

pub use circuit::CircuitBreaker;
pub use config::BreakerConfig;
pub use state::{BreakerState, Counts};
