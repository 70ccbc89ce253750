//! Timing policies.
//!
//! The circuit breaker uses these to decide how long it stays open after
//! repeated failed probes.
//!
//! ## Contents
//! - [`BackoffPolicy`] how the open period grows (factor / cap + jitter)
//! - [`JitterPolicy`]  randomization so breakers sharing a dependency do
//!   not all probe at the same instant
//!
//! ## Defaults
//! - `BackoffPolicy::default()` → factor=1.0 (constant), max=60s, jitter=None,
//!   i.e. every open period is exactly the configured open timeout.

mod backoff;
mod jitter;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
