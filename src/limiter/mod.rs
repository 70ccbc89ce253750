//! # Token-bucket rate limiter.
//!
//! - [`RateLimiter`]: `allow`, `wait`, `strict_wait`, `reserve`
//! - [`LimiterConfig`]: rate, burst and FIFO mode
//! - [`Reservation`]: tokens booked ahead of time
//!
//! Refill is computed on access from the monotonic tokio clock; there is
//! no background task.

mod bucket;
mod config;
mod reservation;

pub use bucket::RateLimiter;
pub use config::LimiterConfig;
pub use reservation::Reservation;
