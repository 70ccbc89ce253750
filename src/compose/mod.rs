//! # Composition of the primitives.
//!
//! ```text
//! serve_topic ──► Broker subscription ──► GuardedExecutor::submit
//!                                              │
//!                        WorkerPool job ◄──────┘
//!                          ├─► RateLimiter::wait(job ctx)
//!                          └─► CircuitBreaker::call(job ctx, f)
//! ```
//!
//! The subscriber callback only returns once its job has finished, so a
//! full pool queue slows the subscription and its overload policy decides
//! what happens upstream.

mod executor;
mod serve;

pub use executor::{GuardedExecutor, GuardedHandle};
pub use serve::serve_topic;
