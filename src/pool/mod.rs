//! # Worker pool.
//!
//! - [`WorkerPool`]: bounded priority queue drained by `min..=max` workers
//! - [`PoolConfig`]: bounds, scaling and submit mode
//! - [`JobHandle`]: future of a submitted job's result
//! - [`Priority`]: queue class (high before normal before low; low may starve)
//! - [`PoolStats`], [`ShutdownReport`]: observability

mod config;
mod job;
mod queue;
mod stats;
mod supervisor;
mod worker;

pub use config::PoolConfig;
pub use job::{JobHandle, Priority};
pub use stats::{PoolStats, ShutdownReport};
pub use supervisor::WorkerPool;
