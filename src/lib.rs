//! # concur
//!
//! **Concur** is a set of concurrency primitives for async Rust, built on
//! Tokio: cancellation contexts, a token-bucket rate limiter, a circuit
//! breaker, an elastic worker pool, bounded pipelines and an in-process
//! pub/sub broker.
//!
//! Every blocking operation takes a [`Context`] and gives up as soon as it
//! is cancelled or its deadline passes. Every queue is bounded, so a slow
//! consumer slows its producer instead of growing memory.
//!
//! ## Architecture
//! ```text
//!                       ┌──────────────────────────────┐
//!                       │ Context (cancel / deadline / │
//!                       │ values), passed everywhere   │
//!                       └──────────────┬───────────────┘
//!        ┌───────────────┬─────────────┼─────────────┬────────────────┐
//!        ▼               ▼             ▼             ▼                ▼
//!  ┌───────────┐  ┌─────────────┐ ┌──────────┐ ┌──────────┐   ┌──────────────┐
//!  │RateLimiter│  │   Breaker   │ │WorkerPool│ │ Pipeline │   │    Broker    │
//!  │ (tokens)  │  │ (3 states)  │ │ (queue + │ │ (stages, │   │ (topics,     │
//!  └─────┬─────┘  └──────┬──────┘ │ workers) │ │ fan-out) │   │ subscribers) │
//!        │               │        └────┬─────┘ └──────────┘   └──────┬───────┘
//!        └───────────────┴─────┬───────┘                             │
//!                              ▼                                     │
//!                     GuardedExecutor ◄──────── serve_topic ─────────┘
//!
//!  WorkerPool / CircuitBreaker / Broker ──► Bus ──► ObserverSet ──► Observe impls
//! ```
//!
//! ## Features
//! | Area            | Description                                                    | Key types                                   |
//! |-----------------|----------------------------------------------------------------|---------------------------------------------|
//! | **Context**     | Cancellation, deadlines, request-scoped values.                | [`Context`], [`CancelHandle`]               |
//! | **Rate limit**  | Token bucket: non-blocking, waiting and reserving admission.   | [`RateLimiter`], [`Reservation`]            |
//! | **Breaker**     | Closed / open / half-open with a single probe.                 | [`CircuitBreaker`], [`BreakerConfig`]       |
//! | **Pool**        | Bounded queue, priorities, elastic workers, graceful shutdown. | [`WorkerPool`], [`JobHandle`]               |
//! | **Pipeline**    | Source, stages, ordered or unordered fan-out, fan-in, sink.    | [`Pipe`], [`pipeline`]                      |
//! | **Pub/Sub**     | Topics, filters, per-subscriber queues and overload policies.  | [`Broker`], [`Subscription`], [`Handler`]   |
//! | **Compose**     | Pool + limiter + breaker behind one `submit`.                  | [`GuardedExecutor`], [`serve_topic`]        |
//! | **Events**      | Lifecycle events and pluggable observers.                      | [`Bus`], [`Event`], [`Observe`]             |
//! | **Errors**      | One error taxonomy with stable labels.                         | [`Error`], [`CallbackError`]                |
//!
//! ## Optional features
//! - `logging` (default): exports [`LogWriter`], an observer that renders
//!   events as `tracing` records.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use concur::{BoxError, Context, PoolConfig, RateLimiter, WorkerPool};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), concur::Error> {
//!     let (ctx, _cancel) = Context::background().with_timeout(Duration::from_secs(5));
//!     let limiter = RateLimiter::new(50.0, 5)?;
//!     let pool = WorkerPool::new(PoolConfig::new(1, 4, 32))?;
//!
//!     let mut jobs = Vec::new();
//!     for n in 0..10u64 {
//!         limiter.wait(&ctx).await?;
//!         jobs.push(pool.submit(&ctx, move |_ctx| async move { Ok::<_, BoxError>(n * n) }).await?);
//!     }
//!     let mut total = 0;
//!     for job in jobs {
//!         total += job.await?;
//!     }
//!     assert_eq!(total, 285);
//!
//!     pool.shutdown(Duration::from_secs(1)).await;
//!     Ok(())
//! }
//! ```
mod breaker;
mod broker;
mod compose;
pub mod context;
mod error;
mod events;
mod limiter;
mod observers;
pub mod pipeline;
mod policies;
mod pool;

// ---- Public re-exports ----

pub use breaker::{BreakerConfig, BreakerState, CircuitBreaker, Counts};
pub use broker::{
    Broker, BrokerConfig, BrokerStats, DeliveryFailure, Handler, HandlerFn, Message,
    OverloadPolicy, PublishReport, SubscribeOptions, Subscription, SubscriptionStats,
};
pub use compose::{serve_topic, GuardedExecutor, GuardedHandle};
pub use context::{CancelHandle, Context, ContextError};
pub use error::{BoxError, CallbackError, Error};
pub use events::{Bus, Event, EventKind};
pub use limiter::{LimiterConfig, RateLimiter, Reservation};
pub use observers::{Observe, ObserverSet};
pub use pipeline::Pipe;
pub use policies::{BackoffPolicy, JitterPolicy};
pub use pool::{JobHandle, PoolConfig, PoolStats, Priority, ShutdownReport, WorkerPool};

// Optional: a built-in observer that logs events through `tracing`.
// Enabled by default with: `--features logging`
#[cfg(feature = "logging")]
pub use observers::LogWriter;
