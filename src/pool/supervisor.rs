//! # WorkerPool: bounded job queue, elastic workers, graceful shutdown.
//!
//! ```text
//! WorkerPool::new(cfg)
//!   ├─► spawn `min` workers
//!   └─► spawn scaler (every scale_tick: queued > high_watermark && workers < max → +1 worker)
//!
//! submit(ctx, f)
//!   ├─► queue slot (blocking under ctx, or QueueFull when nonblocking)
//!   ├─► push job, wake one worker
//!   ├─► eager scale-up (same rule as the scaler)
//!   └─► JobHandle (resolves with f's result)
//!
//! shutdown(grace)
//!   ├─► close queue: new submits → ShuttingDown
//!   ├─► resolve every queued job with Cancelled
//!   ├─► stop workers after their current job, stop scaler
//!   └─► wait up to grace:
//!          ├─ all joined → AllStoppedWithinGrace
//!          └─ timeout    → cancel running jobs' contexts → GraceExceeded → join
//! ```
//!
//! ## Rules
//! - Worker count stays within `[min, max]` while the pool runs; workers above
//!   `min` retire after `idle_cooldown` with an empty queue.
//! - The registry lock is never held across an `.await`.
//! - Dropping every `WorkerPool` clone stops the workers after their current
//!   job; queued jobs then resolve with `Cancelled`.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

use crate::context::{CancelHandle, Context};
use crate::error::{BoxError, Error};
use crate::events::{self, Bus, Event, EventKind};
use crate::pool::job::{FnJob, JobHandle, Priority};
use crate::pool::queue::{JobQueue, Queued};
use crate::pool::stats::{Counters, PoolStats, ShutdownReport};
use crate::pool::worker::Worker;
use crate::pool::PoolConfig;

/// Registry entry for one worker task.
#[derive(Default)]
struct WorkerSlot {
    join: Option<JoinHandle<()>>,
    /// Cancel handle of the job being run, if any.
    current: Option<CancelHandle>,
}

pub(crate) struct PoolShared {
    pub(crate) cfg: PoolConfig,
    pub(crate) queue: JobQueue,
    pub(crate) counters: Counters,
    pub(crate) stop: CancellationToken,
    workers: Mutex<HashMap<u64, WorkerSlot>>,
    scaler: Mutex<Option<JoinHandle<()>>>,
    bus: Option<Bus>,
    next_worker: AtomicU64,
    next_job: AtomicU64,
    closing: AtomicBool,
}

impl PoolShared {
    fn lock_workers(&self) -> MutexGuard<'_, HashMap<u64, WorkerSlot>> {
        self.workers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn emit(&self, kind: EventKind, build: impl FnOnce(Event) -> Event) {
        events::emit(&self.bus, || {
            build(Event::new(kind).with_component(Arc::clone(&self.cfg.name)))
        });
    }

    /// Adds one worker unless stopped or at `max`.
    fn spawn_worker(self: &Arc<Self>) -> bool {
        let id = {
            let mut workers = self.lock_workers();
            if self.stop.is_cancelled() || workers.len() >= self.cfg.max {
                return false;
            }
            let id = self.next_worker.fetch_add(1, Ordering::Relaxed);
            let join = tokio::spawn(Worker::new(id, Arc::clone(self)).run());
            workers.insert(
                id,
                WorkerSlot {
                    join: Some(join),
                    current: None,
                },
            );
            id
        };
        debug!(pool = %self.cfg.name, worker = id, "worker spawned");
        self.emit(EventKind::WorkerSpawned, |ev| ev.with_worker(id));
        true
    }

    fn scale_up_if_needed(self: &Arc<Self>) {
        if self.queue.len() > self.cfg.high_watermark {
            self.spawn_worker();
        }
    }

    /// Removes an idle worker if the pool stays at or above `min` without it.
    pub(crate) fn try_retire(&self, id: u64) -> bool {
        let mut workers = self.lock_workers();
        if self.stop.is_cancelled() || workers.len() <= self.cfg.min || !self.queue.is_empty() {
            return false;
        }
        workers.remove(&id).is_some()
    }

    pub(crate) fn worker_exited(&self, id: u64, reason: &'static str) {
        self.lock_workers().remove(&id);
        debug!(pool = %self.cfg.name, worker = id, reason, "worker retired");
        self.emit(EventKind::WorkerRetired, |ev| ev.with_worker(id).with_reason(reason));
    }

    pub(crate) fn set_current(&self, id: u64, cancel: Option<CancelHandle>) {
        if let Some(slot) = self.lock_workers().get_mut(&id) {
            slot.current = cancel;
        }
    }

    fn cancel_running(&self) -> usize {
        let workers = self.lock_workers();
        let mut n = 0;
        for slot in workers.values() {
            if let Some(cancel) = &slot.current {
                cancel.cancel();
                n += 1;
            }
        }
        n
    }

    async fn scale_loop(self: Arc<Self>) {
        let mut tick = tokio::time::interval(self.cfg.scale_tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.stop.cancelled() => break,
                _ = tick.tick() => self.scale_up_if_needed(),
            }
        }
    }
}

/// Elastic pool of worker tasks executing submitted jobs.
///
/// Cheap to clone; clones share the pool. Must be created inside a Tokio runtime.
///
/// # Example
/// ```rust
/// use concur::{Context, PoolConfig, WorkerPool};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), concur::Error> {
/// let pool = WorkerPool::new(PoolConfig::new(1, 4, 16))?;
/// let ctx = Context::background();
///
/// let job = pool.submit(&ctx, |_ctx| async { Ok::<_, concur::BoxError>(21 * 2) }).await?;
/// assert_eq!(job.await?, 42);
///
/// pool.shutdown(std::time::Duration::from_secs(1)).await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    _stop_on_drop: Arc<DropGuard>,
}

impl WorkerPool {
    /// Creates the pool and starts `min` workers plus the scaler.
    pub fn new(cfg: PoolConfig) -> Result<Self, Error> {
        Self::build(cfg, None)
    }

    /// Like [`new`](Self::new), publishing lifecycle events to `bus`.
    pub fn with_bus(cfg: PoolConfig, bus: Bus) -> Result<Self, Error> {
        Self::build(cfg, Some(bus))
    }

    fn build(cfg: PoolConfig, bus: Option<Bus>) -> Result<Self, Error> {
        cfg.validate()?;
        let stop = CancellationToken::new();
        let shared = Arc::new(PoolShared {
            queue: JobQueue::new(cfg.queue_capacity()),
            counters: Counters::default(),
            stop: stop.clone(),
            workers: Mutex::new(HashMap::with_capacity(cfg.max)),
            scaler: Mutex::new(None),
            bus,
            next_worker: AtomicU64::new(0),
            next_job: AtomicU64::new(0),
            closing: AtomicBool::new(false),
            cfg,
        });
        for _ in 0..shared.cfg.min {
            shared.spawn_worker();
        }
        let scaler = tokio::spawn(Arc::clone(&shared).scale_loop());
        *shared
            .scaler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(scaler);

        Ok(Self {
            shared,
            _stop_on_drop: Arc::new(stop.drop_guard()),
        })
    }

    /// The pool's configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.shared.cfg
    }

    /// Submits at normal priority.
    ///
    /// Waits for a queue slot under `ctx`, or fails with `QueueFull` right
    /// away when the pool is `nonblocking`.
    pub async fn submit<T, E, F, Fut>(&self, ctx: &Context, f: F) -> Result<JobHandle<T>, Error>
    where
        F: FnOnce(Context) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        self.enqueue(ctx, Priority::Normal, f, !self.shared.cfg.nonblocking)
            .await
    }

    /// Submits into the given priority class.
    pub async fn submit_with<T, E, F, Fut>(
        &self,
        ctx: &Context,
        priority: Priority,
        f: F,
    ) -> Result<JobHandle<T>, Error>
    where
        F: FnOnce(Context) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        self.enqueue(ctx, priority, f, !self.shared.cfg.nonblocking)
            .await
    }

    /// Submits at normal priority, failing with `QueueFull` instead of waiting.
    pub async fn try_submit<T, E, F, Fut>(&self, ctx: &Context, f: F) -> Result<JobHandle<T>, Error>
    where
        F: FnOnce(Context) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        self.enqueue(ctx, Priority::Normal, f, false).await
    }

    async fn enqueue<T, E, F, Fut>(
        &self,
        ctx: &Context,
        priority: Priority,
        f: F,
        blocking: bool,
    ) -> Result<JobHandle<T>, Error>
    where
        F: FnOnce(Context) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        let shared = &self.shared;
        let permit = if shared.closing.load(Ordering::Acquire) {
            Err(Error::ShuttingDown)
        } else if let Some(reason) = ctx.err() {
            Err(Error::from(reason))
        } else if blocking {
            shared.queue.reserve(ctx).await
        } else {
            shared.queue.try_reserve()
        };
        let permit = match permit {
            Ok(p) => p,
            Err(err) => {
                shared.counters.rejected();
                return Err(err);
            }
        };

        let id = shared.next_job.fetch_add(1, Ordering::Relaxed);
        let (job, rx) = FnJob::boxed(f);
        let entry = Queued {
            id,
            ctx: ctx.clone(),
            job,
            enqueued_at: Instant::now(),
            permit,
        };
        if shared.queue.push(priority, entry).is_err() {
            shared.counters.rejected();
            return Err(Error::ShuttingDown);
        }
        shared.counters.submitted();
        shared.scale_up_if_needed();
        Ok(JobHandle::new(id, rx))
    }

    /// Counter snapshot.
    pub fn stats(&self) -> PoolStats {
        let active = self.shared.lock_workers().len();
        self.shared
            .counters
            .snapshot(active, self.shared.queue.len())
    }

    /// `true` once [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.shared.closing.load(Ordering::Acquire)
    }

    /// Stops accepting work, cancels queued jobs and waits up to `grace`
    /// for running jobs before cancelling their contexts.
    ///
    /// Returns once every worker has exited. A second call returns
    /// immediately with an empty report.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        let shared = &self.shared;
        if shared.closing.swap(true, Ordering::AcqRel) {
            return ShutdownReport {
                within_grace: true,
                ..ShutdownReport::default()
            };
        }
        debug!(pool = %shared.cfg.name, ?grace, "pool shutdown requested");
        shared.emit(EventKind::ShutdownRequested, |ev| ev.with_duration(grace));

        let queued = shared.queue.close();
        let cancelled_queued = queued.len();
        for entry in queued {
            let id = entry.id;
            entry.job.reject(Error::Cancelled);
            shared.counters.dropped_from_queue();
            shared.emit(EventKind::JobCancelled, |ev| {
                ev.with_job(id).with_reason("pool shutting down")
            });
        }

        shared.stop.cancel();
        let mut joins: Vec<JoinHandle<()>> = shared
            .lock_workers()
            .values_mut()
            .filter_map(|slot| slot.join.take())
            .collect();
        if let Some(scaler) = shared
            .scaler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            joins.push(scaler);
        }

        let all = join_all(joins);
        tokio::pin!(all);
        let within_grace = tokio::time::timeout(grace, all.as_mut()).await.is_ok();
        let mut cancelled_running = 0;
        if within_grace {
            shared.emit(EventKind::AllStoppedWithinGrace, |ev| ev);
        } else {
            cancelled_running = shared.cancel_running();
            warn!(
                pool = %shared.cfg.name,
                ?grace,
                cancelled_running,
                "grace exceeded; cancelling running jobs"
            );
            shared.emit(EventKind::GraceExceeded, |ev| {
                ev.with_reason(format!("{cancelled_running} running jobs cancelled"))
            });
            all.await;
        }

        ShutdownReport {
            within_grace,
            cancelled_queued,
            cancelled_running,
        }
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.shared.cfg.name)
            .field("stats", &self.stats())
            .finish()
    }
}
