//! # Worker loop.
//!
//! ```text
//! loop:
//!   stop fired?            → exit ("shutdown")
//!   register for queue.ready()
//!   queue.pop() = job      → execute(job), reset idle clock
//!   else select!:
//!     stop.cancelled()     → exit ("shutdown")
//!     queue.ready()        → retry
//!     idle_cooldown passed → try_retire(): above min and queue empty → exit ("idle")
//! ```
//!
//! ## Rules
//! - A job runs under a child of its submitter's context; the worker keeps
//!   the cancel handle so shutdown can interrupt it after the grace period.
//! - A job whose context fired while it was queued is resolved with the
//!   context error and never run.
//! - Panics are trapped inside the job; the worker survives them.

use std::sync::Arc;

use tokio::time::{sleep_until, Instant};
use tracing::trace;

use crate::error::Error;
use crate::events::EventKind;
use crate::pool::job::JobOutcome;
use crate::pool::queue::Queued;
use crate::pool::supervisor::PoolShared;

pub(crate) struct Worker {
    id: u64,
    shared: Arc<PoolShared>,
}

impl Worker {
    pub(crate) fn new(id: u64, shared: Arc<PoolShared>) -> Self {
        Self { id, shared }
    }

    pub(crate) async fn run(self) {
        let reason = self.serve().await;
        self.shared.worker_exited(self.id, reason);
    }

    async fn serve(&self) -> &'static str {
        let shared = &self.shared;
        let mut idle_since = Instant::now();
        loop {
            if shared.stop.is_cancelled() {
                return "shutdown";
            }
            let ready = shared.queue.ready();
            tokio::pin!(ready);
            ready.as_mut().enable();
            if let Some(entry) = shared.queue.pop() {
                self.execute(entry).await;
                idle_since = Instant::now();
                continue;
            }
            tokio::select! {
                biased;
                _ = shared.stop.cancelled() => return "shutdown",
                _ = &mut ready => {}
                _ = sleep_until(idle_since + shared.cfg.idle_cooldown) => {
                    if shared.try_retire(self.id) {
                        return "idle";
                    }
                    idle_since = Instant::now();
                }
            }
        }
    }

    async fn execute(&self, entry: Queued) {
        let shared = &self.shared;
        let Queued {
            id,
            ctx,
            job,
            enqueued_at,
            permit,
        } = entry;
        drop(permit);

        if let Some(reason) = ctx.err() {
            job.reject(Error::from(reason));
            shared.counters.dropped_from_queue();
            shared.emit(EventKind::JobCancelled, |ev| {
                ev.with_job(id).with_worker(self.id).with_reason(reason.as_label())
            });
            return;
        }

        let (job_ctx, cancel) = ctx.with_cancel();
        shared.set_current(self.id, Some(cancel));
        shared.counters.job_started();
        shared.emit(EventKind::JobStarted, |ev| ev.with_job(id).with_worker(self.id));
        trace!(worker = self.id, job = id, waited = ?enqueued_at.elapsed(), "job started");

        let started = Instant::now();
        let outcome = job.run(job_ctx).await;
        let took = started.elapsed();

        shared.set_current(self.id, None);
        shared.counters.job_finished(&outcome, took);
        match outcome {
            JobOutcome::Completed => shared.emit(EventKind::JobCompleted, |ev| {
                ev.with_job(id).with_worker(self.id).with_duration(took)
            }),
            JobOutcome::Failed(reason) => shared.emit(EventKind::JobFailed, |ev| {
                ev.with_job(id).with_worker(self.id).with_reason(reason)
            }),
            JobOutcome::Cancelled(reason) => shared.emit(EventKind::JobCancelled, |ev| {
                ev.with_job(id).with_worker(self.id).with_reason(reason.as_label())
            }),
        }
    }
}
