//! # Pool counters and snapshots.
//!
//! Counters are independent atomics: each field of a [`PoolStats`] snapshot
//! is exact, the snapshot as a whole is not a consistent cut.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::pool::job::JobOutcome;

/// Point-in-time view of a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Live worker tasks.
    pub active_workers: usize,
    /// Workers currently running a job.
    pub busy_workers: usize,
    /// Jobs waiting for a worker.
    pub queued: usize,
    /// Jobs accepted into the queue.
    pub submitted: u64,
    /// Jobs that returned `Ok`.
    pub completed: u64,
    /// Jobs that returned an error, panicked or were cancelled (queued or running).
    pub failed: u64,
    /// Submissions refused (`QueueFull`, `ShuttingDown`, context fired while waiting).
    pub rejected: u64,
    /// Mean run time of jobs that reached a worker.
    pub mean_job_time: Duration,
}

/// Outcome of [`WorkerPool::shutdown`](crate::WorkerPool::shutdown).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Every worker stopped before the grace period ran out.
    pub within_grace: bool,
    /// Queued jobs resolved with `Cancelled`.
    pub cancelled_queued: usize,
    /// Running jobs whose contexts were cancelled when grace ran out.
    pub cancelled_running: usize,
}

#[derive(Default)]
pub(crate) struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    busy: AtomicUsize,
    job_nanos: AtomicU64,
    timed_jobs: AtomicU64,
}

impl Counters {
    pub(crate) fn submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// A queued job that never ran.
    pub(crate) fn dropped_from_queue(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn job_started(&self) {
        self.busy.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn job_finished(&self, outcome: &JobOutcome, took: Duration) {
        self.busy.fetch_sub(1, Ordering::AcqRel);
        let nanos = u64::try_from(took.as_nanos()).unwrap_or(u64::MAX);
        self.job_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.timed_jobs.fetch_add(1, Ordering::Relaxed);
        match outcome {
            JobOutcome::Completed => self.completed.fetch_add(1, Ordering::Relaxed),
            JobOutcome::Failed(_) | JobOutcome::Cancelled(_) => {
                self.failed.fetch_add(1, Ordering::Relaxed)
            }
        };
    }

    pub(crate) fn snapshot(&self, active_workers: usize, queued: usize) -> PoolStats {
        let timed = self.timed_jobs.load(Ordering::Relaxed);
        let mean_job_time = if timed == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(self.job_nanos.load(Ordering::Relaxed) / timed)
        };
        PoolStats {
            active_workers,
            busy_workers: self.busy.load(Ordering::Acquire),
            queued,
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            mean_job_time,
        }
    }
}
