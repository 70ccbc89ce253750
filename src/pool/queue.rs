//! # Bounded priority queue feeding the workers.
//!
//! ```text
//! submit ──► capacity.acquire() ──► lanes[priority].push_back ──► ready.notify_one()
//!                (FIFO-fair)                                            │
//! worker ◄── pop(): High, then Normal, then Low ◄───────────────────────┘
//!            (permit released on dequeue)
//! ```
//!
//! ## Rules
//! - Capacity counts queued jobs only; running jobs hold no permit.
//! - Blocked submitters are admitted in arrival order (tokio's semaphore is fair).
//! - Once closed, pushes are refused and the capacity semaphore is closed,
//!   so blocked submitters wake with `ShuttingDown`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::futures::Notified;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::time::Instant;

use crate::context::Context;
use crate::error::Error;
use crate::pool::job::{Job, Priority};

/// A job waiting for a worker.
pub(crate) struct Queued {
    pub(crate) id: u64,
    pub(crate) ctx: Context,
    pub(crate) job: Box<dyn Job>,
    pub(crate) enqueued_at: Instant,
    pub(crate) permit: OwnedSemaphorePermit,
}

#[derive(Default)]
struct Lanes {
    high: VecDeque<Queued>,
    normal: VecDeque<Queued>,
    low: VecDeque<Queued>,
    closed: bool,
}

impl Lanes {
    fn lane(&mut self, p: Priority) -> &mut VecDeque<Queued> {
        match p {
            Priority::High => &mut self.high,
            Priority::Normal => &mut self.normal,
            Priority::Low => &mut self.low,
        }
    }
}

pub(crate) struct JobQueue {
    lanes: Mutex<Lanes>,
    capacity: Arc<Semaphore>,
    ready: Notify,
    len: AtomicUsize,
}

impl JobQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            lanes: Mutex::new(Lanes::default()),
            capacity: Arc::new(Semaphore::new(capacity)),
            ready: Notify::new(),
            len: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Lanes> {
        self.lanes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Waits for a queue slot under `ctx`.
    pub(crate) async fn reserve(&self, ctx: &Context) -> Result<OwnedSemaphorePermit, Error> {
        let acquire = Arc::clone(&self.capacity).acquire_owned();
        match ctx.run(acquire).await? {
            Ok(permit) => Ok(permit),
            Err(_closed) => Err(Error::ShuttingDown),
        }
    }

    /// Takes a queue slot if one is free right now.
    pub(crate) fn try_reserve(&self) -> Result<OwnedSemaphorePermit, Error> {
        Arc::clone(&self.capacity)
            .try_acquire_owned()
            .map_err(|e| match e {
                TryAcquireError::NoPermits => Error::QueueFull,
                TryAcquireError::Closed => Error::ShuttingDown,
            })
    }

    /// Enqueues a job; gives it back if the queue is closed.
    pub(crate) fn push(&self, priority: Priority, entry: Queued) -> Result<(), Queued> {
        {
            let mut lanes = self.lock();
            if lanes.closed {
                return Err(entry);
            }
            lanes.lane(priority).push_back(entry);
            self.len.fetch_add(1, Ordering::AcqRel);
        }
        self.ready.notify_one();
        Ok(())
    }

    /// Dequeues the oldest job of the highest non-empty class.
    pub(crate) fn pop(&self) -> Option<Queued> {
        let mut lanes = self.lock();
        let entry = lanes
            .high
            .pop_front()
            .or_else(|| lanes.normal.pop_front())
            .or_else(|| lanes.low.pop_front())?;
        self.len.fetch_sub(1, Ordering::AcqRel);
        Some(entry)
    }

    /// Closes the queue and returns everything still queued, highest class first.
    pub(crate) fn close(&self) -> Vec<Queued> {
        self.capacity.close();
        let drained: Vec<Queued> = {
            let mut lanes = self.lock();
            lanes.closed = true;
            let mut out = Vec::with_capacity(lanes.high.len() + lanes.normal.len() + lanes.low.len());
            out.extend(lanes.high.drain(..));
            out.extend(lanes.normal.drain(..));
            out.extend(lanes.low.drain(..));
            self.len.store(0, Ordering::Release);
            out
        };
        self.ready.notify_waiters();
        drained
    }

    pub(crate) fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Future that resolves once a job may be available.
    ///
    /// Enable it before calling [`pop`](Self::pop) so a push landing in
    /// between is not missed. Dropping it after a wakeup passes the wakeup
    /// on to another worker.
    pub(crate) fn ready(&self) -> Notified<'_> {
        self.ready.notified()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::pool::job::FnJob;

    fn entry(q: &JobQueue, id: u64) -> Queued {
        let (job, _rx) = FnJob::boxed(|_ctx: Context| async { Ok::<_, BoxError>(()) });
        Queued {
            id,
            ctx: Context::background(),
            job,
            enqueued_at: Instant::now(),
            permit: q.try_reserve().unwrap(),
        }
    }

    #[tokio::test]
    async fn pops_by_class_then_fifo() {
        let q = JobQueue::new(8);
        assert!(q.push(Priority::Low, entry(&q, 1)).is_ok());
        assert!(q.push(Priority::Normal, entry(&q, 2)).is_ok());
        assert!(q.push(Priority::High, entry(&q, 3)).is_ok());
        assert!(q.push(Priority::Normal, entry(&q, 4)).is_ok());

        let order: Vec<u64> = std::iter::from_fn(|| q.pop()).map(|e| e.id).collect();
        assert_eq!(order, vec![3, 2, 4, 1]);
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn capacity_is_released_on_dequeue() {
        let q = JobQueue::new(1);
        assert!(q.push(Priority::Normal, entry(&q, 1)).is_ok());
        assert!(matches!(q.try_reserve(), Err(Error::QueueFull)));
        drop(q.pop());
        assert!(q.try_reserve().is_ok());
    }

    #[tokio::test]
    async fn close_drains_and_refuses() {
        let q = JobQueue::new(4);
        assert!(q.push(Priority::Normal, entry(&q, 1)).is_ok());
        let spare = entry(&q, 2);
        assert_eq!(q.close().len(), 1);
        assert!(q.push(Priority::Normal, spare).is_err());
        assert!(matches!(q.try_reserve(), Err(Error::ShuttingDown)));
        assert!(matches!(
            q.reserve(&Context::background()).await,
            Err(Error::ShuttingDown)
        ));
    }
}
