//! # Type-erased jobs and their result handles.
//!
//! A submitted closure `F: FnOnce(Context) -> Fut` is boxed together with
//! the sending half of a oneshot channel into a [`Job`]; the caller keeps
//! the receiving half inside a [`JobHandle`].
//!
//! ```text
//! submit(f) ──► FnJob { f, tx } ──► queue ──► worker: job.run(ctx)
//!     │                                             │
//!     └──► JobHandle { rx } ◄──── tx.send(result) ◄─┘
//!                         ◄──── tx.send(Err(Cancelled))  (job.reject at shutdown)
//! ```
//!
//! The result slot is written exactly once: `run` and `reject` both consume
//! the job.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::task::{Context as TaskCx, Poll};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::oneshot;

use crate::context::Context;
use crate::error::{BoxError, CallbackError, ContextError, Error};

/// Queue class; higher classes are always served first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    /// Returns a short stable label (snake_case).
    pub fn as_label(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
        }
    }
}

/// How a job ended, as seen by the worker.
#[derive(Debug)]
pub(crate) enum JobOutcome {
    Completed,
    Failed(String),
    Cancelled(ContextError),
}

/// A queued unit of work with its result slot.
pub(crate) trait Job: Send + 'static {
    /// Runs the work under `ctx` and publishes the result.
    fn run(self: Box<Self>, ctx: Context) -> BoxFuture<'static, JobOutcome>;

    /// Publishes `err` without running the work.
    fn reject(self: Box<Self>, err: Error);
}

/// Closure-backed [`Job`].
pub(crate) struct FnJob<F, T> {
    f: F,
    tx: oneshot::Sender<Result<T, Error>>,
}

impl<F, T> FnJob<F, T> {
    pub(crate) fn boxed(f: F) -> (Box<Self>, oneshot::Receiver<Result<T, Error>>) {
        let (tx, rx) = oneshot::channel();
        (Box::new(Self { f, tx }), rx)
    }
}

impl<F, Fut, T, E> Job for FnJob<F, T>
where
    F: FnOnce(Context) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Into<BoxError> + Send + 'static,
{
    fn run(self: Box<Self>, ctx: Context) -> BoxFuture<'static, JobOutcome> {
        let FnJob { f, tx } = *self;
        Box::pin(async move {
            let job_ctx = ctx.clone();
            let work = async move { f(job_ctx).await };
            let (outcome, result) = match ctx.run(AssertUnwindSafe(work).catch_unwind()).await {
                Err(reason) => (JobOutcome::Cancelled(reason), Err(Error::from(reason))),
                Ok(Err(panic)) => {
                    let err = CallbackError::from_panic(panic);
                    (JobOutcome::Failed(err.to_string()), Err(Error::from(err)))
                }
                Ok(Ok(Err(e))) => {
                    let err = CallbackError::failed(e);
                    (JobOutcome::Failed(err.to_string()), Err(Error::from(err)))
                }
                Ok(Ok(Ok(v))) => (JobOutcome::Completed, Ok(v)),
            };
            // the caller may have dropped its handle
            let _ = tx.send(result);
            outcome
        })
    }

    fn reject(self: Box<Self>, err: Error) {
        let _ = self.tx.send(Err(err));
    }
}

/// Future resolving to a submitted job's result.
///
/// Dropping the handle abandons the result; the job still runs.
#[must_use = "a JobHandle does nothing unless awaited; dropping it discards the result"]
pub struct JobHandle<T> {
    id: u64,
    rx: oneshot::Receiver<Result<T, Error>>,
}

impl<T> JobHandle<T> {
    pub(crate) fn new(id: u64, rx: oneshot::Receiver<Result<T, Error>>) -> Self {
        Self { id, rx }
    }

    /// Pool-unique job id (matches the `job` field of pool events).
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Waits for the result, giving up when `ctx` fires.
    ///
    /// Giving up does not cancel the job.
    pub async fn wait(self, ctx: &Context) -> Result<T, Error> {
        ctx.run(self).await?
    }
}

impl<T> Future for JobHandle<T> {
    type Output = Result<T, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskCx<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(res)) => Poll::Ready(res),
            // slot dropped unwritten: the pool went away with the job still queued
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> fmt::Debug for JobHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_publishes_value() {
        let (job, rx) = FnJob::boxed(|_ctx: Context| async { Ok::<_, BoxError>(5) });
        let outcome = job.run(Context::background()).await;
        assert!(matches!(outcome, JobOutcome::Completed));
        assert_eq!(JobHandle::new(1, rx).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn panic_becomes_callback_error() {
        let (job, rx) = FnJob::boxed(|_ctx: Context| async {
            if true {
                panic!("job exploded");
            }
            Ok::<u8, BoxError>(0)
        });
        let outcome = job.run(Context::background()).await;
        assert!(matches!(outcome, JobOutcome::Failed(_)));
        let err = JobHandle::new(1, rx).await.unwrap_err();
        assert_eq!(err.as_label(), "callback_panicked");
    }

    #[tokio::test]
    async fn reject_resolves_handle() {
        let (job, rx) = FnJob::boxed(|_ctx: Context| async { Ok::<_, BoxError>(()) });
        job.reject(Error::Cancelled);
        assert!(matches!(JobHandle::new(1, rx).await, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn cancelled_context_interrupts_job() {
        let (ctx, cancel) = Context::background().with_cancel();
        let (job, rx) = FnJob::boxed(|_ctx: Context| async {
            futures::future::pending::<()>().await;
            Ok::<_, BoxError>(())
        });
        cancel.cancel();
        let outcome = job.run(ctx).await;
        assert!(matches!(outcome, JobOutcome::Cancelled(ContextError::Cancelled)));
        assert!(matches!(JobHandle::new(1, rx).await, Err(Error::Cancelled)));
    }

    #[test]
    fn priorities_order_high_first() {
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert_eq!(Priority::default(), Priority::Normal);
    }
}
