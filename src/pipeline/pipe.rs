//! # Pipe: a stream backed by bounded stages.
//!
//! Every stage is a task. Each loop iteration first reserves a slot in its
//! output queue, then takes one input item, then runs the user function:
//!
//! ```text
//! source ──[cap₀]──► stage ──[cap₁]──► stage ──[cap₂]──► sink
//!   reserve slot → produce         reserve slot → recv → f(item) → send
//! ```
//!
//! ## Rules
//! - In-flight items never exceed the sum of the queue capacities.
//! - A stage returns when its input ends, its output receiver is gone, or
//!   the pipeline context fires; at most one user step completes after that.
//! - A stage error or panic cancels the pipeline context; the terminal
//!   operation joins every stage task and reports the first failure.
//! - Dropping a `Pipe` unwinds the chain: each stage sees its output closed.
//! - A zero capacity or branch count spawns nothing further and cancels the
//!   chain; the terminal operation reports `InvalidConfig`.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::context::{CancelHandle, Context};
use crate::error::{BoxError, CallbackError, Error};

pub(super) type StageTask = JoinHandle<Result<(), Error>>;

/// A lazily evaluated, bounded stream of `T` produced by concurrent stages.
///
/// Built with [`source`], [`from_iter`] or [`fan_in`](crate::pipeline::fan_in),
/// extended with [`stage`](Pipe::stage) / [`fan_out`](Pipe::fan_out), and
/// consumed with [`sink`](Pipe::sink) or [`collect`](Pipe::collect).
pub struct Pipe<T> {
    pub(super) rx: mpsc::Receiver<T>,
    pub(super) ctx: Context,
    pub(super) abort: CancelHandle,
    pub(super) cancels: Vec<CancelHandle>,
    pub(super) tasks: Vec<StageTask>,
    pub(super) misconfig: Option<String>,
}

/// `Some(reason)` when a pipeline bound is zero.
pub(super) fn zero_bound(what: &str, value: usize) -> Option<String> {
    (value == 0).then(|| format!("pipeline {what} must be >= 1, got 0"))
}

/// A stage that yields items from `producer` until it returns `None` or `ctx` fires.
///
/// The producer is only called once there is room downstream.
pub fn source<T, F, Fut>(ctx: &Context, capacity: usize, mut producer: F) -> Pipe<T>
where
    T: Send + 'static,
    F: FnMut(Context) -> Fut + Send + 'static,
    Fut: Future<Output = Option<T>> + Send + 'static,
{
    let (pctx, abort) = ctx.with_cancel();
    if let Some(reason) = zero_bound("capacity", capacity) {
        abort.cancel();
        let (_, rx) = mpsc::channel(1);
        return Pipe {
            rx,
            ctx: pctx,
            abort: abort.clone(),
            cancels: vec![abort],
            tasks: Vec::new(),
            misconfig: Some(reason),
        };
    }
    let (tx, rx) = mpsc::channel(capacity);
    let task_ctx = pctx.clone();
    let task_abort = abort.clone();

    let task = tokio::spawn(async move {
        loop {
            let Ok(Ok(permit)) = task_ctx.run(tx.reserve()).await else {
                return Ok(());
            };
            let next = AssertUnwindSafe(async { producer(task_ctx.clone()).await }).catch_unwind();
            match task_ctx.run(next).await {
                Err(_) | Ok(Ok(None)) => return Ok(()),
                Ok(Ok(Some(item))) => permit.send(item),
                Ok(Err(panic)) => {
                    task_abort.cancel();
                    return Err(CallbackError::from_panic(panic).into());
                }
            }
        }
    });

    Pipe {
        rx,
        ctx: pctx,
        abort: abort.clone(),
        cancels: vec![abort],
        tasks: vec![task],
        misconfig: None,
    }
}

/// A source yielding the items of `iter`.
pub fn from_iter<I>(ctx: &Context, capacity: usize, iter: I) -> Pipe<I::Item>
where
    I: IntoIterator,
    I::IntoIter: Send + 'static,
    I::Item: Send + 'static,
{
    let mut it = iter.into_iter();
    source(ctx, capacity, move |_ctx| std::future::ready(it.next()))
}

/// Stage loop shared by `stage`, `try_stage` and fan-out branches.
pub(super) async fn pump<T, U, E, F, Fut>(
    ctx: Context,
    abort: CancelHandle,
    mut rx: mpsc::Receiver<T>,
    tx: mpsc::Sender<U>,
    mut f: F,
) -> Result<(), Error>
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Result<U, E>>,
    E: Into<BoxError>,
{
    loop {
        let Ok(Ok(permit)) = ctx.run(tx.reserve()).await else {
            return Ok(());
        };
        let Ok(Some(item)) = ctx.run(rx.recv()).await else {
            return Ok(());
        };
        let step = AssertUnwindSafe(async { f(item).await }).catch_unwind();
        match ctx.run(step).await {
            Err(_) => return Ok(()),
            Ok(Ok(Ok(out))) => permit.send(out),
            Ok(Ok(Err(e))) => {
                abort.cancel();
                return Err(CallbackError::failed(e).into());
            }
            Ok(Err(panic)) => {
                abort.cancel();
                return Err(CallbackError::from_panic(panic).into());
            }
        }
    }
}

impl<T: Send + 'static> Pipe<T> {
    /// Applies `f` to every item, buffering up to `capacity` results.
    pub fn stage<U, F, Fut>(self, capacity: usize, mut f: F) -> Pipe<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = U> + Send + 'static,
    {
        self.try_stage(capacity, move |item| f(item).map(Ok::<U, BoxError>))
    }

    /// Like [`stage`](Self::stage), but an `Err` from `f` fails the whole pipeline.
    pub fn try_stage<U, E, F, Fut>(self, capacity: usize, f: F) -> Pipe<U>
    where
        U: Send + 'static,
        E: Into<BoxError> + Send + 'static,
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = Result<U, E>> + Send + 'static,
    {
        if self.misconfig.is_some() || capacity == 0 {
            return self.poisoned(zero_bound("capacity", capacity));
        }
        let Pipe {
            rx,
            ctx,
            abort,
            cancels,
            mut tasks,
            misconfig,
        } = self;
        let (tx, out_rx) = mpsc::channel(capacity);
        tasks.push(tokio::spawn(pump(ctx.clone(), abort.clone(), rx, tx, f)));
        Pipe {
            rx: out_rx,
            ctx,
            abort,
            cancels,
            tasks,
            misconfig,
        }
    }

    /// The pipeline's context (fires on cancellation or stage failure).
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Handle that cancels this pipeline.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.abort.clone()
    }

    /// Consumes every item with `f`; returns how many were consumed.
    ///
    /// Fails with the first stage failure, or with the context error if the
    /// pipeline was cancelled before its source ended.
    pub async fn sink<F, Fut>(self, mut f: F) -> Result<usize, Error>
    where
        F: FnMut(T) -> Fut,
        Fut: Future<Output = ()>,
    {
        let Pipe {
            mut rx,
            ctx,
            abort: _,
            cancels,
            tasks,
            misconfig,
        } = self;
        let mut consumed = 0usize;
        let mut failure = misconfig.map(Error::invalid_config);
        while failure.is_none() {
            let Ok(Some(item)) = ctx.run(rx.recv()).await else {
                break;
            };
            let step = AssertUnwindSafe(async { f(item).await }).catch_unwind();
            match ctx.run(step).await {
                Ok(Ok(())) => consumed += 1,
                Ok(Err(panic)) => failure = Some(Error::from(CallbackError::from_panic(panic))),
                Err(_) => break,
            }
        }
        drop(rx);
        finish(&ctx, &cancels, tasks, failure).await?;
        Ok(consumed)
    }

    /// Gathers every item into a `Vec`.
    pub async fn collect(self) -> Result<Vec<T>, Error> {
        let mut out = Vec::new();
        self.sink(|item| {
            out.push(item);
            std::future::ready(())
        })
        .await?;
        Ok(out)
    }
}

impl<T> Pipe<T> {
    /// Stops the chain here. Stages already running are cancelled and the
    /// terminal operation reports the first recorded bound violation.
    pub(super) fn poisoned<U>(self, reason: Option<String>) -> Pipe<U> {
        let Pipe {
            rx: _,
            ctx,
            abort,
            cancels,
            tasks,
            misconfig,
        } = self;
        cancels.iter().for_each(CancelHandle::cancel);
        let (_, rx) = mpsc::channel(1);
        Pipe {
            rx,
            ctx,
            abort,
            cancels,
            tasks,
            misconfig: misconfig.or(reason),
        }
    }
}

/// Joins every stage task and picks the outcome of the pipeline.
async fn finish(
    ctx: &Context,
    cancels: &[CancelHandle],
    tasks: Vec<StageTask>,
    failure: Option<Error>,
) -> Result<(), Error> {
    if failure.is_some() {
        cancels.iter().for_each(CancelHandle::cancel);
    }
    let mut first = failure;
    for task in tasks {
        let res = match task.await {
            Ok(res) => res,
            Err(join) => Err(CallbackError::Panicked(join.to_string()).into()),
        };
        if let Err(err) = res {
            if first.is_none() {
                cancels.iter().for_each(CancelHandle::cancel);
                first = Some(err);
            }
        }
    }
    if let Some(err) = first {
        debug!(error = %err, "pipeline failed");
        return Err(err);
    }
    match ctx.err() {
        Some(reason) => Err(reason.into()),
        None => Ok(()),
    }
}

impl<T> fmt::Debug for Pipe<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipe")
            .field("stages", &self.tasks.len())
            .field("cancelled", &self.ctx.is_done())
            .field("misconfig", &self.misconfig)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn stages_transform_in_order() {
        let ctx = Context::background();
        let out = from_iter(&ctx, 4, 1..=5)
            .stage(2, |x: i32| async move { x * 10 })
            .stage(2, |x: i32| async move { x + 1 })
            .collect()
            .await
            .unwrap();
        assert_eq!(out, vec![11, 21, 31, 41, 51]);
    }

    #[tokio::test]
    async fn stage_error_fails_pipeline() {
        let ctx = Context::background();
        let err = from_iter(&ctx, 4, 0..100)
            .try_stage(2, |x: i32| async move {
                if x == 3 {
                    Err("bad item")
                } else {
                    Ok(x)
                }
            })
            .collect()
            .await
            .unwrap_err();
        assert_eq!(err.as_label(), "callback_failed");
    }

    #[tokio::test]
    async fn stage_panic_fails_pipeline() {
        let ctx = Context::background();
        let err = from_iter(&ctx, 1, 0..10)
            .stage(1, |x: i32| async move {
                if x == 2 {
                    panic!("stage blew up");
                }
                x
            })
            .sink(|_| async {})
            .await
            .unwrap_err();
        assert_eq!(err.as_label(), "callback_panicked");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_sink_bounds_production() {
        let ctx = Context::background();
        let produced = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&produced);
        let mut n = 0u64;
        let pipe = source(&ctx, 2, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            n += 1;
            std::future::ready(Some(n))
        })
        .stage(3, |x| async move { x });

        let consumed = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&consumed);
        let sink = tokio::spawn(pipe.sink(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100))
        }));
        tokio::time::sleep(Duration::from_millis(1_050)).await;

        let consumed = consumed.load(Ordering::SeqCst);
        assert!(consumed >= 10);
        // queued in both connectors plus one item held by each of stage and sink
        assert!(produced.load(Ordering::SeqCst) <= consumed + 2 + 3 + 2);
        sink.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_source_context_ends_sink() {
        let (ctx, cancel) = Context::background().with_cancel();
        let mut n = 0u64;
        let pipe = source(&ctx, 2, move |_| {
            n += 1;
            std::future::ready(Some(n))
        });
        let consumed = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&consumed);
        let res = pipe
            .sink(|_| {
                if seen.fetch_add(1, Ordering::SeqCst) + 1 == 10 {
                    cancel.cancel();
                }
                std::future::ready(())
            })
            .await;
        assert!(matches!(res, Err(Error::Cancelled)));
        assert_eq!(consumed.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn zero_source_capacity_is_rejected() {
        let ctx = Context::background();
        let res = from_iter(&ctx, 0, 0..10).collect().await;
        assert!(matches!(res, Err(Error::InvalidConfig { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_stage_capacity_stops_the_chain() {
        let ctx = Context::background();
        let produced = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&produced);
        let pipe = source(&ctx, 2, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Some(1u8))
        })
        .stage(0, |x| async move { x })
        .stage(4, |x| async move { x });
        assert!(pipe.context().is_done());

        let err = pipe.sink(|_| async {}).await.unwrap_err();
        assert_eq!(err.as_label(), "invalid_config");
        // the source was joined; nothing keeps producing
        let after = produced.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(produced.load(Ordering::SeqCst), after);
    }
}
