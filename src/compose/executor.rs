use std::future::Future;
use std::pin::Pin;
use std::task::{Context as TaskCx, Poll};
use std::time::Duration;

use crate::breaker::CircuitBreaker;
use crate::context::Context;
use crate::error::{BoxError, CallbackError, Error};
use crate::limiter::RateLimiter;
use crate::pool::{JobHandle, ShutdownReport, WorkerPool};

/// Worker pool whose jobs are rate limited and guarded by a circuit breaker.
///
/// Each submitted job, once a worker picks it up, waits for one limiter
/// token and then runs `f` through the breaker, all under the job's context.
///
/// # Example
/// ```rust
/// use std::time::Duration;
/// use concur::{
///     BreakerConfig, CircuitBreaker, Context, GuardedExecutor, PoolConfig, RateLimiter, WorkerPool,
/// };
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), concur::Error> {
/// let exec = GuardedExecutor::new(
///     WorkerPool::new(PoolConfig::new(1, 2, 8))?,
///     RateLimiter::new(100.0, 10)?,
///     CircuitBreaker::new(BreakerConfig::new(3, Duration::from_secs(5)))?,
/// );
/// let ctx = Context::background();
/// let job = exec.submit(&ctx, |_ctx| async { Ok::<_, concur::BoxError>("pong") }).await?;
/// assert_eq!(job.await?, "pong");
/// exec.shutdown(Duration::from_secs(1)).await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct GuardedExecutor {
    pool: WorkerPool,
    limiter: RateLimiter,
    breaker: CircuitBreaker,
}

impl GuardedExecutor {
    pub fn new(pool: WorkerPool, limiter: RateLimiter, breaker: CircuitBreaker) -> Self {
        Self {
            pool,
            limiter,
            breaker,
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Queues `f` on the pool (waiting for a slot under `ctx` unless the pool
    /// is nonblocking).
    ///
    /// The handle resolves with `f`'s value, or with the first error among:
    /// the context error, `CircuitOpen`, or `f`'s own failure.
    pub async fn submit<T, E, F, Fut>(&self, ctx: &Context, f: F) -> Result<GuardedHandle<T>, Error>
    where
        F: FnOnce(Context) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        let limiter = self.limiter.clone();
        let breaker = self.breaker.clone();
        let job = self
            .pool
            .submit(ctx, move |job_ctx: Context| async move {
                limiter.wait(&job_ctx).await?;
                breaker.call(&job_ctx, f).await
            })
            .await?;
        Ok(GuardedHandle { job })
    }

    /// Shuts the underlying pool down.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        self.pool.shutdown(grace).await
    }
}

/// Result of a [`GuardedExecutor::submit`]; resolves like a [`JobHandle`].
#[derive(Debug)]
pub struct GuardedHandle<T> {
    job: JobHandle<T>,
}

impl<T> GuardedHandle<T> {
    pub fn id(&self) -> u64 {
        self.job.id()
    }

    /// Waits for the result or until `ctx` fires.
    pub async fn wait(self, ctx: &Context) -> Result<T, Error> {
        ctx.run(self).await?
    }
}

impl<T> Future for GuardedHandle<T> {
    type Output = Result<T, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskCx<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.job).poll(cx).map(|res| res.map_err(unnest))
    }
}

/// The pool boxes the job's `Error` as a callback failure; unwrap it.
fn unnest(err: Error) -> Error {
    match err {
        Error::Callback(CallbackError::Failed(inner)) => match inner.downcast::<Error>() {
            Ok(inner) => *inner,
            Err(other) => Error::Callback(CallbackError::Failed(other)),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::{BreakerConfig, BreakerState};
    use crate::pool::PoolConfig;
    use tokio::time::Instant;

    fn executor(max: usize, rate: f64, burst: u32, threshold: u32) -> GuardedExecutor {
        GuardedExecutor::new(
            WorkerPool::new(PoolConfig::new(1, max, 16)).unwrap(),
            RateLimiter::new(rate, burst).unwrap(),
            CircuitBreaker::new(BreakerConfig::new(threshold, Duration::from_secs(10))).unwrap(),
        )
    }

    #[tokio::test]
    async fn job_value_passes_through() {
        let exec = executor(2, 1000.0, 10, 3);
        let ctx = Context::background();
        let job = exec
            .submit(&ctx, |_ctx| async { Ok::<_, BoxError>(7) })
            .await
            .unwrap();
        assert_eq!(job.await.unwrap(), 7);
        exec.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn open_breaker_surfaces_circuit_open() {
        let exec = executor(1, 1000.0, 10, 1);
        let ctx = Context::background();

        let first = exec
            .submit(&ctx, |_ctx| async { Err::<(), BoxError>("down".into()) })
            .await
            .unwrap();
        let err = first.await.unwrap_err();
        assert_eq!(err.as_label(), "callback_failed");
        assert_eq!(exec.breaker().state(), BreakerState::Open);

        let second = exec
            .submit(&ctx, |_ctx| async { Ok::<_, BoxError>(()) })
            .await
            .unwrap();
        assert!(matches!(second.await, Err(Error::CircuitOpen)));
        exec.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn limiter_paces_parallel_jobs() {
        let exec = executor(4, 10.0, 1, 10);
        let ctx = Context::background();
        let start = Instant::now();

        let mut jobs = Vec::new();
        for i in 0..3u32 {
            jobs.push(
                exec.submit(&ctx, move |_ctx| async move { Ok::<_, BoxError>(i) })
                    .await
                    .unwrap(),
            );
        }
        for job in jobs {
            job.await.unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(200));
        exec.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn unnest_keeps_foreign_errors() {
        let err = unnest(Error::Callback(CallbackError::failed("plain")));
        assert_eq!(err.as_label(), "callback_failed");
        assert!(matches!(
            unnest(Error::Callback(CallbackError::failed(Error::QueueFull))),
            Error::QueueFull
        ));
    }
}
