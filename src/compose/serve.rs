use std::sync::Arc;

use async_trait::async_trait;

use crate::broker::{Broker, Handler, Message, SubscribeOptions, Subscription};
use crate::compose::GuardedExecutor;
use crate::context::Context;
use crate::error::{BoxError, Error};

/// Subscriber callback that turns every message into a guarded job.
struct GuardedHandler<H> {
    executor: GuardedExecutor,
    handler: Arc<H>,
}

#[async_trait]
impl<P, H> Handler<P> for GuardedHandler<H>
where
    P: Send + Sync + 'static,
    H: Handler<P>,
{
    async fn handle(&self, ctx: Context, msg: Arc<Message<P>>) -> Result<(), BoxError> {
        let handler = Arc::clone(&self.handler);
        let job = self
            .executor
            .submit(&ctx, move |job_ctx: Context| async move {
                handler.handle(job_ctx, msg).await
            })
            .await?;
        job.await?;
        Ok(())
    }
}

/// Subscribes `handler` to `topic` so each accepted message runs as a
/// [`GuardedExecutor`] job.
///
/// Job failures, including `CircuitOpen` and limiter waits cut short by
/// unsubscribe, are reported as ordinary callback failures of the
/// subscription.
pub fn serve_topic<P, F, H>(
    broker: &Broker<P>,
    topic: &str,
    filter: F,
    executor: GuardedExecutor,
    handler: H,
    opts: SubscribeOptions,
) -> Result<Subscription<P>, Error>
where
    P: Send + Sync + 'static,
    F: Fn(&Message<P>) -> bool + Send + Sync + 'static,
    H: Handler<P>,
{
    broker.subscribe(
        topic,
        filter,
        GuardedHandler {
            executor,
            handler: Arc::new(handler),
        },
        opts,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::{BreakerConfig, CircuitBreaker};
    use crate::broker::{BrokerConfig, HandlerFn};
    use crate::limiter::RateLimiter;
    use crate::pool::{PoolConfig, WorkerPool};
    use std::sync::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn messages_run_as_guarded_jobs() {
        let broker: Broker<u32> = Broker::new(BrokerConfig::default()).unwrap();
        let exec = GuardedExecutor::new(
            WorkerPool::new(PoolConfig::new(1, 2, 4)).unwrap(),
            RateLimiter::new(1000.0, 100).unwrap(),
            CircuitBreaker::new(BreakerConfig::new(100, Duration::from_secs(1))).unwrap(),
        );
        let seen: Arc<Mutex<Vec<u32>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let mut sub = serve_topic(
            &broker,
            "jobs",
            |m: &Message<u32>| m.payload != 3,
            exec.clone(),
            HandlerFn::new(move |_ctx: Context, m: Arc<Message<u32>>| {
                let sink = Arc::clone(&sink);
                async move {
                    if m.payload == 4 {
                        return Err::<(), BoxError>("four is unlucky".into());
                    }
                    sink.lock().unwrap().push(m.payload);
                    Ok(())
                }
            }),
            SubscribeOptions::default().with_error_channel(4),
        )
        .unwrap();
        let mut errors = sub.take_errors().unwrap();

        let ctx = Context::background();
        for i in 1..=5 {
            broker.publish(&ctx, "jobs", i).await.unwrap();
        }
        let failure = errors.recv().await.unwrap();
        assert_eq!(failure.message_id, 4);

        assert!(broker.shutdown(Duration::from_secs(1)).await);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 5]);
        assert_eq!(exec.breaker().counts().total_failures, 1);
        exec.shutdown(Duration::from_secs(1)).await;
        assert_eq!(exec.pool().stats().completed, 3);
    }
}
