use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use concur::pipeline::{from_iter, source};
use concur::{
    BoxError, BreakerConfig, Broker, BrokerConfig, CircuitBreaker, Context, Error, HandlerFn,
    Message, OverloadPolicy, PoolConfig, RateLimiter, SubscribeOptions, WorkerPool,
};
use tracing_subscriber::EnvFilter;

/// Set `RUST_LOG=concur=debug` to see the crate's logs.
fn init_logs() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn limiter_burst_then_refill() {
    init_logs();
    let limiter = RateLimiter::new(2.0, 3).unwrap();

    let admitted: Vec<bool> = (0..4).map(|_| limiter.allow()).collect();
    assert_eq!(admitted, vec![true, true, true, false]);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(limiter.allow());
    assert!(!limiter.allow());
}

#[tokio::test(start_paused = true)]
async fn breaker_trips_and_reopens_after_failed_probe() {
    init_logs();
    let breaker = CircuitBreaker::new(BreakerConfig::new(3, Duration::from_millis(100))).unwrap();
    let ctx = Context::background();
    let invoked = Arc::new(AtomicUsize::new(0));

    let failing = || {
        let invoked = Arc::clone(&invoked);
        move |_ctx: Context| async move {
            invoked.fetch_add(1, Ordering::SeqCst);
            Err::<(), BoxError>("backend down".into())
        }
    };

    for _ in 0..3 {
        let err = breaker.call(&ctx, failing()).await.unwrap_err();
        assert_eq!(err.as_label(), "callback_failed");
    }
    assert!(matches!(breaker.call(&ctx, failing()).await, Err(Error::CircuitOpen)));
    assert_eq!(invoked.load(Ordering::SeqCst), 3);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let probe = breaker.call(&ctx, failing()).await.unwrap_err();
    assert_eq!(probe.as_label(), "callback_failed");
    assert_eq!(invoked.load(Ordering::SeqCst), 4);
    assert!(matches!(breaker.call(&ctx, failing()).await, Err(Error::CircuitOpen)));
}

#[tokio::test(start_paused = true)]
async fn pool_shutdown_cancels_queued_and_running() {
    init_logs();
    let pool = WorkerPool::new(PoolConfig::new(1, 4, 8)).unwrap();
    let ctx = Context::background();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let handle = pool
            .submit(&ctx, |job_ctx: Context| async move {
                job_ctx.sleep(Duration::from_millis(200)).await?;
                Ok::<_, Error>(())
            })
            .await
            .unwrap();
        handles.push(handle);
    }
    settle().await;
    assert_eq!(pool.stats().busy_workers, 4);

    let report = pool.shutdown(Duration::from_millis(100)).await;
    assert!(!report.within_grace);
    assert_eq!(report.cancelled_queued, 6);
    assert_eq!(report.cancelled_running, 4);

    for handle in handles {
        assert!(matches!(handle.await, Err(Error::Cancelled)));
    }
    let stats = pool.stats();
    assert_eq!(stats.completed + stats.failed, 10);
}

#[tokio::test]
async fn broker_drop_newest_backpressure() {
    init_logs();
    let broker: Broker<u32> = Broker::new(BrokerConfig::default()).unwrap();
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    let sub = broker
        .subscribe(
            "T",
            |_: &Message<u32>| true,
            HandlerFn::new(move |_ctx: Context, m: Arc<Message<u32>>| {
                let sink = Arc::clone(&sink);
                async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    sink.lock().unwrap().push(m.payload);
                    Ok::<_, BoxError>(())
                }
            }),
            SubscribeOptions::default()
                .with_queue_depth(2)
                .with_overload_policy(OverloadPolicy::DropNewest),
        )
        .unwrap();

    let ctx = Context::background();
    broker.publish(&ctx, "T", 1).await.unwrap();
    settle().await;
    let mut dropped = 0;
    for m in 2..=5 {
        dropped += broker.publish(&ctx, "T", m).await.unwrap().dropped;
    }
    assert!(broker.shutdown(Duration::from_secs(5)).await);

    let got = received.lock().unwrap().clone();
    assert_eq!(&got[..2], &[1, 2]);
    assert!(got.len() >= 3);
    assert!(got.windows(2).all(|w| w[0] < w[1]));
    assert!(dropped >= 2);
    assert_eq!(sub.stats().dropped as usize, dropped);
}

#[tokio::test]
async fn pipeline_cancel_stops_every_stage() {
    init_logs();
    let ctx = Context::background();
    let produced = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&produced);

    let pipe = source(&ctx, 4, move |_ctx| {
        let n = counter.fetch_add(1, Ordering::SeqCst) as u64;
        async move { Some(n) }
    })
    .stage(4, |x: u64| async move { x * x });
    let cancel = pipe.cancel_handle();

    let mut seen = Vec::new();
    let res = pipe
        .sink(|sq| {
            seen.push(sq);
            if seen.len() == 10 {
                cancel.cancel();
            }
            std::future::ready(())
        })
        .await;

    assert!(matches!(res, Err(Error::Cancelled)));
    assert_eq!(seen, (0..10u64).map(|x| x * x).collect::<Vec<_>>());
    assert!(produced.load(Ordering::SeqCst) <= 10 + 4 + 4 + 2);
}

#[tokio::test(start_paused = true)]
async fn ordered_fan_out_keeps_input_order() {
    init_logs();
    let ctx = Context::background();
    let out = from_iter(&ctx, 8, 1..=100u32)
        .fan_out(4, 4, true, |x| async move {
            tokio::time::sleep(Duration::from_millis(u64::from((100 - x) % 7))).await;
            x
        })
        .collect()
        .await
        .unwrap();
    assert_eq!(out, (1..=100).collect::<Vec<_>>());
}
