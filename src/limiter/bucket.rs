//! # Token bucket with on-demand refill.
//!
//! ```text
//! request(n) at `now`:
//!   lock ─► refill: tokens = min(burst, tokens + (now - last) × rate), last = now
//!        ├─ allow_n:   tokens >= n ? tokens -= n : refuse
//!        ├─ wait_n:    tokens >= n ? tokens -= n : sleep((n - tokens) / rate), retry
//!        └─ reserve_n: tokens -= n (may go negative), ready_at = now + deficit / rate
//!   unlock
//! ```
//!
//! ## Rules
//! - The `(tokens, last)` pair only changes under one mutex; the lock is never
//!   held across an `.await`.
//! - `last` never moves backwards, so refill is monotonic.
//! - Waits check the context before touching the bucket: a fired context
//!   consumes nothing.
//! - `wait` retries after sleeping and can be overtaken by `allow` callers;
//!   `strict_wait` books a place through a reservation and is FIFO among
//!   strict waiters.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use crate::context::Context;
use crate::error::Error;
use crate::limiter::{LimiterConfig, Reservation};

/// Longest delay the bucket reports. Slower refills wait this long and retry.
pub(crate) const MAX_DELAY: Duration = Duration::from_secs(86_400 * 365 * 30);

pub(super) struct Bucket {
    pub(super) tokens: f64,
    last: Instant,
}

pub(super) struct Shared {
    pub(super) rate: f64,
    pub(super) burst: u32,
    strict_fifo: bool,
    state: Mutex<Bucket>,
}

impl Shared {
    /// Locks the bucket and brings it up to date with `now`.
    pub(super) fn refill(&self, now: Instant) -> MutexGuard<'_, Bucket> {
        let mut b = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if now > b.last {
            let elapsed = now.duration_since(b.last).as_secs_f64();
            b.tokens = (b.tokens + elapsed * self.rate).min(f64::from(self.burst));
            b.last = now;
        }
        b
    }

    pub(super) fn deficit_delay(&self, deficit: f64) -> Duration {
        if deficit <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(deficit / self.rate)
            .map_or(MAX_DELAY, |delay| delay.min(MAX_DELAY))
    }
}

/// `now + delay`, shortening `delay` until the instant is representable.
fn saturating_deadline(now: Instant, mut delay: Duration) -> (Instant, Duration) {
    loop {
        if let Some(at) = now.checked_add(delay) {
            return (at, delay);
        }
        delay /= 2;
    }
}

/// Token-bucket rate limiter.
///
/// Cheap to clone; clones share the same bucket.
///
/// # Example
/// ```rust
/// use concur::RateLimiter;
///
/// # fn main() -> Result<(), concur::Error> {
/// let limiter = RateLimiter::new(2.0, 3)?;
/// assert!(limiter.allow());
/// assert!(limiter.allow());
/// assert!(limiter.allow());
/// assert!(!limiter.allow());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RateLimiter {
    shared: Arc<Shared>,
}

impl RateLimiter {
    /// Limiter refilling `rate` tokens per second up to `burst`, starting full.
    pub fn new(rate: f64, burst: u32) -> Result<Self, Error> {
        Self::from_config(LimiterConfig::new(rate, burst))
    }

    /// Limiter built from a validated config.
    pub fn from_config(cfg: LimiterConfig) -> Result<Self, Error> {
        cfg.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                rate: cfg.rate,
                burst: cfg.burst,
                strict_fifo: cfg.strict_fifo,
                state: Mutex::new(Bucket {
                    tokens: f64::from(cfg.burst),
                    last: Instant::now(),
                }),
            }),
        })
    }

    /// Refill rate in tokens per second.
    pub fn rate(&self) -> f64 {
        self.shared.rate
    }

    /// Bucket capacity.
    pub fn burst(&self) -> u32 {
        self.shared.burst
    }

    /// Current token estimate. Negative while strict reservations are pending.
    pub fn tokens(&self) -> f64 {
        self.shared.refill(Instant::now()).tokens
    }

    /// Takes one token if available right now.
    pub fn allow(&self) -> bool {
        self.allow_n(1)
    }

    /// Takes `n` tokens if all of them are available right now.
    pub fn allow_n(&self, n: u32) -> bool {
        let need = f64::from(n);
        let mut b = self.shared.refill(Instant::now());
        if b.tokens >= need {
            b.tokens -= need;
            true
        } else {
            false
        }
    }

    /// Waits for one token or until `ctx` fires.
    pub async fn wait(&self, ctx: &Context) -> Result<(), Error> {
        self.wait_n(ctx, 1).await
    }

    /// Waits for `n` tokens or until `ctx` fires.
    ///
    /// Fails with `InvalidConfig` when `n > burst`.
    pub async fn wait_n(&self, ctx: &Context, n: u32) -> Result<(), Error> {
        if self.shared.strict_fifo {
            return self.strict_wait_n(ctx, n).await;
        }
        self.check_n(n)?;
        let need = f64::from(n);
        loop {
            if let Some(err) = ctx.err() {
                return Err(err.into());
            }
            let delay = {
                let mut b = self.shared.refill(Instant::now());
                if b.tokens >= need {
                    b.tokens -= need;
                    return Ok(());
                }
                self.shared.deficit_delay(need - b.tokens)
            };
            trace!(?delay, n, "limiter: waiting for tokens");
            ctx.sleep(delay.max(Duration::from_millis(1))).await?;
        }
    }

    /// Waits for one token, queueing behind earlier strict waiters.
    pub async fn strict_wait(&self, ctx: &Context) -> Result<(), Error> {
        self.strict_wait_n(ctx, 1).await
    }

    /// Waits for `n` tokens, queueing behind earlier strict waiters.
    pub async fn strict_wait_n(&self, ctx: &Context, n: u32) -> Result<(), Error> {
        if let Some(err) = ctx.err() {
            return Err(err.into());
        }
        self.reserve_n(n)?.wait(ctx).await
    }

    /// Books one token; see [`reserve_n`](Self::reserve_n).
    pub fn reserve(&self) -> Result<Reservation, Error> {
        self.reserve_n(1)
    }

    /// Books `n` tokens now and reports when they become usable.
    ///
    /// The tokens are taken immediately (the bucket may go negative);
    /// [`Reservation::cancel`] gives them back.
    pub fn reserve_n(&self, n: u32) -> Result<Reservation, Error> {
        self.check_n(n)?;
        let need = f64::from(n);
        let now = Instant::now();
        let delay = {
            let mut b = self.shared.refill(now);
            b.tokens -= need;
            self.shared.deficit_delay(-b.tokens)
        };
        let (ready_at, delay) = saturating_deadline(now, delay);
        Ok(Reservation::new(Arc::clone(&self.shared), n, ready_at, delay))
    }

    fn check_n(&self, n: u32) -> Result<(), Error> {
        if n > self.shared.burst {
            return Err(Error::invalid_config(format!(
                "requested {n} tokens but burst is {}",
                self.shared.burst
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("rate", &self.shared.rate)
            .field("burst", &self.shared.burst)
            .field("strict_fifo", &self.shared.strict_fifo)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ContextError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn burst_then_refill() {
        let limiter = RateLimiter::new(2.0, 3).unwrap();
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(limiter.allow());
        assert!(!limiter.allow());
    }

    #[tokio::test(start_paused = true)]
    async fn tokens_never_exceed_burst() {
        let limiter = RateLimiter::new(100.0, 5).unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(limiter.tokens(), 5.0);
        assert!(limiter.allow_n(5));
        assert!(!limiter.allow());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_blocks_until_refill() {
        let limiter = RateLimiter::new(10.0, 1).unwrap();
        let ctx = Context::background();
        assert!(limiter.allow());

        let start = Instant::now();
        limiter.wait(&ctx).await.unwrap();
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(100), "waited {waited:?}");
        assert!(waited < Duration::from_millis(150), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_wait_consumes_nothing() {
        let limiter = RateLimiter::new(1.0, 1).unwrap();
        assert!(limiter.allow());

        let (ctx, _cancel) = Context::background().with_timeout(Duration::from_millis(300));
        let err = limiter.wait(&ctx).await.unwrap_err();
        assert_eq!(err.as_context(), Some(ContextError::DeadlineExceeded));

        tokio::time::sleep(Duration::from_millis(800)).await;
        assert!(limiter.allow());
    }

    #[tokio::test(start_paused = true)]
    async fn strict_wait_cancel_returns_tokens() {
        let limiter =
            RateLimiter::from_config(LimiterConfig::new(1.0, 1).with_strict_fifo(true)).unwrap();
        assert!(limiter.allow());

        let (ctx, cancel) = Context::background().with_cancel();
        cancel.cancel();
        assert!(limiter.wait(&ctx).await.is_err());

        let (ctx, _c) = Context::background().with_timeout(Duration::from_millis(200));
        assert!(limiter.strict_wait(&ctx).await.is_err());

        tokio::time::sleep(Duration::from_millis(900)).await;
        assert!(limiter.allow());
    }

    #[tokio::test(start_paused = true)]
    async fn strict_waiters_are_served_in_order() {
        let limiter = RateLimiter::new(10.0, 1).unwrap();
        assert!(limiter.allow());
        let order = Arc::new(Mutex::new(Vec::new()));
        let served = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..5 {
            let limiter = limiter.clone();
            let order = Arc::clone(&order);
            let served = Arc::clone(&served);
            handles.push(tokio::spawn(async move {
                limiter.strict_wait(&Context::background()).await.unwrap();
                order.lock().unwrap().push(i);
                served.fetch_add(1, Ordering::SeqCst);
            }));
            // give each waiter its reservation before the next one starts
            tokio::task::yield_now().await;
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(served.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn throughput_stays_within_burst_of_rate() {
        let limiter = RateLimiter::new(20.0, 5).unwrap();
        let ctx = Context::background();
        let start = Instant::now();
        let mut admitted = 0u32;
        while start.elapsed() < Duration::from_secs(2) {
            limiter.wait(&ctx).await.unwrap();
            admitted += 1;
        }
        // 20/s over 2s = 40, plus up to `burst` from the initial bucket.
        assert!((35..=46).contains(&admitted), "admitted {admitted}");
    }

    #[test]
    fn oversize_requests_are_rejected() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(async {
            let limiter = RateLimiter::new(1.0, 2).unwrap();
            assert!(matches!(
                limiter.reserve_n(3),
                Err(Error::InvalidConfig { .. })
            ));
            assert!(limiter
                .wait_n(&Context::background(), 3)
                .await
                .is_err());
        });
    }

    #[tokio::test(start_paused = true)]
    async fn tiny_rate_saturates_instead_of_overflowing() {
        let limiter = RateLimiter::new(1e-20, 1).unwrap();
        assert!(limiter.allow());

        let r = limiter.reserve().unwrap();
        assert_eq!(r.delay(), MAX_DELAY);
        assert!(r.ready_at() > Instant::now());
        r.cancel();

        let (ctx, _c) = Context::background().with_timeout(Duration::from_millis(50));
        let err = limiter.wait(&ctx).await.unwrap_err();
        assert_eq!(err.as_context(), Some(ContextError::DeadlineExceeded));

        let (ctx, _c) = Context::background().with_timeout(Duration::from_millis(50));
        let err = limiter.strict_wait(&ctx).await.unwrap_err();
        assert_eq!(err.as_context(), Some(ContextError::DeadlineExceeded));

        // the cancelled strict reservation gave its token back
        assert!(limiter.tokens() > -0.5);
    }

    #[tokio::test(start_paused = true)]
    async fn huge_burst_reservations_stay_bounded() {
        let limiter = RateLimiter::new(1.0, u32::MAX).unwrap();
        assert!(limiter.allow_n(u32::MAX));
        assert!(!limiter.allow());

        let r = limiter.reserve_n(u32::MAX).unwrap();
        assert_eq!(r.delay(), MAX_DELAY);
        r.cancel();

        let r = limiter.reserve_n(2).unwrap();
        assert_eq!(r.delay(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn requests_at_the_burst_edge() {
        let limiter = RateLimiter::new(4.0, 4).unwrap();
        let ctx = Context::background();
        limiter.wait_n(&ctx, 4).await.unwrap();

        let start = Instant::now();
        limiter.wait_n(&ctx, 4).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(1));

        assert!(limiter.reserve_n(5).is_err());
        assert!(matches!(
            limiter.wait_n(&ctx, 5).await,
            Err(Error::InvalidConfig { .. })
        ));
        assert!(matches!(
            limiter.strict_wait_n(&ctx, u32::MAX).await,
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[test]
    fn invalid_config_is_rejected() {
        assert!(RateLimiter::new(0.0, 1).is_err());
        assert!(RateLimiter::new(1.0, 0).is_err());
    }
}
