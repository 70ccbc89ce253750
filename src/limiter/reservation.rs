//! # Deferred admission.
//!
//! A [`Reservation`] holds tokens already taken from the bucket. It is
//! settled in one of three ways:
//! - [`wait`](Reservation::wait) completes: the tokens are spent;
//! - [`cancel`](Reservation::cancel) before `ready_at`: the tokens go back
//!   (capped at burst);
//! - dropped: the tokens stay spent.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use crate::context::Context;
use crate::error::Error;
use crate::limiter::bucket::Shared;

/// Tokens booked ahead of time by [`RateLimiter::reserve_n`](crate::RateLimiter::reserve_n).
pub struct Reservation {
    shared: Arc<Shared>,
    tokens: u32,
    ready_at: Instant,
    delay: Duration,
    settled: AtomicBool,
}

impl Reservation {
    pub(super) fn new(shared: Arc<Shared>, tokens: u32, ready_at: Instant, delay: Duration) -> Self {
        Self {
            shared,
            tokens,
            ready_at,
            delay,
            settled: AtomicBool::new(false),
        }
    }

    /// Delay from the moment of reservation until the tokens are usable.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Instant at which the tokens become usable.
    pub fn ready_at(&self) -> Instant {
        self.ready_at
    }

    /// Number of tokens booked.
    pub fn tokens(&self) -> u32 {
        self.tokens
    }

    /// Returns the booked tokens to the bucket.
    ///
    /// Idempotent. A no-op once `ready_at` is in the past or after a
    /// successful [`wait`](Self::wait).
    pub fn cancel(&self) {
        let now = Instant::now();
        if now > self.ready_at {
            return;
        }
        if self.settled.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut b = self.shared.refill(now);
        b.tokens = (b.tokens + f64::from(self.tokens)).min(f64::from(self.shared.burst));
        trace!(tokens = self.tokens, "limiter: reservation cancelled");
    }

    /// Sleeps until `ready_at`. If `ctx` fires first the reservation is
    /// cancelled and the context error returned.
    pub async fn wait(self, ctx: &Context) -> Result<(), Error> {
        match ctx.sleep_until(self.ready_at).await {
            Ok(()) => {
                self.settled.store(true, Ordering::Release);
                Ok(())
            }
            Err(err) => {
                self.cancel();
                Err(err.into())
            }
        }
    }
}

impl fmt::Debug for Reservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservation")
            .field("tokens", &self.tokens)
            .field("delay", &self.delay)
            .field("settled", &self.settled.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::context::Context;
    use crate::limiter::RateLimiter;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn delay_reflects_deficit() {
        let limiter = RateLimiter::new(2.0, 2).unwrap();
        let first = limiter.reserve_n(2).unwrap();
        assert_eq!(first.delay(), Duration::ZERO);

        let second = limiter.reserve().unwrap();
        assert_eq!(second.delay(), Duration::from_millis(500));
        assert_eq!(second.tokens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_restores_and_is_idempotent() {
        let limiter = RateLimiter::new(1.0, 2).unwrap();
        let r = limiter.reserve_n(2).unwrap();
        assert!(!limiter.allow());

        let pending = limiter.reserve().unwrap();
        pending.cancel();
        pending.cancel();
        r.cancel();
        assert_eq!(limiter.tokens(), 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_sleeps_until_ready() {
        let limiter = RateLimiter::new(4.0, 1).unwrap();
        assert!(limiter.allow());
        let r = limiter.reserve().unwrap();
        let ready_at = r.ready_at();
        r.wait(&Context::background()).await.unwrap();
        assert!(tokio::time::Instant::now() >= ready_at);
    }
}
