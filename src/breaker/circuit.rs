//! # Circuit breaker.
//!
//! ```text
//!            failures ≥ threshold
//! Closed ─────────────────────────▶ Open
//!   ▲                                │
//!   │ probe succeeded                │ open period elapsed
//!   │                                ▼
//!   └──────────────────────────── HalfOpen
//!            probe failed → Open (timer restarts, period grows per backoff)
//!            probe interrupted by ctx → Open (timer kept)
//! ```
//!
//! ## Rules
//! - Admission and settlement each take the state lock once; the guarded
//!   function runs with the lock released.
//! - Every state change bumps `generation`. A call settles against the
//!   generation it was admitted under; stale results are ignored.
//! - Half-open admits exactly one probe; concurrent callers get `CircuitOpen`.
//! - Context errors are neutral: they neither count as failures nor reset
//!   the consecutive failure counter.
//! - Panics in the guarded function are failures and surface as
//!   `CallbackError::Panicked`.
//! - A call future dropped mid-flight settles as neutral.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::FutureExt;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::breaker::{BreakerConfig, BreakerState, Counts};
use crate::context::Context;
use crate::error::{BoxError, CallbackError, Error};
use crate::events::{emit, Bus, Event, EventKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
    Neutral,
}

/// State change to announce once the lock is released.
#[derive(Clone, Copy, Debug)]
enum Transition {
    Opened { period: Duration, probe_failed: bool },
    HalfOpen,
    Closed,
}

struct Inner {
    state: BreakerState,
    generation: u64,
    counts: Counts,
    opened_at: Instant,
    open_for: Duration,
    reopens: u32,
    probe_in_flight: bool,
}

struct Shared {
    cfg: BreakerConfig,
    inner: Mutex<Inner>,
    bus: Option<Bus>,
}

/// Ticket for an admitted call.
struct Admission {
    generation: u64,
    probe: bool,
}

/// Three-state circuit breaker guarding a fallible async call.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct CircuitBreaker {
    shared: Arc<Shared>,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    pub fn new(cfg: BreakerConfig) -> Result<Self, Error> {
        Self::build(cfg, None)
    }

    /// Creates a closed breaker that publishes state changes to `bus`.
    pub fn with_bus(cfg: BreakerConfig, bus: Bus) -> Result<Self, Error> {
        Self::build(cfg, Some(bus))
    }

    fn build(cfg: BreakerConfig, bus: Option<Bus>) -> Result<Self, Error> {
        cfg.validate()?;
        let inner = Inner {
            state: BreakerState::Closed,
            generation: 0,
            counts: Counts::default(),
            opened_at: Instant::now(),
            open_for: cfg.open_timeout,
            reopens: 0,
            probe_in_flight: false,
        };
        Ok(Self {
            shared: Arc::new(Shared {
                cfg,
                inner: Mutex::new(inner),
                bus,
            }),
        })
    }

    /// Breaker name from its config.
    pub fn name(&self) -> &str {
        &self.shared.cfg.name
    }

    /// Current state. An open breaker whose period has elapsed reports `HalfOpen`.
    pub fn state(&self) -> BreakerState {
        let now = Instant::now();
        let (state, transition) = {
            let mut inner = self.lock();
            let t = self.expire_open(&mut inner, now);
            (inner.state, t)
        };
        self.announce(transition);
        state
    }

    /// Counter snapshot.
    pub fn counts(&self) -> Counts {
        self.lock().counts
    }

    /// Number of state changes so far.
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Forces the breaker closed and clears the consecutive counters.
    pub fn reset(&self) {
        {
            let mut inner = self.lock();
            inner.counts.clear_streaks();
            inner.reopens = 0;
            inner.probe_in_flight = false;
            inner.open_for = self.shared.cfg.open_timeout;
            if inner.state != BreakerState::Closed {
                inner.state = BreakerState::Closed;
            }
            inner.generation += 1;
        }
        debug!(breaker = %self.shared.cfg.name, "breaker reset");
        self.announce(Some(Transition::Closed));
    }

    /// Runs `f` through the breaker under `ctx`.
    ///
    /// Returns `CircuitOpen` without invoking `f` while the breaker refuses
    /// calls, the context error if `ctx` fires first, or `f`'s own error
    /// wrapped in [`Error::Callback`].
    pub async fn call<T, E, F, Fut>(&self, ctx: &Context, f: F) -> Result<T, Error>
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        if let Some(err) = ctx.err() {
            return Err(err.into());
        }
        let admission = self.admit()?;
        let mut guard = SettleGuard {
            breaker: self,
            admission: Some(admission),
        };

        let call_ctx = ctx.clone();
        let fut = async move { f(call_ctx).await };
        let (outcome, result) = match ctx.run(AssertUnwindSafe(fut).catch_unwind()).await {
            Err(ctx_err) => (Outcome::Neutral, Err(Error::from(ctx_err))),
            Ok(Err(panic)) => (
                Outcome::Failure,
                Err(Error::from(CallbackError::from_panic(panic))),
            ),
            Ok(Ok(Err(e))) => (Outcome::Failure, Err(Error::from(CallbackError::failed(e)))),
            Ok(Ok(Ok(v))) => (Outcome::Success, Ok(v)),
        };
        guard.settle(outcome);
        result
    }

    /// Like [`call`](Self::call), but maps any error (including
    /// `CircuitOpen`) through `fallback`.
    pub async fn call_with_fallback<T, E, F, Fut, G>(&self, ctx: &Context, f: F, fallback: G) -> T
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
        G: FnOnce(&Error) -> T,
    {
        match self.call(ctx, f).await {
            Ok(v) => v,
            Err(err) => fallback(&err),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open → HalfOpen once the open period has elapsed.
    fn expire_open(&self, inner: &mut Inner, now: Instant) -> Option<Transition> {
        if inner.state == BreakerState::Open
            && now.saturating_duration_since(inner.opened_at) >= inner.open_for
        {
            inner.state = BreakerState::HalfOpen;
            inner.generation += 1;
            inner.probe_in_flight = false;
            return Some(Transition::HalfOpen);
        }
        None
    }

    fn admit(&self) -> Result<Admission, Error> {
        let now = Instant::now();
        let (res, transition) = {
            let mut inner = self.lock();
            let transition = self.expire_open(&mut inner, now);
            let res = match inner.state {
                BreakerState::Closed => {
                    inner.counts.requests += 1;
                    Ok(Admission {
                        generation: inner.generation,
                        probe: false,
                    })
                }
                BreakerState::HalfOpen if !inner.probe_in_flight => {
                    inner.probe_in_flight = true;
                    inner.counts.requests += 1;
                    Ok(Admission {
                        generation: inner.generation,
                        probe: true,
                    })
                }
                BreakerState::HalfOpen | BreakerState::Open => {
                    inner.counts.rejected += 1;
                    Err(Error::CircuitOpen)
                }
            };
            (res, transition)
        };
        self.announce(transition);
        if res.is_err() {
            emit(&self.shared.bus, || {
                Event::new(EventKind::CallRejected).with_component(Arc::clone(&self.shared.cfg.name))
            });
        }
        res
    }

    fn settle(&self, admission: Admission, outcome: Outcome) {
        let now = Instant::now();
        let transition = {
            let mut inner = self.lock();
            if admission.generation != inner.generation {
                return;
            }
            match (inner.state, outcome) {
                (BreakerState::Closed, Outcome::Success) => {
                    inner.counts.on_success();
                    None
                }
                (BreakerState::Closed, Outcome::Failure) => {
                    inner.counts.on_failure();
                    if inner.counts.consecutive_failures >= self.shared.cfg.failure_threshold {
                        inner.reopens = 0;
                        Some(self.trip(&mut inner, now, false))
                    } else {
                        None
                    }
                }
                (BreakerState::HalfOpen, _) if admission.probe => {
                    inner.probe_in_flight = false;
                    match outcome {
                        Outcome::Success => {
                            inner.counts.on_success();
                            inner.counts.consecutive_failures = 0;
                            inner.state = BreakerState::Closed;
                            inner.reopens = 0;
                            inner.open_for = self.shared.cfg.open_timeout;
                            inner.generation += 1;
                            Some(Transition::Closed)
                        }
                        Outcome::Failure => {
                            inner.counts.on_failure();
                            inner.reopens = inner.reopens.saturating_add(1);
                            Some(self.trip(&mut inner, now, true))
                        }
                        Outcome::Neutral => {
                            // opened_at is kept, so the next caller may probe right away
                            inner.state = BreakerState::Open;
                            inner.generation += 1;
                            None
                        }
                    }
                }
                _ => None,
            }
        };
        self.announce(transition);
    }

    fn trip(&self, inner: &mut Inner, now: Instant, probe_failed: bool) -> Transition {
        let period = self.shared.cfg.open_period(inner.reopens);
        inner.state = BreakerState::Open;
        inner.opened_at = now;
        inner.open_for = period;
        inner.generation += 1;
        Transition::Opened {
            period,
            probe_failed,
        }
    }

    fn announce(&self, transition: Option<Transition>) {
        let Some(t) = transition else { return };
        let name = &self.shared.cfg.name;
        match t {
            Transition::Opened {
                period,
                probe_failed,
            } => {
                let reason = if probe_failed {
                    "probe failed".to_string()
                } else {
                    format!("{} consecutive failures", self.shared.cfg.failure_threshold)
                };
                warn!(breaker = %name, ?period, %reason, "breaker opened");
                emit(&self.shared.bus, || {
                    Event::new(EventKind::BreakerOpened)
                        .with_component(Arc::clone(name))
                        .with_reason(reason)
                        .with_duration(period)
                });
            }
            Transition::HalfOpen => {
                debug!(breaker = %name, "breaker half-open");
                emit(&self.shared.bus, || {
                    Event::new(EventKind::BreakerHalfOpen).with_component(Arc::clone(name))
                });
            }
            Transition::Closed => {
                debug!(breaker = %name, "breaker closed");
                emit(&self.shared.bus, || {
                    Event::new(EventKind::BreakerClosed).with_component(Arc::clone(name))
                });
            }
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.shared.cfg.name)
            .field("state", &inner.state)
            .field("generation", &inner.generation)
            .field("counts", &inner.counts)
            .finish()
    }
}

/// Settles an admitted call exactly once, as neutral if the call future is dropped.
struct SettleGuard<'a> {
    breaker: &'a CircuitBreaker,
    admission: Option<Admission>,
}

impl SettleGuard<'_> {
    fn settle(&mut self, outcome: Outcome) {
        if let Some(adm) = self.admission.take() {
            self.breaker.settle(adm, outcome);
        }
    }
}

impl Drop for SettleGuard<'_> {
    fn drop(&mut self) {
        self.settle(Outcome::Neutral);
    }
}
