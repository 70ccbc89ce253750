//! # Subscriber inbox and dispatch loop.
//!
//! ```text
//! publish ──► filter ──► offer() ──► [inbox: bounded VecDeque] ──► dispatch task ──► handler
//!                          │ full:                                      ├─ Err/panic → failed + DeliveryFailure
//!                          ├─ DropNewest: discard new                   └─ > max_callback_duration → slow
//!                          ├─ DropOldest: evict front
//!                          └─ Block: wait for room under ctx
//! ```
//!
//! ## Rules
//! - One dispatch task per subscriber: callbacks for the same subscriber
//!   never overlap and see messages in enqueue order.
//! - `close()` lets the task drain what is queued, then exit.
//! - `discard()` empties the inbox, cancels the in-flight callback's
//!   context and stops the task.
//! - The inbox lock is never held across an `.await`.

use std::collections::VecDeque;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::pin::pin;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures::FutureExt;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

use crate::broker::hub::BrokerShared;
use crate::broker::stats::{BrokerCounters, SubscriptionStats};
use crate::broker::{DeliveryFailure, Handler, Message, OverloadPolicy, SubscribeOptions};
use crate::context::{CancelHandle, Context};
use crate::error::{CallbackError, ContextError};
use crate::events::{self, Bus, Event, EventKind};

pub(crate) type Filter<P> = Box<dyn Fn(&Message<P>) -> bool + Send + Sync>;

/// Result of offering one message to one subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Offer {
    Queued,
    /// Queued after evicting the oldest message.
    Evicted,
    Dropped,
    /// Subscriber was detached concurrently.
    Closed,
    /// `Block` policy gave up because the publisher's context fired.
    Interrupted(ContextError),
}

struct Inbox<P> {
    queue: VecDeque<Arc<Message<P>>>,
    closed: bool,
}

#[derive(Default)]
struct SubCounters {
    delivered: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
    slow: AtomicU64,
    consecutive_slow: AtomicU32,
}

pub(crate) struct SubscriberShared<P> {
    pub(crate) id: u64,
    pub(crate) topic: Arc<str>,
    opts: SubscribeOptions,
    filter: Filter<P>,
    inbox: Mutex<Inbox<P>>,
    not_empty: Notify,
    not_full: Notify,
    cancel: CancelHandle,
    counters: SubCounters,
}

impl<P: Send + Sync + 'static> SubscriberShared<P> {
    pub(crate) fn new(
        id: u64,
        topic: Arc<str>,
        opts: SubscribeOptions,
        filter: Filter<P>,
        cancel: CancelHandle,
    ) -> Self {
        Self {
            id,
            topic,
            inbox: Mutex::new(Inbox {
                queue: VecDeque::with_capacity(opts.queue_depth.min(1024)),
                closed: false,
            }),
            opts,
            filter,
            not_empty: Notify::new(),
            not_full: Notify::new(),
            cancel,
            counters: SubCounters::default(),
        }
    }

    fn inbox(&self) -> MutexGuard<'_, Inbox<P>> {
        self.inbox
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn accepts(&self, msg: &Message<P>) -> bool {
        (self.filter)(msg)
    }

    pub(crate) fn policy(&self) -> OverloadPolicy {
        self.opts.overload_policy
    }

    /// Places `msg` in the inbox according to the overload policy.
    ///
    /// Only the `Block` policy awaits; it gives up when `ctx` fires.
    pub(crate) async fn offer(&self, ctx: &Context, msg: Arc<Message<P>>) -> Offer {
        loop {
            let mut room = pin!(self.not_full.notified());
            room.as_mut().enable();
            {
                let mut inbox = self.inbox();
                if inbox.closed {
                    return Offer::Closed;
                }
                if inbox.queue.len() < self.opts.queue_depth {
                    inbox.queue.push_back(msg);
                    drop(inbox);
                    self.not_empty.notify_one();
                    return Offer::Queued;
                }
                match self.opts.overload_policy {
                    OverloadPolicy::DropNewest => {
                        drop(inbox);
                        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                        return Offer::Dropped;
                    }
                    OverloadPolicy::DropOldest => {
                        inbox.queue.pop_front();
                        inbox.queue.push_back(msg);
                        drop(inbox);
                        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                        self.not_empty.notify_one();
                        return Offer::Evicted;
                    }
                    OverloadPolicy::Block => {}
                }
            }
            if let Err(reason) = ctx.run(room).await {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                return Offer::Interrupted(reason);
            }
        }
    }

    /// Next message to deliver; `None` once closed and drained, discarded,
    /// or when `ctx` fires.
    async fn next(&self, ctx: &Context) -> Option<Arc<Message<P>>> {
        loop {
            {
                let mut inbox = self.inbox();
                if let Some(msg) = inbox.queue.pop_front() {
                    drop(inbox);
                    self.not_full.notify_waiters();
                    return Some(msg);
                }
                if inbox.closed {
                    return None;
                }
            }
            ctx.run(self.not_empty.notified()).await.ok()?;
        }
    }

    /// Stops accepting messages; queued ones are still delivered.
    pub(crate) fn close(&self) {
        self.inbox().closed = true;
        self.not_empty.notify_one();
        self.not_full.notify_waiters();
    }

    /// Stops accepting messages and throws away the queued ones.
    ///
    /// Returns how many were discarded.
    pub(crate) fn discard(&self) -> usize {
        let discarded = {
            let mut inbox = self.inbox();
            inbox.closed = true;
            let n = inbox.queue.len();
            inbox.queue.clear();
            n
        };
        self.counters
            .dropped
            .fetch_add(discarded as u64, Ordering::Relaxed);
        self.cancel.cancel();
        self.not_empty.notify_one();
        self.not_full.notify_waiters();
        discarded
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.inbox().closed
    }

    pub(crate) fn stats(&self) -> SubscriptionStats {
        let queued = self.inbox().queue.len();
        SubscriptionStats {
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            slow: self.counters.slow.load(Ordering::Relaxed),
            queued,
        }
    }
}

/// Everything a dispatch task needs from its broker.
pub(crate) struct DispatchEnv<P> {
    pub(crate) broker_name: Arc<str>,
    pub(crate) bus: Option<Bus>,
    pub(crate) counters: Arc<BrokerCounters>,
    pub(crate) evict_after_slow: Option<u32>,
    pub(crate) broker: Weak<BrokerShared<P>>,
}

impl<P> DispatchEnv<P> {
    fn emit(&self, kind: EventKind, build: impl FnOnce(Event) -> Event) {
        events::emit(&self.bus, || {
            build(Event::new(kind).with_component(Arc::clone(&self.broker_name)))
        });
    }
}

/// Body of a subscriber's dispatch task.
pub(crate) async fn dispatch<P: Send + Sync + 'static>(
    sub: Arc<SubscriberShared<P>>,
    handler: Arc<dyn Handler<P>>,
    ctx: Context,
    errors: Option<mpsc::Sender<DeliveryFailure>>,
    env: DispatchEnv<P>,
) {
    while let Some(msg) = sub.next(&ctx).await {
        if !deliver(&sub, handler.as_ref(), &ctx, errors.as_ref(), &env, msg).await {
            break;
        }
    }
    debug!(broker = %env.broker_name, topic = %sub.topic, subscriber = sub.id, "dispatch stopped");
    if let Some(broker) = env.broker.upgrade() {
        broker.dispatch_exited(sub.id);
    }
}

/// Runs the handler for one message. Returns `false` when the task must stop.
async fn deliver<P: Send + Sync + 'static>(
    sub: &Arc<SubscriberShared<P>>,
    handler: &dyn Handler<P>,
    ctx: &Context,
    errors: Option<&mpsc::Sender<DeliveryFailure>>,
    env: &DispatchEnv<P>,
    msg: Arc<Message<P>>,
) -> bool {
    let message_id = msg.id;
    let call = AssertUnwindSafe(handler.handle(ctx.clone(), msg)).catch_unwind();
    let mut call = pin!(ctx.run(call));

    let mut was_slow = false;
    let outcome = match sub.opts.max_callback_duration {
        None => call.await,
        Some(limit) => match tokio::time::timeout(limit, call.as_mut()).await {
            Ok(outcome) => outcome,
            Err(_elapsed) => {
                was_slow = true;
                sub.counters.slow.fetch_add(1, Ordering::Relaxed);
                warn!(
                    broker = %env.broker_name,
                    topic = %sub.topic,
                    subscriber = sub.id,
                    message = message_id,
                    ?limit,
                    "subscriber callback is slow"
                );
                env.emit(EventKind::CallbackSlow, |ev| {
                    ev.with_topic(Arc::clone(&sub.topic))
                        .with_subscriber(sub.id)
                        .with_duration(limit)
                });
                report(
                    errors,
                    DeliveryFailure {
                        subscriber: sub.id,
                        topic: Arc::clone(&sub.topic),
                        message_id,
                        error: CallbackError::TimedOut { limit },
                    },
                );
                call.await
            }
        },
    };

    let failure = match outcome {
        // Unsubscribed or broker shut down mid-callback.
        Err(_) => return false,
        Ok(Ok(Ok(()))) => None,
        Ok(Ok(Err(e))) => Some(CallbackError::Failed(e)),
        Ok(Err(panic)) => Some(CallbackError::from_panic(panic)),
    };
    match failure {
        None => {
            sub.counters.delivered.fetch_add(1, Ordering::Relaxed);
            env.counters.delivered();
        }
        Some(error) => {
            sub.counters.failed.fetch_add(1, Ordering::Relaxed);
            env.counters.failed();
            warn!(
                broker = %env.broker_name,
                topic = %sub.topic,
                subscriber = sub.id,
                message = message_id,
                kind = error.as_label(),
                %error,
                "subscriber callback failed"
            );
            env.emit(EventKind::CallbackFailed, |ev| {
                ev.with_topic(Arc::clone(&sub.topic))
                    .with_subscriber(sub.id)
                    .with_reason(error.to_string())
            });
            report(
                errors,
                DeliveryFailure {
                    subscriber: sub.id,
                    topic: Arc::clone(&sub.topic),
                    message_id,
                    error,
                },
            );
        }
    }

    if !was_slow {
        sub.counters.consecutive_slow.store(0, Ordering::Relaxed);
        return true;
    }
    let streak = sub.counters.consecutive_slow.fetch_add(1, Ordering::Relaxed) + 1;
    if env.evict_after_slow.is_some_and(|n| streak >= n) {
        if let Some(broker) = env.broker.upgrade() {
            broker.evict(sub, streak);
        }
        return false;
    }
    true
}

fn report(errors: Option<&mpsc::Sender<DeliveryFailure>>, failure: DeliveryFailure) {
    let Some(tx) = errors else { return };
    if let Err(e) = tx.try_send(failure) {
        let failure = match e {
            mpsc::error::TrySendError::Full(f) | mpsc::error::TrySendError::Closed(f) => f,
        };
        debug!(
            topic = %failure.topic,
            subscriber = failure.subscriber,
            message = failure.message_id,
            "error channel unavailable; failure report dropped"
        );
    }
}

impl<P> fmt::Debug for SubscriberShared<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberShared")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("opts", &self.opts)
            .finish_non_exhaustive()
    }
}
