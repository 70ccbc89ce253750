//! # Broker: topics, subscriptions and publish.
//!
//! ```text
//! publish(ctx, topic, payload)
//!   ├─► registry lock: assign id, snapshot subscriber list   (no await)
//!   └─► for each subscriber, in subscription order:
//!         filter ─ false ─► filtered_out
//!           └─ true ─► offer() ─► Queued | Evicted | Dropped | Interrupted
//!
//! subscribe(topic, filter, handler, opts)
//!   ├─► topic created if missing
//!   ├─► subscriber appended to the topic's list
//!   └─► one dispatch task spawned (drives the handler)
//! ```
//!
//! ## Rules
//! - The registry lock is never held across an `.await`; a blocked
//!   publisher never stalls `subscribe`, `unsubscribe` or other topics.
//! - A publish that happens-before another is enqueued before it in every
//!   subscriber that receives both.
//! - `Block` subscribers are waited on under the publisher's context. If it
//!   fires, that subscriber is skipped, the remaining ones are still offered
//!   the message, and `publish` returns the context error.
//! - Dropping every `Broker` clone stops all dispatch tasks.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, SystemTime};

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::broker::stats::{BrokerCounters, BrokerStats};
use crate::broker::subscriber::{dispatch, DispatchEnv, Offer, SubscriberShared};
use crate::broker::{
    BrokerConfig, DeliveryFailure, Handler, Message, PublishReport, SubscribeOptions,
    SubscriptionStats,
};
use crate::context::{CancelHandle, Context};
use crate::error::Error;
use crate::events::{self, Bus, Event, EventKind};

type Subscribers<P> = Vec<Arc<SubscriberShared<P>>>;

struct Registry<P> {
    topics: HashMap<Arc<str>, Subscribers<P>>,
    closed: bool,
}

pub(crate) struct BrokerShared<P> {
    cfg: BrokerConfig,
    registry: Mutex<Registry<P>>,
    loops: Mutex<HashMap<u64, JoinHandle<()>>>,
    root: Context,
    root_cancel: CancelHandle,
    counters: Arc<BrokerCounters>,
    bus: Option<Bus>,
    next_message: AtomicU64,
    next_subscriber: AtomicU64,
    shut_down: AtomicBool,
}

impl<P: Send + Sync + 'static> BrokerShared<P> {
    fn lock_registry(&self) -> MutexGuard<'_, Registry<P>> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_loops(&self) -> MutexGuard<'_, HashMap<u64, JoinHandle<()>>> {
        self.loops
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, kind: EventKind, build: impl FnOnce(Event) -> Event) {
        events::emit(&self.bus, || {
            build(Event::new(kind).with_component(Arc::clone(&self.cfg.name)))
        });
    }

    /// Removes a subscriber from its topic. `None` if it was not attached.
    fn detach(&self, topic: &str, id: u64) -> Option<Arc<SubscriberShared<P>>> {
        let mut registry = self.lock_registry();
        let subs = registry.topics.get_mut(topic)?;
        let pos = subs.iter().position(|s| s.id == id)?;
        Some(subs.remove(pos))
    }

    fn unsubscribe(&self, topic: &str, id: u64) -> bool {
        let Some(sub) = self.detach(topic, id) else {
            return false;
        };
        let discarded = sub.discard();
        self.counters.dropped(discarded as u64);
        debug!(broker = %self.cfg.name, topic, subscriber = id, discarded, "unsubscribed");
        self.emit(EventKind::Unsubscribed, |ev| {
            ev.with_topic(Arc::clone(&sub.topic)).with_subscriber(id)
        });
        true
    }

    /// Auto-unsubscribes a persistently slow subscriber.
    pub(crate) fn evict(&self, sub: &Arc<SubscriberShared<P>>, streak: u32) {
        if self.detach(&sub.topic, sub.id).is_none() {
            return;
        }
        let discarded = sub.discard();
        self.counters.dropped(discarded as u64);
        warn!(
            broker = %self.cfg.name,
            topic = %sub.topic,
            subscriber = sub.id,
            streak,
            discarded,
            "subscriber evicted after consecutive slow callbacks"
        );
        self.emit(EventKind::SubscriberEvicted, |ev| {
            ev.with_topic(Arc::clone(&sub.topic))
                .with_subscriber(sub.id)
                .with_reason(format!("{streak} consecutive slow callbacks"))
        });
    }

    pub(crate) fn dispatch_exited(&self, id: u64) {
        self.lock_loops().remove(&id);
    }
}

/// Cancels the broker's root context when the last `Broker` clone goes away.
struct CloseOnDrop(CancelHandle);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// In-process topic-based publish/subscribe broker.
///
/// Cheap to clone; clones share topics and subscriptions. Subscribing
/// spawns a task, so it must happen inside a Tokio runtime.
///
/// # Example
/// ```rust
/// use std::sync::Arc;
/// use concur::{Broker, BrokerConfig, BoxError, Context, HandlerFn, Message, SubscribeOptions};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), concur::Error> {
/// let broker = Broker::new(BrokerConfig::default())?;
/// let ctx = Context::background();
///
/// let sub = broker.subscribe(
///     "orders",
///     |m: &Message<u32>| m.payload > 10,
///     HandlerFn::new(|_ctx: Context, m: Arc<Message<u32>>| async move {
///         println!("big order: {}", m.payload);
///         Ok::<_, BoxError>(())
///     }),
///     SubscribeOptions::default(),
/// )?;
///
/// let report = broker.publish(&ctx, "orders", 42).await?;
/// assert_eq!(report.enqueued, 1);
///
/// broker.shutdown(std::time::Duration::from_secs(1)).await;
/// assert_eq!(sub.stats().delivered, 1);
/// # Ok(())
/// # }
/// ```
pub struct Broker<P> {
    shared: Arc<BrokerShared<P>>,
    _close_on_drop: Arc<CloseOnDrop>,
}

impl<P> Clone for Broker<P> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            _close_on_drop: Arc::clone(&self._close_on_drop),
        }
    }
}

impl<P: Send + Sync + 'static> Broker<P> {
    /// Creates a broker without an event bus.
    pub fn new(cfg: BrokerConfig) -> Result<Self, Error> {
        Self::build(cfg, None)
    }

    /// Creates a broker that reports lifecycle and delivery events on `bus`.
    pub fn with_bus(cfg: BrokerConfig, bus: Bus) -> Result<Self, Error> {
        Self::build(cfg, Some(bus))
    }

    fn build(cfg: BrokerConfig, bus: Option<Bus>) -> Result<Self, Error> {
        cfg.validate()?;
        let (root, root_cancel) = Context::background().with_cancel();
        let shared = Arc::new(BrokerShared {
            cfg,
            registry: Mutex::new(Registry {
                topics: HashMap::new(),
                closed: false,
            }),
            loops: Mutex::new(HashMap::new()),
            root,
            root_cancel: root_cancel.clone(),
            counters: Arc::new(BrokerCounters::default()),
            bus,
            next_message: AtomicU64::new(1),
            next_subscriber: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
        });
        Ok(Self {
            shared,
            _close_on_drop: Arc::new(CloseOnDrop(root_cancel)),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.cfg.name
    }

    /// Creates `topic` if missing. Returns `true` when it was created.
    pub fn create_topic(&self, topic: &str) -> Result<bool, Error> {
        let created = {
            let mut registry = self.shared.lock_registry();
            if registry.closed {
                return Err(Error::ShuttingDown);
            }
            if registry.topics.contains_key(topic) {
                false
            } else {
                registry.topics.insert(Arc::from(topic), Vec::new());
                true
            }
        };
        if created {
            debug!(broker = %self.shared.cfg.name, topic, "topic created");
            self.shared
                .emit(EventKind::TopicCreated, |ev| ev.with_topic(topic));
        }
        Ok(created)
    }

    /// Removes `topic`. Its subscribers deliver what they already queued,
    /// then their dispatch tasks exit. Returns `false` if it did not exist.
    pub fn delete_topic(&self, topic: &str) -> bool {
        let removed = self.shared.lock_registry().topics.remove(topic);
        let Some(subs) = removed else {
            return false;
        };
        for sub in &subs {
            sub.close();
        }
        debug!(broker = %self.shared.cfg.name, topic, subscribers = subs.len(), "topic deleted");
        self.shared
            .emit(EventKind::TopicDeleted, |ev| ev.with_topic(topic));
        true
    }

    pub fn has_topic(&self, topic: &str) -> bool {
        self.shared.lock_registry().topics.contains_key(topic)
    }

    /// Topic names, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .shared
            .lock_registry()
            .topics
            .keys()
            .map(|k| k.to_string())
            .collect();
        names.sort_unstable();
        names
    }

    pub fn topic_count(&self) -> usize {
        self.shared.lock_registry().topics.len()
    }

    /// Subscribers attached to `topic` (0 for unknown topics).
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.shared
            .lock_registry()
            .topics
            .get(topic)
            .map_or(0, Vec::len)
    }

    /// Attaches `handler` to `topic`, creating the topic if needed.
    ///
    /// `filter` runs on the publisher's task and must be cheap; only
    /// messages it accepts are queued for this subscriber.
    pub fn subscribe<F, H>(
        &self,
        topic: &str,
        filter: F,
        handler: H,
        opts: SubscribeOptions,
    ) -> Result<Subscription<P>, Error>
    where
        F: Fn(&Message<P>) -> bool + Send + Sync + 'static,
        H: Handler<P>,
    {
        self.subscribe_arc(topic, filter, Arc::new(handler), opts)
    }

    /// Like [`subscribe`](Self::subscribe), for handlers already behind an `Arc`.
    pub fn subscribe_arc<F>(
        &self,
        topic: &str,
        filter: F,
        handler: Arc<dyn Handler<P>>,
        opts: SubscribeOptions,
    ) -> Result<Subscription<P>, Error>
    where
        F: Fn(&Message<P>) -> bool + Send + Sync + 'static,
    {
        opts.validate()?;
        let shared = &self.shared;
        let id = shared.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let (ctx, cancel) = shared.root.with_cancel();
        let (errors_tx, errors_rx) = match opts.error_channel_capacity {
            Some(cap) => {
                let (tx, rx) = mpsc::channel(cap);
                (Some(tx), Some(rx))
            }
            None => (None, None),
        };

        let (sub, created) = {
            let mut registry = shared.lock_registry();
            if registry.closed {
                return Err(Error::ShuttingDown);
            }
            let created = !registry.topics.contains_key(topic);
            let subs = registry.topics.entry(Arc::from(topic)).or_default();
            let sub = Arc::new(SubscriberShared::new(
                id,
                Arc::from(topic),
                opts,
                Box::new(filter),
                cancel,
            ));
            subs.push(Arc::clone(&sub));
            (sub, created)
        };

        let env = DispatchEnv {
            broker_name: Arc::clone(&shared.cfg.name),
            bus: shared.bus.clone(),
            counters: Arc::clone(&shared.counters),
            evict_after_slow: shared.cfg.evict_after_slow,
            broker: Arc::downgrade(shared),
        };
        {
            let mut loops = shared.lock_loops();
            let join = tokio::spawn(dispatch(Arc::clone(&sub), handler, ctx, errors_tx, env));
            loops.insert(id, join);
        }

        if created {
            shared.emit(EventKind::TopicCreated, |ev| ev.with_topic(topic));
        }
        debug!(broker = %shared.cfg.name, topic, subscriber = id, policy = sub.policy().as_label(), "subscribed");
        shared.emit(EventKind::Subscribed, |ev| ev.with_topic(topic).with_subscriber(id));

        Ok(Subscription {
            shared: sub,
            broker: Arc::downgrade(shared),
            errors: errors_rx,
        })
    }

    /// Detaches `sub` and discards its queued messages. Idempotent: returns
    /// `false` if it was already detached.
    pub fn unsubscribe(&self, sub: &Subscription<P>) -> bool {
        self.shared.unsubscribe(&sub.shared.topic, sub.shared.id)
    }

    /// Publishes `payload` to every matching subscriber of `topic`.
    ///
    /// Never waits unless a matching subscriber uses the `Block` policy and
    /// its queue is full; then it waits under `ctx`.
    ///
    /// # Errors
    /// - [`Error::UnknownTopic`] if the topic does not exist
    /// - [`Error::ShuttingDown`] after [`shutdown`](Self::shutdown)
    /// - [`Error::Cancelled`] / [`Error::DeadlineExceeded`] if `ctx` fired
    ///   while waiting on a `Block` subscriber
    pub async fn publish(&self, ctx: &Context, topic: &str, payload: P) -> Result<PublishReport, Error> {
        self.publish_with_metadata(ctx, topic, payload, HashMap::new())
            .await
    }

    /// Like [`publish`](Self::publish), attaching `metadata` to the message.
    pub async fn publish_with_metadata(
        &self,
        ctx: &Context,
        topic: &str,
        payload: P,
        metadata: HashMap<String, String>,
    ) -> Result<PublishReport, Error> {
        let shared = &self.shared;
        let (msg, subs) = {
            let registry = shared.lock_registry();
            if registry.closed {
                return Err(Error::ShuttingDown);
            }
            let Some((name, subs)) = registry.topics.get_key_value(topic) else {
                return Err(Error::UnknownTopic {
                    topic: topic.to_string(),
                });
            };
            let msg = Arc::new(Message {
                id: shared.next_message.fetch_add(1, Ordering::Relaxed),
                topic: Arc::clone(name),
                payload,
                timestamp: SystemTime::now(),
                metadata,
            });
            (msg, subs.clone())
        };
        shared.counters.published();

        let mut report = PublishReport {
            message_id: msg.id,
            ..PublishReport::default()
        };
        let mut interrupted = None;
        for sub in &subs {
            if !sub.accepts(&msg) {
                report.filtered_out += 1;
                continue;
            }
            let drop_reason = match sub.offer(ctx, Arc::clone(&msg)).await {
                Offer::Queued => {
                    report.enqueued += 1;
                    continue;
                }
                Offer::Closed => continue,
                Offer::Evicted => {
                    report.enqueued += 1;
                    "drop-oldest"
                }
                Offer::Dropped => "drop-newest",
                Offer::Interrupted(reason) => {
                    interrupted.get_or_insert(reason);
                    reason.as_label()
                }
            };
            report.dropped += 1;
            debug!(broker = %shared.cfg.name, topic, subscriber = sub.id, message = msg.id, reason = drop_reason, "message dropped");
            shared.emit(EventKind::MessageDropped, |ev| {
                ev.with_topic(Arc::clone(&msg.topic))
                    .with_subscriber(sub.id)
                    .with_reason(drop_reason)
            });
        }
        shared.counters.dropped(report.dropped as u64);

        match interrupted {
            Some(reason) => Err(reason.into()),
            None => Ok(report),
        }
    }

    pub fn stats(&self) -> BrokerStats {
        let (topics, subscribers) = {
            let registry = self.shared.lock_registry();
            (
                registry.topics.len(),
                registry.topics.values().map(Vec::len).sum(),
            )
        };
        self.shared.counters.snapshot(topics, subscribers)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shut_down.load(Ordering::Acquire)
    }

    /// Stops the broker.
    ///
    /// New `subscribe`/`publish` calls fail with `ShuttingDown`. Every
    /// subscriber gets up to `grace` to deliver what it has queued; after
    /// that, in-flight callbacks see their context cancelled and undelivered
    /// messages are discarded. Returns `true` if everything drained in time.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        let shared = &self.shared;
        if shared.shut_down.swap(true, Ordering::AcqRel) {
            return true;
        }
        let subs: Vec<Arc<SubscriberShared<P>>> = {
            let mut registry = shared.lock_registry();
            registry.closed = true;
            registry.topics.drain().flat_map(|(_, subs)| subs).collect()
        };
        for sub in &subs {
            sub.close();
        }
        let joins: Vec<JoinHandle<()>> = shared.lock_loops().drain().map(|(_, j)| j).collect();
        debug!(broker = %shared.cfg.name, subscribers = subs.len(), ?grace, "broker shutting down");

        let mut all = std::pin::pin!(join_all(joins));
        if tokio::time::timeout(grace, all.as_mut()).await.is_ok() {
            return true;
        }
        let mut discarded = 0;
        for sub in &subs {
            discarded += sub.discard();
        }
        shared.counters.dropped(discarded as u64);
        shared.root_cancel.cancel();
        warn!(broker = %shared.cfg.name, discarded, "grace exceeded; subscriber callbacks cancelled");
        all.await;
        false
    }
}

impl<P> fmt::Debug for Broker<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broker")
            .field("name", &self.shared.cfg.name)
            .field("shut_down", &self.shared.shut_down.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Handle to one subscriber.
///
/// Dropping it does **not** unsubscribe; call
/// [`unsubscribe`](Self::unsubscribe) or [`Broker::unsubscribe`].
pub struct Subscription<P> {
    shared: Arc<SubscriberShared<P>>,
    broker: Weak<BrokerShared<P>>,
    errors: Option<mpsc::Receiver<DeliveryFailure>>,
}

impl<P: Send + Sync + 'static> Subscription<P> {
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn topic(&self) -> &str {
        &self.shared.topic
    }

    pub fn stats(&self) -> SubscriptionStats {
        self.shared.stats()
    }

    /// `false` once unsubscribed, evicted, or its topic/broker is gone.
    pub fn is_active(&self) -> bool {
        !self.shared.is_closed()
    }

    /// Takes the failure channel, if one was requested in
    /// [`SubscribeOptions::error_channel_capacity`]. Later calls return `None`.
    pub fn take_errors(&mut self) -> Option<mpsc::Receiver<DeliveryFailure>> {
        self.errors.take()
    }

    /// Same as [`Broker::unsubscribe`].
    pub fn unsubscribe(&self) -> bool {
        match self.broker.upgrade() {
            Some(broker) => broker.unsubscribe(&self.shared.topic, self.shared.id),
            None => false,
        }
    }
}

impl<P> fmt::Debug for Subscription<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.shared.id)
            .field("topic", &self.shared.topic)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{HandlerFn, OverloadPolicy};
    use crate::error::{BoxError, CallbackError, ContextError};
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Semaphore;

    type Seen = Arc<StdMutex<Vec<u32>>>;

    fn recorder(seen: &Seen) -> impl Handler<u32> {
        let seen = Arc::clone(seen);
        HandlerFn::new(move |_ctx: Context, m: Arc<Message<u32>>| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().unwrap().push(m.payload);
                Ok::<_, BoxError>(())
            }
        })
    }

    /// Handler that waits for one permit per message.
    fn gated(gate: &Arc<Semaphore>, seen: &Seen) -> impl Handler<u32> {
        let gate = Arc::clone(gate);
        let seen = Arc::clone(seen);
        HandlerFn::new(move |_ctx: Context, m: Arc<Message<u32>>| {
            let gate = Arc::clone(&gate);
            let seen = Arc::clone(&seen);
            async move {
                gate.acquire().await?.forget();
                seen.lock().unwrap().push(m.payload);
                Ok::<_, BoxError>(())
            }
        })
    }

    fn broker() -> Broker<u32> {
        Broker::new(BrokerConfig::default()).unwrap()
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn topics_are_idempotent() {
        let b = broker();
        assert!(b.create_topic("a").unwrap());
        assert!(!b.create_topic("a").unwrap());
        assert!(b.create_topic("b").unwrap());
        assert_eq!(b.topics(), vec!["a".to_string(), "b".to_string()]);
        assert!(b.delete_topic("a"));
        assert!(!b.delete_topic("a"));
        assert!(!b.has_topic("a"));
        assert_eq!(b.topic_count(), 1);
    }

    #[tokio::test]
    async fn publish_to_unknown_topic_fails() {
        let b = broker();
        let err = b.publish(&Context::background(), "nope", 1).await.unwrap_err();
        assert!(matches!(err, Error::UnknownTopic { ref topic } if topic == "nope"));
    }

    #[tokio::test]
    async fn delivers_in_publish_order_with_filter() {
        let b = broker();
        let seen: Seen = Arc::default();
        let sub = b
            .subscribe("n", |m: &Message<u32>| m.payload % 2 == 0, recorder(&seen), SubscribeOptions::default())
            .unwrap();
        assert_eq!(b.subscriber_count("n"), 1);

        let ctx = Context::background();
        let mut filtered = 0;
        for i in 0..10 {
            filtered += b.publish(&ctx, "n", i).await.unwrap().filtered_out;
        }
        assert_eq!(filtered, 5);
        assert!(b.shutdown(Duration::from_secs(1)).await);
        assert_eq!(*seen.lock().unwrap(), vec![0, 2, 4, 6, 8]);
        assert_eq!(sub.stats().delivered, 5);
        assert_eq!(b.stats().delivered, 5);
    }

    #[tokio::test]
    async fn drop_newest_under_load() {
        let b = broker();
        let gate = Arc::new(Semaphore::new(0));
        let seen: Seen = Arc::default();
        let sub = b
            .subscribe(
                "t",
                |_: &Message<u32>| true,
                gated(&gate, &seen),
                SubscribeOptions::default().with_queue_depth(2),
            )
            .unwrap();

        let ctx = Context::background();
        b.publish(&ctx, "t", 1).await.unwrap();
        settle().await; // 1 is now in the callback, inbox empty
        let mut dropped = 0;
        for i in 2..=5 {
            dropped += b.publish(&ctx, "t", i).await.unwrap().dropped;
        }
        assert_eq!(dropped, 2);

        gate.add_permits(10);
        assert!(b.shutdown(Duration::from_secs(1)).await);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(sub.stats().dropped, 2);
    }

    #[tokio::test]
    async fn block_policy_honours_publisher_ctx() {
        let b = broker();
        let gate = Arc::new(Semaphore::new(0));
        let seen: Seen = Arc::default();
        let other: Seen = Arc::default();
        let blocking = b.subscribe(
            "t",
            |_: &Message<u32>| true,
            gated(&gate, &seen),
            SubscribeOptions::default()
                .with_queue_depth(1)
                .with_overload_policy(OverloadPolicy::Block),
        )
        .unwrap();
        b.subscribe("t", |_: &Message<u32>| true, recorder(&other), SubscribeOptions::default())
            .unwrap();

        let bg = Context::background();
        b.publish(&bg, "t", 1).await.unwrap();
        settle().await;
        b.publish(&bg, "t", 2).await.unwrap();

        let (ctx, cancel) = bg.with_cancel();
        cancel.cancel();
        let err = b.publish(&ctx, "t", 3).await.unwrap_err();
        assert_eq!(err.as_context(), Some(ContextError::Cancelled));
        assert_eq!(blocking.stats().dropped, 1);
        assert_eq!(b.stats().dropped, 1);

        gate.add_permits(10);
        assert!(b.shutdown(Duration::from_secs(1)).await);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(*other.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn unsubscribe_discards_queue_and_is_idempotent() {
        let b = broker();
        let gate = Arc::new(Semaphore::new(0));
        let seen: Seen = Arc::default();
        let sub = b
            .subscribe("t", |_: &Message<u32>| true, gated(&gate, &seen), SubscribeOptions::default())
            .unwrap();
        let ctx = Context::background();
        for i in 0..4 {
            b.publish(&ctx, "t", i).await.unwrap();
        }
        settle().await;
        assert!(b.unsubscribe(&sub));
        assert!(!sub.unsubscribe());
        assert!(!sub.is_active());
        assert_eq!(b.subscriber_count("t"), 0);
        gate.add_permits(10);
        assert!(b.shutdown(Duration::from_secs(1)).await);
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(sub.stats().dropped, 3);
    }

    #[tokio::test]
    async fn failures_are_counted_and_reported() {
        let b = broker();
        let mut sub = b
            .subscribe(
                "t",
                |_: &Message<u32>| true,
                HandlerFn::new(|_ctx: Context, m: Arc<Message<u32>>| async move {
                    match m.payload {
                        0 => Err::<(), BoxError>("bad payload".into()),
                        1 => panic!("kaboom"),
                        _ => Ok(()),
                    }
                }),
                SubscribeOptions::default().with_error_channel(8),
            )
            .unwrap();
        let mut errors = sub.take_errors().expect("channel requested");
        assert!(sub.take_errors().is_none());

        let ctx = Context::background();
        for i in 0..3 {
            b.publish(&ctx, "t", i).await.unwrap();
        }
        let first = errors.recv().await.unwrap();
        assert!(matches!(first.error, CallbackError::Failed(_)));
        let second = errors.recv().await.unwrap();
        assert!(matches!(second.error, CallbackError::Panicked(ref m) if m.contains("kaboom")));

        assert!(b.shutdown(Duration::from_secs(1)).await);
        let stats = sub.stats();
        assert_eq!((stats.failed, stats.delivered), (2, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_subscriber_is_evicted() {
        let b: Broker<u32> = Broker::new(BrokerConfig::default().with_evict_after_slow(2)).unwrap();
        let sub = b
            .subscribe(
                "t",
                |_: &Message<u32>| true,
                HandlerFn::new(|ctx: Context, _m: Arc<Message<u32>>| async move {
                    ctx.sleep(Duration::from_millis(50)).await?;
                    Ok::<_, BoxError>(())
                }),
                SubscribeOptions::default().with_max_callback_duration(Duration::from_millis(10)),
            )
            .unwrap();
        let ctx = Context::background();
        for i in 0..3 {
            b.publish(&ctx, "t", i).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(!sub.is_active());
        assert_eq!(b.subscriber_count("t"), 0);
        let stats = sub.stats();
        assert_eq!(stats.slow, 2);
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.dropped, 1);
    }

    #[tokio::test]
    async fn delete_topic_drains_subscribers() {
        let b = broker();
        let seen: Seen = Arc::default();
        let sub = b
            .subscribe("t", |_: &Message<u32>| true, recorder(&seen), SubscribeOptions::default())
            .unwrap();
        let ctx = Context::background();
        for i in 0..3 {
            b.publish(&ctx, "t", i).await.unwrap();
        }
        assert!(b.delete_topic("t"));
        assert!(b.publish(&ctx, "t", 9).await.is_err());
        assert!(b.shutdown(Duration::from_secs(1)).await);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
        assert!(!sub.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_past_grace_cancels_callbacks() {
        let b = broker();
        let sub = b
            .subscribe(
                "t",
                |_: &Message<u32>| true,
                HandlerFn::new(|ctx: Context, _m: Arc<Message<u32>>| async move {
                    ctx.sleep(Duration::from_secs(60)).await?;
                    Ok::<_, BoxError>(())
                }),
                SubscribeOptions::default(),
            )
            .unwrap();
        let ctx = Context::background();
        b.publish(&ctx, "t", 1).await.unwrap();
        b.publish(&ctx, "t", 2).await.unwrap();
        settle().await;

        assert!(!b.shutdown(Duration::from_millis(100)).await);
        assert!(b.is_shut_down());
        assert!(matches!(b.publish(&ctx, "t", 3).await, Err(Error::ShuttingDown)));
        assert_eq!(sub.stats().delivered, 0);
        assert_eq!(b.stats().dropped, 1);
    }

    #[tokio::test]
    async fn lifecycle_events_on_bus() {
        let bus = Bus::new(64);
        let mut rx = bus.subscribe();
        let b: Broker<u32> = Broker::with_bus(BrokerConfig::default().with_name("events"), bus).unwrap();
        let seen: Seen = Arc::default();
        let sub = b
            .subscribe("t", |_: &Message<u32>| true, recorder(&seen), SubscribeOptions::default())
            .unwrap();
        sub.unsubscribe();
        b.delete_topic("t");

        let published: Vec<Event> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(published.iter().all(|e| e.component.as_deref() == Some("events")));
        let kinds: Vec<EventKind> = published.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::TopicCreated,
                EventKind::Subscribed,
                EventKind::Unsubscribed,
                EventKind::TopicDeleted,
            ]
        );
    }
}
