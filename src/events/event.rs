//! # Runtime events emitted by pools, breakers and brokers.
//!
//! [`EventKind`] groups events in four families:
//! - **Pool**: worker lifecycle, job outcomes, shutdown phases
//! - **Breaker**: state transitions and rejected calls
//! - **Broker**: topic/subscription lifecycle and delivery problems
//! - **Observer**: problems inside observers themselves
//!
//! [`Event`] carries a global sequence number, a wall-clock timestamp and
//! optional metadata filled in depending on the kind.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use concur::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::JobFailed)
//!     .with_component("ingest")
//!     .with_job(7)
//!     .with_reason("boom")
//!     .with_duration(Duration::from_millis(12));
//!
//! assert_eq!(ev.kind, EventKind::JobFailed);
//! assert_eq!(ev.component.as_deref(), Some("ingest"));
//! assert_eq!(ev.duration_ms, Some(12));
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Pool ===
    /// A worker task was started (`worker`).
    WorkerSpawned,
    /// A worker exited after its idle cooldown or at shutdown (`worker`, `reason`).
    WorkerRetired,
    /// A job began running (`worker`, `job`).
    JobStarted,
    /// A job finished successfully (`worker`, `job`, `duration_ms`).
    JobCompleted,
    /// A job returned an error or panicked (`worker`, `job`, `reason`).
    JobFailed,
    /// A job was cancelled before or while running (`job`, `reason`).
    JobCancelled,
    /// `shutdown` was called (`duration_ms` = grace).
    ShutdownRequested,
    /// Every worker stopped within the grace period.
    AllStoppedWithinGrace,
    /// Grace elapsed; running job contexts were cancelled (`reason`).
    GraceExceeded,

    // === Breaker ===
    /// Breaker tripped open (`reason`, `duration_ms` = open period).
    BreakerOpened,
    /// Breaker admitted a probe.
    BreakerHalfOpen,
    /// Breaker closed after a successful probe (or a manual reset).
    BreakerClosed,
    /// A call was refused without invoking the function.
    CallRejected,

    // === Broker ===
    /// Topic created (`topic`).
    TopicCreated,
    /// Topic deleted (`topic`).
    TopicDeleted,
    /// Subscriber attached (`topic`, `subscriber`).
    Subscribed,
    /// Subscriber detached (`topic`, `subscriber`).
    Unsubscribed,
    /// Overload policy discarded a message (`topic`, `subscriber`, `reason`).
    MessageDropped,
    /// Subscriber callback failed (`topic`, `subscriber`, `reason`).
    CallbackFailed,
    /// Subscriber callback ran longer than its bound (`duration_ms` = bound).
    CallbackSlow,
    /// Subscriber removed for being persistently slow.
    SubscriberEvicted,

    // === Observers ===
    /// An observer panicked while handling an event (`component` = observer).
    ObserverPanicked,
    /// An observer's queue was full; event dropped for it (`component`, `reason`).
    ObserverOverflow,
}

impl EventKind {
    /// Returns a short stable label (kebab-case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            EventKind::WorkerSpawned => "worker-spawned",
            EventKind::WorkerRetired => "worker-retired",
            EventKind::JobStarted => "job-started",
            EventKind::JobCompleted => "job-completed",
            EventKind::JobFailed => "job-failed",
            EventKind::JobCancelled => "job-cancelled",
            EventKind::ShutdownRequested => "shutdown-requested",
            EventKind::AllStoppedWithinGrace => "all-stopped-within-grace",
            EventKind::GraceExceeded => "grace-exceeded",
            EventKind::BreakerOpened => "breaker-opened",
            EventKind::BreakerHalfOpen => "breaker-half-open",
            EventKind::BreakerClosed => "breaker-closed",
            EventKind::CallRejected => "call-rejected",
            EventKind::TopicCreated => "topic-created",
            EventKind::TopicDeleted => "topic-deleted",
            EventKind::Subscribed => "subscribed",
            EventKind::Unsubscribed => "unsubscribed",
            EventKind::MessageDropped => "message-dropped",
            EventKind::CallbackFailed => "callback-failed",
            EventKind::CallbackSlow => "callback-slow",
            EventKind::SubscriberEvicted => "subscriber-evicted",
            EventKind::ObserverPanicked => "observer-panicked",
            EventKind::ObserverOverflow => "observer-overflow",
        }
    }
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Name of the emitting pool/breaker/broker/observer.
    pub component: Option<Arc<str>>,
    /// Worker id (pool events).
    pub worker: Option<u64>,
    /// Job id (pool events).
    pub job: Option<u64>,
    /// Topic name (broker events).
    pub topic: Option<Arc<str>>,
    /// Subscriber id (broker events).
    pub subscriber: Option<u64>,
    /// Human-readable reason (errors, drop policy, etc.).
    pub reason: Option<Arc<str>>,
    /// A duration relevant to the kind, in milliseconds (compact).
    pub duration_ms: Option<u32>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            component: None,
            worker: None,
            job: None,
            topic: None,
            subscriber: None,
            reason: None,
            duration_ms: None,
        }
    }

    /// Attaches the emitting component's name.
    #[inline]
    pub fn with_component(mut self, name: impl Into<Arc<str>>) -> Self {
        self.component = Some(name.into());
        self
    }

    /// Attaches a worker id.
    #[inline]
    pub fn with_worker(mut self, id: u64) -> Self {
        self.worker = Some(id);
        self
    }

    /// Attaches a job id.
    #[inline]
    pub fn with_job(mut self, id: u64) -> Self {
        self.job = Some(id);
        self
    }

    /// Attaches a topic name.
    #[inline]
    pub fn with_topic(mut self, topic: impl Into<Arc<str>>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Attaches a subscriber id.
    #[inline]
    pub fn with_subscriber(mut self, id: u64) -> Self {
        self.subscriber = Some(id);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a duration (stored as milliseconds, saturating).
    #[inline]
    pub fn with_duration(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.duration_ms = Some(ms);
        self
    }

    /// Creates an observer overflow event.
    #[inline]
    pub fn observer_overflow(observer: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::ObserverOverflow)
            .with_component(observer)
            .with_reason(reason)
    }

    /// Creates an observer panic event.
    #[inline]
    pub fn observer_panicked(observer: &'static str, info: String) -> Self {
        Event::new(EventKind::ObserverPanicked)
            .with_component(observer)
            .with_reason(info)
    }

    /// `true` for events describing observer failures.
    #[inline]
    pub fn is_observer_failure(&self) -> bool {
        matches!(
            self.kind,
            EventKind::ObserverOverflow | EventKind::ObserverPanicked
        )
    }
}
