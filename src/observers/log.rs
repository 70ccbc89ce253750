//! # LogWriter: renders runtime events through `tracing`.
//!
//! Failures and drops go out at `warn`, lifecycle changes at `info`,
//! per-job chatter at `debug`.
//!
//! ## Example output (fmt subscriber)
//! ```text
//! INFO  concur: breaker-opened component="payments" reason="5 consecutive failures" open_ms=1000
//! WARN  concur: message-dropped topic="orders" subscriber=3 reason="drop-oldest"
//! DEBUG concur: job-completed component="pool" worker=2 job=41 duration_ms=12
//! ```

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::events::{Event, EventKind};
use crate::observers::Observe;

/// Observer that logs every event.
///
/// Enabled via the `logging` feature.
#[derive(Debug)]
pub struct LogWriter {
    capacity: usize,
}

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self { capacity: 2048 }
    }

    /// Configure the queue capacity for this observer.
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }
}

impl Default for LogWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Observe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let label = e.kind.as_label();
        let component = e.component.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");
        match e.kind {
            EventKind::JobStarted | EventKind::JobCompleted => {
                debug!(
                    target: "concur",
                    component,
                    worker = e.worker,
                    job = e.job,
                    duration_ms = e.duration_ms,
                    "{label}"
                );
            }
            EventKind::JobFailed
            | EventKind::JobCancelled
            | EventKind::GraceExceeded
            | EventKind::CallRejected
            | EventKind::MessageDropped
            | EventKind::CallbackFailed
            | EventKind::CallbackSlow
            | EventKind::SubscriberEvicted
            | EventKind::ObserverPanicked
            | EventKind::ObserverOverflow => {
                warn!(
                    target: "concur",
                    component,
                    job = e.job,
                    topic = e.topic.as_deref(),
                    subscriber = e.subscriber,
                    reason,
                    "{label}"
                );
            }
            EventKind::BreakerOpened => {
                info!(target: "concur", component, reason, open_ms = e.duration_ms, "{label}");
            }
            EventKind::TopicCreated
            | EventKind::TopicDeleted
            | EventKind::Subscribed
            | EventKind::Unsubscribed => {
                info!(
                    target: "concur",
                    topic = e.topic.as_deref(),
                    subscriber = e.subscriber,
                    "{label}"
                );
            }
            EventKind::WorkerSpawned
            | EventKind::WorkerRetired
            | EventKind::ShutdownRequested
            | EventKind::AllStoppedWithinGrace
            | EventKind::BreakerHalfOpen
            | EventKind::BreakerClosed => {
                info!(target: "concur", component, worker = e.worker, reason, "{label}");
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }

    fn queue_capacity(&self) -> usize {
        self.capacity
    }
}
