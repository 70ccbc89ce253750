//! # Non-blocking event fan-out to multiple observers.
//!
//! ```text
//! emit(event)
//!     │
//!     ├──► [queue 1] ──► worker 1 ──► observer1.on_event()
//!     │    (bounded)         └──────► panic → ObserverPanicked
//!     ├──► [queue 2] ──► worker 2 ──► observer2.on_event()
//!     └──► [queue N] ──► worker N ──► observerN.on_event()
//! ```
//!
//! ## Rules
//! - **Per-observer FIFO**, no cross-observer ordering
//! - **Overflow**: event dropped for that observer only, `ObserverOverflow` published
//! - **Non-blocking**: `emit()` uses `try_send`
//! - **Isolation**: a slow or panicking observer doesn't affect others
//!
//! **Warning**: `AssertUnwindSafe` is used; an observer that panics while
//! holding a lock on shared state may leave that state inconsistent.

use std::sync::{Arc, Mutex};

use futures::FutureExt;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::panic_message;
use crate::events::{Bus, Event};
use crate::observers::Observe;

struct ObserverChannel {
    name: &'static str,
    sender: mpsc::Sender<Arc<Event>>,
}

/// Fan-out coordinator for event observers.
pub struct ObserverSet {
    channels: Vec<ObserverChannel>,
    workers: Vec<JoinHandle<()>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    bus: Bus,
}

impl ObserverSet {
    /// Creates the set and spawns one worker task per observer.
    ///
    /// Failures of the observers themselves are reported on `bus`.
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(observers: Vec<Arc<dyn Observe>>, bus: Bus) -> Self {
        let mut channels = Vec::with_capacity(observers.len());
        let mut workers = Vec::with_capacity(observers.len());

        for obs in observers {
            let name = obs.name();
            let (tx, mut rx) = mpsc::channel::<Arc<Event>>(obs.queue_capacity().max(1));
            let bus_for_worker = bus.clone();

            let handle = tokio::spawn(async move {
                while let Some(ev) = rx.recv().await {
                    let fut = obs.on_event(ev.as_ref());
                    if let Err(payload) = std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                        let info = panic_message(payload.as_ref());
                        warn!(observer = obs.name(), %info, "observer panicked");
                        bus_for_worker.publish(Event::observer_panicked(obs.name(), info));
                    }
                }
            });
            channels.push(ObserverChannel { name, sender: tx });
            workers.push(handle);
        }
        Self {
            channels,
            workers,
            listener: Mutex::new(None),
            bus,
        }
    }

    /// Creates the set and wires it to `bus` in one step.
    pub fn attached(observers: Vec<Arc<dyn Observe>>, bus: &Bus) -> Arc<Self> {
        let set = Arc::new(Self::new(observers, bus.clone()));
        Arc::clone(&set).attach();
        set
    }

    /// Spawns a listener forwarding every bus event into [`emit`](Self::emit).
    ///
    /// Calling it again replaces the previous listener.
    pub fn attach(self: Arc<Self>) {
        let mut rx = self.bus.subscribe();
        let me = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ev) => me.emit_arc(Arc::new(ev)),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!(skipped = n, "observer listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        let mut slot = self
            .listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }

    /// Emits an event to all observers (clones the event).
    pub fn emit(&self, event: &Event) {
        self.emit_arc(Arc::new(event.clone()));
    }

    /// Emits a pre-allocated `Arc<Event>` to all observers.
    ///
    /// Observer-failure events are never re-reported when they overflow,
    /// which prevents feedback loops through the bus.
    pub fn emit_arc(&self, event: Arc<Event>) {
        let is_failure_evt = event.is_observer_failure();

        for channel in &self.channels {
            let reason = match channel.sender.try_send(Arc::clone(&event)) {
                Ok(()) => continue,
                Err(mpsc::error::TrySendError::Full(_)) => "full",
                Err(mpsc::error::TrySendError::Closed(_)) => "closed",
            };
            if !is_failure_evt {
                self.bus
                    .publish(Event::observer_overflow(channel.name, reason));
            }
        }
    }

    /// Number of observers in the set.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// `true` when the set has no observers.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Stops the listener, closes every queue and waits for the workers to
    /// drain what was already queued.
    pub async fn shutdown(self) {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(h) = listener {
            h.abort();
        }
        drop(self.channels);
        for h in self.workers {
            let _ = h.await;
        }
    }
}
