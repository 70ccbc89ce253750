//! # Event bus for broadcasting runtime events.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`]. Pools,
//! breakers and brokers publish to it; an
//! [`ObserverSet`](crate::ObserverSet) (or any other receiver) consumes.
//!
//! ```text
//! Publishers (many):                      Receivers:
//!   WorkerPool     ──┐
//!   CircuitBreaker ──┼──────► Bus ───────► ObserverSet listener ──► observers
//!   Broker         ──┘  (broadcast chan)   user receivers (subscribe())
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never blocks and never fails.
//! - **Bounded capacity**: one ring buffer shared by all receivers.
//! - **Lag handling**: slow receivers get `RecvError::Lagged(n)` and skip `n` items.
//! - **No persistence**: events sent while nobody listens are lost.
//! - Publishers never hold their own state lock while publishing.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for runtime events.
///
/// Cheap to clone (internally holds an `Arc`-backed sender).
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity (clamped to at least 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to all active receivers; dropped if there are none.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a new receiver that observes events sent after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Number of live receivers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Bus {
    /// A bus with capacity 1024.
    fn default() -> Self {
        Bus::new(1024)
    }
}

/// Publishes through an optional bus; used by components built without one.
pub(crate) fn emit(bus: &Option<Bus>, ev: impl FnOnce() -> Event) {
    if let Some(bus) = bus {
        bus.publish(ev());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[tokio::test]
    async fn receivers_see_events_after_subscribe() {
        let bus = Bus::new(0);
        bus.publish(Event::new(EventKind::TopicCreated));
        let mut rx = bus.subscribe();
        bus.publish(Event::new(EventKind::TopicDeleted));
        let ev = rx.recv().await.expect("event");
        assert_eq!(ev.kind, EventKind::TopicDeleted);
    }

    #[test]
    fn emit_is_lazy_without_bus() {
        let mut built = false;
        emit(&None, || {
            built = true;
            Event::new(EventKind::JobStarted)
        });
        assert!(!built);
    }
}
