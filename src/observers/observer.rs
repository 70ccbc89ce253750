//! # The `Observe` trait
//!
//! An observer receives every event published on the bus it is attached
//! to. The [`ObserverSet`](crate::ObserverSet) gives each observer its own
//! bounded queue and worker task, so a slow observer only delays itself.
//!
//! When an observer's queue is full, the event is dropped for that
//! observer alone and an `ObserverOverflow` event is published. Size the
//! queue through [`Observe::queue_capacity`].
//!
//! ## Example
//! ```rust
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use async_trait::async_trait;
//! use concur::{Event, EventKind, Observe};
//!
//! #[derive(Default)]
//! struct DropCounter(AtomicU64);
//!
//! #[async_trait]
//! impl Observe for DropCounter {
//!     async fn on_event(&self, ev: &Event) {
//!         if ev.kind == EventKind::MessageDropped {
//!             self.0.fetch_add(1, Ordering::Relaxed);
//!         }
//!     }
//!     fn name(&self) -> &'static str { "drop-counter" }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Event;

/// Receives runtime events from an [`ObserverSet`](crate::ObserverSet) worker.
///
/// `on_event` runs on the observer's own task; blocking calls inside it
/// stall only that observer, but still tie up a runtime thread.
#[async_trait]
pub trait Observe: Send + Sync + 'static {
    /// Handle a single event.
    async fn on_event(&self, event: &Event);

    /// Name used in overflow and panic events.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Capacity of this observer's queue. Values below 1 are raised to 1.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
