//! Lifecycle events and the bus that carries them.
//!
//! Pools, breakers and brokers describe what they do as [`Event`]s tagged
//! with an [`EventKind`] and publish them on a [`Bus`]. Nothing in the
//! crate depends on anyone listening: with no receivers, events vanish.
//!
//! | Emitter          | Kinds                                                  |
//! |------------------|--------------------------------------------------------|
//! | `WorkerPool`     | worker spawn/retire, job start/finish, shutdown phases |
//! | `CircuitBreaker` | state transitions, rejected calls                      |
//! | `Broker`         | topic and subscription changes, drops, slow callbacks  |
//! | `ObserverSet`    | observer panics and queue overflow                     |
//!
//! Receivers: [`ObserverSet::attach`](crate::ObserverSet::attach) or a raw
//! [`Bus::subscribe`] handle.

mod bus;
mod event;

pub(crate) use bus::emit;
pub use bus::Bus;
pub use event::{Event, EventKind};
