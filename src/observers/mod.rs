//! # Event observers.
//!
//! - [`Observe`]: trait for custom event handlers
//! - [`ObserverSet`]: bounded, panic-isolated fan-out from a [`Bus`](crate::Bus)
//! - [`LogWriter`]: `tracing` renderer (feature `logging`)
//!
//! ```text
//! Bus ──► ObserverSet listener ──► per-observer queue ──► worker ──► on_event()
//! ```

#[cfg(feature = "logging")]
mod log;
mod observer;
mod set;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use observer::Observe;
pub use set::ObserverSet;
