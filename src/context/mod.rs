//! Cancellation, deadlines and request-scoped values.
//!
//! A [`Context`] is passed through every blocking operation in the crate.
//! It is a thin layer over [`tokio_util::sync::CancellationToken`]:
//!
//! ```text
//! background()
//!     └─► with_cancel(parent)      child token, explicit CancelHandle
//!           └─► with_timeout(..)   child token + min(own, parent) deadline
//!                 └─► with_value(..)  same signal, extra key/value binding
//! ```
//!
//! ## Rules
//! - Cancellation flows parent → child, never the other way.
//! - A child's deadline is the minimum of its own and its parent's.
//! - The signal fires once; the first recorded reason wins.
//! - Deadlines need no background task: the timer lives inside the
//!   future returned by [`Context::done`], so dropping the waiter or
//!   cancelling the context releases it.

mod handle;
mod values;

pub use handle::{CancelHandle, Context};
pub use crate::error::ContextError;
