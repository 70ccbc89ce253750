//! Error types shared by every primitive in the crate.
//!
//! - [`Error`]: the taxonomy surfaced to callers (context, admission,
//!   configuration and callback failures).
//! - [`ContextError`]: the reason a [`Context`](crate::Context) fired.
//! - [`CallbackError`]: a user function failed or panicked.
//!
//! All enums provide `as_label` for logs/metrics.

use std::any::Any;
use std::time::Duration;

use thiserror::Error;

/// Boxed error returned by user callbacks and jobs.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Reason a context is done.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextError {
    /// The cancel signal fired (explicitly or through a parent).
    #[error("context cancelled")]
    Cancelled,

    /// The context deadline elapsed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

impl ContextError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ContextError::Cancelled => "cancelled",
            ContextError::DeadlineExceeded => "deadline_exceeded",
        }
    }
}

/// Failure of a user-supplied function (job, stage, subscriber callback).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum CallbackError {
    /// The function returned an error; it is carried unchanged.
    #[error("callback failed: {0}")]
    Failed(#[source] BoxError),

    /// The function panicked; the panic payload is rendered as text.
    #[error("callback panicked: {0}")]
    Panicked(String),

    /// The function ran longer than its configured upper bound.
    #[error("callback exceeded {limit:?}")]
    TimedOut {
        /// The configured bound.
        limit: Duration,
    },
}

impl CallbackError {
    /// Wraps any error value.
    pub fn failed(err: impl Into<BoxError>) -> Self {
        CallbackError::Failed(err.into())
    }

    /// Builds a [`CallbackError::Panicked`] from a `catch_unwind` payload.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        CallbackError::Panicked(panic_message(payload.as_ref()))
    }

    /// Returns the underlying error of a [`CallbackError::Failed`].
    pub fn source_error(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            CallbackError::Failed(e) => Some(e.as_ref()),
            _ => None,
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            CallbackError::Failed(_) => "callback_failed",
            CallbackError::Panicked(_) => "callback_panicked",
            CallbackError::TimedOut { .. } => "callback_timed_out",
        }
    }
}

/// # Errors surfaced by the concurrency primitives.
///
/// Context errors propagate outward unchanged and admission errors
/// (`QueueFull`, `CircuitOpen`, `ShuttingDown`) are immediate.
/// `InvalidConfig` comes from constructors, from oversized limiter
/// requests, and from the terminal step of a mis-sized pipeline.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum Error {
    /// The context's cancel signal fired.
    #[error("cancelled")]
    Cancelled,

    /// The context's deadline elapsed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// A nonblocking submit or publish could not enqueue.
    #[error("queue full")]
    QueueFull,

    /// The circuit breaker refused the call.
    #[error("circuit open")]
    CircuitOpen,

    /// Configuration violates its stated bounds.
    #[error("invalid config: {reason}")]
    InvalidConfig {
        /// What was wrong.
        reason: String,
    },

    /// The pool or broker no longer accepts work.
    #[error("shutting down")]
    ShuttingDown,

    /// Publish to a topic that does not exist.
    #[error("unknown topic {topic:?}")]
    UnknownTopic {
        /// Requested topic name.
        topic: String,
    },

    /// A user callback or job failed.
    #[error(transparent)]
    Callback(#[from] CallbackError),
}

impl Error {
    /// Shorthand for [`Error::InvalidConfig`].
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Error::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use concur::Error;
    ///
    /// assert_eq!(Error::CircuitOpen.as_label(), "circuit_open");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            Error::Cancelled => "cancelled",
            Error::DeadlineExceeded => "deadline_exceeded",
            Error::QueueFull => "queue_full",
            Error::CircuitOpen => "circuit_open",
            Error::InvalidConfig { .. } => "invalid_config",
            Error::ShuttingDown => "shutting_down",
            Error::UnknownTopic { .. } => "unknown_topic",
            Error::Callback(e) => e.as_label(),
        }
    }

    /// Returns the context reason if this error came from a fired context.
    pub fn as_context(&self) -> Option<ContextError> {
        match self {
            Error::Cancelled => Some(ContextError::Cancelled),
            Error::DeadlineExceeded => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// `true` for `Cancelled` and `DeadlineExceeded`.
    pub fn is_context(&self) -> bool {
        self.as_context().is_some()
    }

    /// Indicates whether the caller may reasonably retry later.
    ///
    /// Returns `true` for [`Error::QueueFull`] and [`Error::CircuitOpen`];
    /// the core itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::QueueFull | Error::CircuitOpen)
    }
}

impl From<ContextError> for Error {
    fn from(e: ContextError) -> Self {
        match e {
            ContextError::Cancelled => Error::Cancelled,
            ContextError::DeadlineExceeded => Error::DeadlineExceeded,
        }
    }
}

/// Renders a panic payload as text.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("disk on fire")]
    struct DiskError;

    #[test]
    fn callback_error_keeps_source_downcastable() {
        let err = Error::from(CallbackError::failed(DiskError));
        let Error::Callback(cb) = &err else {
            panic!("expected callback error, got {err:?}");
        };
        let src = cb.source_error().expect("source present");
        assert!(src.downcast_ref::<DiskError>().is_some());
        assert_eq!(err.as_label(), "callback_failed");
    }

    #[test]
    fn context_errors_round_trip() {
        for ce in [ContextError::Cancelled, ContextError::DeadlineExceeded] {
            let err = Error::from(ce);
            assert!(err.is_context());
            assert_eq!(err.as_context(), Some(ce));
            assert_eq!(err.as_label(), ce.as_label());
        }
        assert!(!Error::QueueFull.is_context());
    }

    #[test]
    fn panic_payloads_render() {
        let p: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(CallbackError::from_panic(p).to_string(), "callback panicked: boom");
        let p: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert!(matches!(CallbackError::from_panic(p), CallbackError::Panicked(m) if m == "owned"));
        let p: Box<dyn Any + Send> = Box::new(7u8);
        assert!(matches!(CallbackError::from_panic(p), CallbackError::Panicked(m) if m == "unknown panic"));
    }

    #[test]
    fn retryable_kinds() {
        assert!(Error::QueueFull.is_retryable());
        assert!(Error::CircuitOpen.is_retryable());
        assert!(!Error::ShuttingDown.is_retryable());
        assert!(!Error::invalid_config("x").is_retryable());
    }
}
