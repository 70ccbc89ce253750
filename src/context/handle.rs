use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use super::values::ValueNode;
use crate::error::ContextError;

/// Shared cancellation state of one context node.
struct Signal {
    token: CancellationToken,
    deadline: Option<Instant>,
    reason: OnceLock<ContextError>,
    parent: Option<Arc<Signal>>,
}

impl Signal {
    fn root() -> Arc<Self> {
        Arc::new(Self {
            token: CancellationToken::new(),
            deadline: None,
            reason: OnceLock::new(),
            parent: None,
        })
    }

    fn child(parent: &Arc<Signal>, deadline: Option<Instant>) -> Arc<Self> {
        let deadline = match (parent.deadline, deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Arc::new(Self {
            token: parent.token.child_token(),
            deadline,
            reason: OnceLock::new(),
            parent: Some(Arc::clone(parent)),
        })
    }

    /// Records `reason` (first writer wins) and fires the token.
    fn fire(&self, reason: ContextError) {
        let _ = self.reason.set(reason);
        self.token.cancel();
    }

    fn reason(&self) -> Option<ContextError> {
        if let Some(r) = self.reason.get() {
            return Some(*r);
        }
        if self.token.is_cancelled() {
            // Fired through the parent chain; inherit its reason.
            let inherited = self
                .parent
                .as_ref()
                .and_then(|p| p.reason())
                .unwrap_or(ContextError::Cancelled);
            let _ = self.reason.set(inherited);
            return self.reason.get().copied();
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            self.fire(ContextError::DeadlineExceeded);
            return self.reason.get().copied();
        }
        None
    }
}

/// # Cancellation / deadline / value handle.
///
/// Cheap to clone; clones observe the same signal. See the
/// [module docs](crate::context) for the propagation rules.
///
/// ## Example
/// ```rust
/// use std::time::Duration;
/// use concur::{Context, ContextError};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let root = Context::background();
/// let (ctx, cancel) = root.with_timeout(Duration::from_secs(30));
/// let ctx = ctx.with_value("request_id", 42u64);
///
/// assert_eq!(ctx.value::<u64>("request_id").as_deref(), Some(&42));
/// cancel.cancel();
/// assert_eq!(ctx.done().await, ContextError::Cancelled);
/// # }
/// ```
#[derive(Clone)]
pub struct Context {
    signal: Arc<Signal>,
    values: Option<Arc<ValueNode>>,
}

/// Fires the signal of the context it was created with.
///
/// Calling [`cancel`](CancelHandle::cancel) more than once is a no-op.
/// Dropping the handle does **not** cancel.
#[derive(Clone)]
pub struct CancelHandle {
    signal: Arc<Signal>,
}

impl CancelHandle {
    /// Fires the context with [`ContextError::Cancelled`].
    pub fn cancel(&self) {
        self.signal.fire(ContextError::Cancelled);
    }

    /// Returns `true` once the associated context is done (for any reason).
    pub fn is_cancelled(&self) -> bool {
        self.signal.reason().is_some()
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl Context {
    /// Root context: never cancels, has no deadline and no values.
    pub fn background() -> Self {
        Self {
            signal: Signal::root(),
            values: None,
        }
    }

    /// Derives a child that fires when `cancel` is called or the parent fires.
    pub fn with_cancel(&self) -> (Context, CancelHandle) {
        self.derive(None)
    }

    /// Derives a child that also fires at `deadline`.
    ///
    /// The effective deadline is `min(deadline, parent deadline)`.
    pub fn with_deadline(&self, deadline: Instant) -> (Context, CancelHandle) {
        self.derive(Some(deadline))
    }

    /// Same as [`with_deadline`](Self::with_deadline) at `now + timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> (Context, CancelHandle) {
        self.derive(Some(Instant::now() + timeout))
    }

    /// Derives a child answering `value(key)` with `value`.
    ///
    /// The child shares the parent's signal; only the value chain grows.
    pub fn with_value<V>(&self, key: impl Into<Cow<'static, str>>, value: V) -> Context
    where
        V: Any + Send + Sync,
    {
        Context {
            signal: Arc::clone(&self.signal),
            values: Some(ValueNode::push(
                self.values.clone(),
                key.into(),
                Arc::new(value),
            )),
        }
    }

    fn derive(&self, deadline: Option<Instant>) -> (Context, CancelHandle) {
        let signal = Signal::child(&self.signal, deadline);
        let handle = CancelHandle {
            signal: Arc::clone(&signal),
        };
        (
            Context {
                signal,
                values: self.values.clone(),
            },
            handle,
        )
    }

    /// Looks up `key` through the value chain.
    ///
    /// Returns `None` when the key is unbound or bound to a different type.
    pub fn value<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let found = self.values.as_ref()?.lookup(key)?;
        Arc::clone(found).downcast::<T>().ok()
    }

    /// Effective deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.signal.deadline
    }

    /// Time left until the deadline (`Some(ZERO)` once it has passed).
    pub fn remaining(&self) -> Option<Duration> {
        self.signal
            .deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Reason the context is done, or `None` while it is still live.
    pub fn err(&self) -> Option<ContextError> {
        self.signal.reason()
    }

    /// `true` once the context is done.
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Waits until the context is done and returns the reason.
    ///
    /// Never completes for [`Context::background`].
    pub async fn done(&self) -> ContextError {
        if let Some(reason) = self.err() {
            return reason;
        }
        match self.signal.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.signal.token.cancelled() => {}
                    _ = time::sleep_until(deadline) => {}
                }
            }
            None => self.signal.token.cancelled().await,
        }
        self.err().unwrap_or(ContextError::Cancelled)
    }

    /// Races `fut` against [`done`](Self::done).
    ///
    /// If the context is already done, `fut` is never polled.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, ContextError> {
        tokio::select! {
            biased;
            reason = self.done() => Err(reason),
            out = fut => Ok(out),
        }
    }

    /// Sleeps for `dur` unless the context fires first.
    pub async fn sleep(&self, dur: Duration) -> Result<(), ContextError> {
        self.run(time::sleep(dur)).await
    }

    /// Sleeps until `at` unless the context fires first.
    pub async fn sleep_until(&self, at: Instant) -> Result<(), ContextError> {
        self.run(time::sleep_until(at)).await
    }

    /// A child token for code that speaks [`CancellationToken`].
    ///
    /// The token fires on cancellation; a deadline fires it only once the
    /// deadline has been observed through this context.
    pub fn token(&self) -> CancellationToken {
        let _ = self.err();
        self.signal.token.child_token()
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::background()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("deadline", &self.signal.deadline)
            .field("err", &self.err())
            .field("values", &self.values)
            .finish()
    }
}
