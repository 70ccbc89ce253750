//! # Subscriber callbacks.
//!
//! Implement [`Handler`] for stateful consumers, or wrap a closure in
//! [`HandlerFn`].
//!
//! ```rust
//! use std::sync::Arc;
//! use concur::{BoxError, Context, HandlerFn, Message};
//!
//! let printer = HandlerFn::new(|_ctx: Context, msg: Arc<Message<String>>| async move {
//!     println!("{}: {}", msg.topic, msg.payload);
//!     Ok::<_, BoxError>(())
//! });
//! # let _ = printer;
//! ```

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::broker::Message;
use crate::context::Context;
use crate::error::BoxError;

/// Consumer of messages delivered to one subscription.
///
/// Called from the subscription's dispatch task, one message at a time, in
/// publish order. An `Err` is counted and reported; it never unsubscribes.
#[async_trait]
pub trait Handler<P: Send + Sync + 'static>: Send + Sync + 'static {
    async fn handle(&self, ctx: Context, msg: Arc<Message<P>>) -> Result<(), BoxError>;
}

/// Closure-backed [`Handler`].
#[derive(Debug, Clone)]
pub struct HandlerFn<F> {
    f: F,
}

impl<F> HandlerFn<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<P, F, Fut, E> Handler<P> for HandlerFn<F>
where
    P: Send + Sync + 'static,
    F: Fn(Context, Arc<Message<P>>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send,
    E: Into<BoxError> + Send,
{
    async fn handle(&self, ctx: Context, msg: Arc<Message<P>>) -> Result<(), BoxError> {
        (self.f)(ctx, msg).await.map_err(Into::into)
    }
}
