//! # In-process topic-based publish/subscribe.
//!
//! A [`Broker`] owns named topics. Each [`Subscription`] has a filter, a
//! [`Handler`], and its own bounded inbox drained by a dedicated task, so a
//! slow subscriber only ever affects itself.
//!
//! - Overload: per-subscriber [`OverloadPolicy`] (`DropNewest`, `DropOldest`, `Block`)
//! - Failures: callback errors and panics are counted, logged, published on
//!   the event bus and optionally sent as [`DeliveryFailure`]s
//! - Slow callbacks: bounded by [`SubscribeOptions::max_callback_duration`];
//!   persistent offenders can be evicted ([`BrokerConfig::evict_after_slow`])

mod config;
mod handler;
mod hub;
mod message;
mod stats;
mod subscriber;

pub use config::{BrokerConfig, OverloadPolicy, SubscribeOptions};
pub use handler::{Handler, HandlerFn};
pub use hub::{Broker, Subscription};
pub use message::{DeliveryFailure, Message, PublishReport};
pub use stats::{BrokerStats, SubscriptionStats};
