//! # Broker and subscription settings.

use std::sync::Arc;
use std::time::Duration;

use crate::error::Error;

/// What a subscriber's full queue does with a new message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum OverloadPolicy {
    /// Discard the new message for this subscriber (default).
    #[default]
    DropNewest,
    /// Evict the oldest queued message to make room.
    DropOldest,
    /// Make `publish` wait for room, under the publisher's context.
    Block,
}

impl OverloadPolicy {
    /// Returns a short stable label (kebab-case).
    pub fn as_label(&self) -> &'static str {
        match self {
            OverloadPolicy::DropNewest => "drop-newest",
            OverloadPolicy::DropOldest => "drop-oldest",
            OverloadPolicy::Block => "block",
        }
    }
}

/// Per-subscription settings.
///
/// ## Field semantics
/// - `queue_depth`: bounded inbox size (`>= 1`)
/// - `overload_policy`: behaviour when the inbox is full
/// - `max_callback_duration`: callbacks running longer are logged, counted
///   and reported as `CallbackError::TimedOut` (they are not interrupted)
/// - `error_channel_capacity`: when set, failures are also sent to a channel
///   obtained with [`Subscription::take_errors`](crate::Subscription::take_errors)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeOptions {
    pub queue_depth: usize,
    pub overload_policy: OverloadPolicy,
    pub max_callback_duration: Option<Duration>,
    pub error_channel_capacity: Option<usize>,
}

impl Default for SubscribeOptions {
    /// `queue_depth = 64`, `DropNewest`, no callback bound, no error channel.
    fn default() -> Self {
        Self {
            queue_depth: 64,
            overload_policy: OverloadPolicy::DropNewest,
            max_callback_duration: None,
            error_channel_capacity: None,
        }
    }
}

impl SubscribeOptions {
    #[must_use]
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    #[must_use]
    pub fn with_overload_policy(mut self, policy: OverloadPolicy) -> Self {
        self.overload_policy = policy;
        self
    }

    #[must_use]
    pub fn with_max_callback_duration(mut self, limit: Duration) -> Self {
        self.max_callback_duration = Some(limit);
        self
    }

    #[must_use]
    pub fn with_error_channel(mut self, capacity: usize) -> Self {
        self.error_channel_capacity = Some(capacity);
        self
    }

    /// Checks the documented bounds.
    pub fn validate(&self) -> Result<(), Error> {
        if self.queue_depth < 1 {
            return Err(Error::invalid_config("subscriber queue_depth must be >= 1"));
        }
        if self.max_callback_duration.is_some_and(|d| d.is_zero()) {
            return Err(Error::invalid_config(
                "subscriber max_callback_duration must be > 0",
            ));
        }
        if self.error_channel_capacity == Some(0) {
            return Err(Error::invalid_config(
                "subscriber error_channel_capacity must be >= 1",
            ));
        }
        Ok(())
    }
}

/// Broker-wide settings.
///
/// - `name`: label used in events and logs
/// - `evict_after_slow`: auto-unsubscribe a subscriber after this many
///   consecutive slow callbacks (`None` = never)
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub name: Arc<str>,
    pub evict_after_slow: Option<u32>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            name: Arc::from("broker"),
            evict_after_slow: None,
        }
    }
}

impl BrokerConfig {
    #[must_use]
    pub fn with_name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_evict_after_slow(mut self, n: u32) -> Self {
        self.evict_after_slow = Some(n);
        self
    }

    /// Checks the documented bounds.
    pub fn validate(&self) -> Result<(), Error> {
        if self.evict_after_slow == Some(0) {
            return Err(Error::invalid_config("broker evict_after_slow must be >= 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_bounds() {
        assert!(SubscribeOptions::default().validate().is_ok());
        assert!(SubscribeOptions::default().with_queue_depth(0).validate().is_err());
        assert!(SubscribeOptions::default()
            .with_max_callback_duration(Duration::ZERO)
            .validate()
            .is_err());
        assert!(SubscribeOptions::default().with_error_channel(0).validate().is_err());
    }

    #[test]
    fn broker_bounds() {
        assert!(BrokerConfig::default().validate().is_ok());
        assert!(BrokerConfig::default().with_evict_after_slow(0).validate().is_err());
    }
}
