//! # Published messages and delivery reports.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use crate::error::CallbackError;

/// An immutable published message, shared by every subscriber that receives it.
#[derive(Debug)]
pub struct Message<P> {
    /// Unique within the broker.
    pub id: u64,
    pub topic: Arc<str>,
    pub payload: P,
    pub timestamp: SystemTime,
    pub metadata: HashMap<String, String>,
}

impl<P> Message<P> {
    /// Looks up a metadata entry.
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

/// What happened to one `publish` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub message_id: u64,
    /// Subscribers that queued the message.
    pub enqueued: usize,
    /// Subscribers whose filter rejected it.
    pub filtered_out: usize,
    /// Messages discarded by overload policies (this one, or older ones evicted for it).
    pub dropped: usize,
}

/// A failed or slow delivery, sent to the subscription's error channel.
#[derive(Debug)]
pub struct DeliveryFailure {
    pub subscriber: u64,
    pub topic: Arc<str>,
    pub message_id: u64,
    pub error: CallbackError,
}
