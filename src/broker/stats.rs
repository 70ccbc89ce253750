//! # Broker and subscription counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time broker snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerStats {
    pub topics: usize,
    pub subscribers: usize,
    /// Successful `publish` calls.
    pub published: u64,
    /// Callback invocations that returned `Ok`.
    pub delivered: u64,
    /// Messages discarded by overload policies or by unsubscribe.
    pub dropped: u64,
    /// Callback invocations that returned `Err` or panicked.
    pub failed: u64,
}

/// Point-in-time snapshot of one subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    pub delivered: u64,
    pub dropped: u64,
    pub failed: u64,
    /// Callbacks that exceeded `max_callback_duration`.
    pub slow: u64,
    /// Messages waiting in the inbox right now.
    pub queued: usize,
}

#[derive(Debug, Default)]
pub(crate) struct BrokerCounters {
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

impl BrokerCounters {
    pub(crate) fn published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dropped(&self, n: u64) {
        self.dropped.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, topics: usize, subscribers: usize) -> BrokerStats {
        BrokerStats {
            topics,
            subscribers,
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reads_counters() {
        let c = BrokerCounters::default();
        c.published();
        c.published();
        c.delivered();
        c.dropped(3);
        c.failed();
        let s = c.snapshot(1, 2);
        assert_eq!(
            s,
            BrokerStats {
                topics: 1,
                subscribers: 2,
                published: 2,
                delivered: 1,
                dropped: 3,
                failed: 1,
            }
        );
    }
}
