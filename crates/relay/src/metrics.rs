//! Relay throughput counters
//!
//! One instance per link, shared by its dispatcher and workers. Counters are
//! mirrored into the global `metrics` recorder so an exporter sees the
//! aggregate across links.

use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{counter, histogram};

#[derive(Debug, Default)]
pub struct RelayMetrics {
    enqueued: AtomicU64,
    published: AtomicU64,
    publish_errors: AtomicU64,
    batches: AtomicU64,
    fallback_published: AtomicU64,
    dropped: AtomicU64,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// A message was admitted to a shard worker's queue.
    pub fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        counter!("relay_enqueued_total").increment(1);
    }

    /// A batch of `len` messages was handed to the fabric.
    pub fn record_batch(&self, len: usize) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.published.fetch_add(len as u64, Ordering::Relaxed);
        counter!("relay_published_total").increment(len as u64);
        histogram!("relay_batch_size").record(len as f64);
    }

    pub fn record_publish_error(&self) {
        self.publish_errors.fetch_add(1, Ordering::Relaxed);
        counter!("relay_publish_errors_total").increment(1);
    }

    /// A message was published directly on the fallback connection.
    pub fn record_fallback(&self) {
        self.fallback_published.fetch_add(1, Ordering::Relaxed);
        counter!("relay_fallback_published_total").increment(1);
    }

    /// A message was lost (fallback publish failed).
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        counter!("relay_dropped_total").increment(1);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            publish_errors: self.publish_errors.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            fallback_published: self.fallback_published.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a link's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub enqueued: u64,
    pub published: u64,
    pub publish_errors: u64,
    pub batches: u64,
    pub fallback_published: u64,
    pub dropped: u64,
}
