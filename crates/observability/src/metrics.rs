//! Metric registrations for the relay engine
//!
//! The relay crate emits these through the global `metrics` recorder; the
//! names and units are described here once so the Prometheus endpoint
//! exposes them with help text.

use metrics::{describe_counter, describe_histogram, Unit};

pub fn describe_metrics() {
    describe_counter!(
        "relay_enqueued_total",
        Unit::Count,
        "Messages admitted to a shard worker queue"
    );
    describe_counter!(
        "relay_published_total",
        Unit::Count,
        "Messages published on shard connections"
    );
    describe_counter!(
        "relay_publish_errors_total",
        Unit::Count,
        "Publish or flush failures on shard connections"
    );
    describe_counter!(
        "relay_fallback_published_total",
        Unit::Count,
        "Messages published directly on fallback connections"
    );
    describe_counter!(
        "relay_dropped_total",
        Unit::Count,
        "Messages lost after a failed fallback publish"
    );
    describe_histogram!(
        "relay_batch_size",
        Unit::Count,
        "Messages per flushed batch"
    );
}
