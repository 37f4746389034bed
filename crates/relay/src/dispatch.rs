//! Per-link message dispatcher
//!
//! Runs inline on whatever task delivers an inbound message. Resolves the
//! routing key to a shard worker and enqueues there; any resolution failure
//! falls back to a direct publish on the link's dedicated fallback
//! connection. Dispatch never reports an error to its caller.

use std::collections::HashMap;
use std::sync::Arc;

use contracts::{Connection, RelayError, RelayMessage, ShardId, DEFAULT_FLUSH_TIMEOUT};
use tracing::{debug, warn};

use crate::metrics::RelayMetrics;
use crate::ring::Ring;
use crate::worker::WorkerQueue;

/// Routing key for a subject: the first `prefix_len` bytes when that is
/// positive, shorter than the subject, and lands on a character boundary;
/// the full subject otherwise.
pub fn routing_key(subject: &str, prefix_len: usize) -> &str {
    if prefix_len > 0 && prefix_len < subject.len() {
        subject.get(..prefix_len).unwrap_or(subject)
    } else {
        subject
    }
}

pub struct Dispatcher<C: Connection> {
    ring: Arc<Ring>,
    workers: Arc<HashMap<ShardId, WorkerQueue>>,
    fallback: Arc<C>,
    prefix_len: usize,
    load_balance: bool,
    metrics: Arc<RelayMetrics>,
}

// Manual impl: derive would require C: Clone.
impl<C: Connection> Clone for Dispatcher<C> {
    fn clone(&self) -> Self {
        Self {
            ring: Arc::clone(&self.ring),
            workers: Arc::clone(&self.workers),
            fallback: Arc::clone(&self.fallback),
            prefix_len: self.prefix_len,
            load_balance: self.load_balance,
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<C: Connection> Dispatcher<C> {
    pub fn new(
        ring: Arc<Ring>,
        workers: Arc<HashMap<ShardId, WorkerQueue>>,
        fallback: Arc<C>,
        prefix_len: usize,
        load_balance: bool,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            ring,
            workers,
            fallback,
            prefix_len,
            load_balance,
            metrics,
        }
    }

    /// Route one inbound message. Blocks at most for the bounded fallback
    /// flush; shard enqueue is non-blocking.
    pub async fn dispatch(&self, msg: RelayMessage) {
        let msg = match self.try_enqueue(msg) {
            Ok(()) => return,
            Err(msg) => msg,
        };
        self.publish_fallback(msg).await;
    }

    /// Resolve and enqueue; hands the message back on any routing miss.
    fn try_enqueue(&self, msg: RelayMessage) -> Result<(), RelayMessage> {
        let key = routing_key(&msg.subject, self.prefix_len);
        let shard = if self.load_balance {
            self.ring.get_least(key)
        } else {
            self.ring.get(key)
        };
        let Some(shard) = shard else {
            debug!(error = %RelayError::routing_miss(key), "no shard for routing key");
            return Err(msg);
        };
        let Some(queue) = self.workers.get(shard) else {
            debug!(error = %RelayError::routing_miss(key), "no worker for shard");
            return Err(msg);
        };

        let result = if self.load_balance {
            // Counter covers the admission window only.
            self.ring.inc(shard);
            let result = queue.publish(msg);
            self.ring.done(shard);
            result
        } else {
            queue.publish(msg)
        };
        match result {
            Ok(()) => {
                self.metrics.record_enqueued();
                Ok(())
            }
            Err(msg) => Err(msg),
        }
    }

    async fn publish_fallback(&self, msg: RelayMessage) {
        if let Err(e) = self.fallback.publish(&msg.subject, msg.payload).await {
            self.metrics.record_dropped();
            warn!(subject = %msg.subject, error = %e, "fallback publish failed, message dropped");
            return;
        }
        if let Err(e) = self.fallback.flush_timeout(DEFAULT_FLUSH_TIMEOUT).await {
            warn!(subject = %msg.subject, error = %e, "fallback flush failed");
        }
        self.metrics.record_fallback();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::PublishWorker;
    use bytes::Bytes;
    use contracts::{Fabric, Subscription};
    use fabric::{MemoryConnection, MemoryFabric, MemorySubscription};
    use std::time::Duration;
    use tokio::time::timeout;

    async fn recv(sub: &mut MemorySubscription) -> Option<RelayMessage> {
        timeout(Duration::from_millis(500), sub.recv())
            .await
            .ok()
            .flatten()
    }

    async fn sink(fabric: &MemoryFabric, url: &str) -> MemorySubscription {
        let conn = fabric.connect(url).await.unwrap();
        conn.queue_subscribe(">", "sink").await.unwrap()
    }

    #[test]
    fn test_routing_key_prefix() {
        assert_eq!(routing_key("foo.bar", 0), "foo.bar");
        assert_eq!(routing_key("foo.bar", 3), "foo");
        assert_eq!(routing_key("foo.bar", 7), "foo.bar");
        assert_eq!(routing_key("foo.bar", 100), "foo.bar");
    }

    #[test]
    fn test_routing_miss_error_names_the_key() {
        let err = RelayError::routing_miss("sens");
        assert_eq!(err.to_string(), "routing miss for key 'sens'");
    }

    #[test]
    fn test_routing_key_respects_char_boundaries() {
        // 'é' is two bytes; slicing at 1 would split it.
        assert_eq!(routing_key("é.x", 1), "é.x");
    }

    fn empty_dispatcher(fallback: Arc<MemoryConnection>) -> Dispatcher<MemoryConnection> {
        Dispatcher::new(
            Arc::new(Ring::new()),
            Arc::new(HashMap::new()),
            fallback,
            0,
            false,
            Arc::new(RelayMetrics::new()),
        )
    }

    #[tokio::test]
    async fn test_empty_ring_uses_fallback_exactly_once() {
        let fabric = MemoryFabric::new();
        let mut fallback_sink = sink(&fabric, "mem://fallback").await;
        let fallback = Arc::new(fabric.connect("mem://fallback").await.unwrap());
        let dispatcher = empty_dispatcher(fallback);

        dispatcher
            .dispatch(RelayMessage::new("orphan", Bytes::from_static(b"x")))
            .await;

        assert_eq!(recv(&mut fallback_sink).await.unwrap().subject, "orphan");
        assert!(recv(&mut fallback_sink).await.is_none());
        assert_eq!(dispatcher.metrics.snapshot().fallback_published, 1);
    }

    #[tokio::test]
    async fn test_routes_to_shard_workers_not_fallback() {
        let fabric = MemoryFabric::new();
        let mut shard_sinks = Vec::new();
        let mut workers = HashMap::new();
        let mut ring = Ring::new();
        let mut handles = Vec::new();

        // Give each shard its own URL so deliveries are attributable.
        for i in 0..2 {
            let url = format!("mem://shard{i}");
            shard_sinks.push(sink(&fabric, &url).await);
            let conn = Arc::new(fabric.connect(&url).await.unwrap());
            let shard_id = ShardId::generate();
            let worker =
                PublishWorker::spawn(shard_id.clone(), conn, Arc::new(RelayMetrics::new()));
            ring.add(shard_id.clone());
            workers.insert(shard_id, worker.queue());
            handles.push(worker);
        }

        let mut fallback_sink = sink(&fabric, "mem://fallback").await;
        let fallback = Arc::new(fabric.connect("mem://fallback").await.unwrap());
        let dispatcher = Dispatcher::new(
            Arc::new(ring),
            Arc::new(workers),
            fallback,
            0,
            false,
            Arc::new(RelayMetrics::new()),
        );

        for i in 0..100 {
            dispatcher
                .dispatch(RelayMessage::new(format!("k.{i}"), Bytes::new()))
                .await;
        }
        for worker in handles {
            worker.stop().await.unwrap();
        }

        let mut total = 0;
        for shard_sink in &mut shard_sinks {
            let mut count = 0;
            while recv(shard_sink).await.is_some() {
                count += 1;
            }
            assert!(count > 0, "every shard should receive some keys");
            total += count;
        }
        assert_eq!(total, 100);
        assert!(recv(&mut fallback_sink).await.is_none());
        assert_eq!(dispatcher.metrics.snapshot().enqueued, 100);
    }

    #[tokio::test]
    async fn test_same_key_lands_on_same_shard() {
        let fabric = MemoryFabric::new();
        let mut workers = HashMap::new();
        let mut ring = Ring::new();
        let mut handles = Vec::new();
        let mut sinks = Vec::new();

        for i in 0..3 {
            let url = format!("mem://shard{i}");
            sinks.push(sink(&fabric, &url).await);
            let conn = Arc::new(fabric.connect(&url).await.unwrap());
            let shard_id = ShardId::generate();
            let worker =
                PublishWorker::spawn(shard_id.clone(), conn, Arc::new(RelayMetrics::new()));
            ring.add(shard_id.clone());
            workers.insert(shard_id, worker.queue());
            handles.push(worker);
        }

        let fallback = Arc::new(fabric.connect("mem://fallback").await.unwrap());
        // Prefix 4 makes "sens.1" and "sens.2" share a routing key.
        let dispatcher = Dispatcher::new(
            Arc::new(ring),
            Arc::new(workers),
            fallback,
            4,
            false,
            Arc::new(RelayMetrics::new()),
        );

        for i in 0..10 {
            dispatcher
                .dispatch(RelayMessage::new(format!("sens.{i}"), Bytes::new()))
                .await;
        }
        for worker in handles {
            worker.stop().await.unwrap();
        }

        // All ten share the key "sens", so exactly one shard saw traffic.
        let mut non_empty = 0;
        for shard_sink in &mut sinks {
            let mut count = 0;
            while recv(shard_sink).await.is_some() {
                count += 1;
            }
            if count > 0 {
                assert_eq!(count, 10);
                non_empty += 1;
            }
        }
        assert_eq!(non_empty, 1);
    }

    #[tokio::test]
    async fn test_stopped_worker_falls_back() {
        let fabric = MemoryFabric::new();
        let conn = Arc::new(fabric.connect("mem://shard").await.unwrap());
        let shard_id = ShardId::generate();
        let worker = PublishWorker::spawn(shard_id.clone(), conn, Arc::new(RelayMetrics::new()));
        let queue = worker.queue();
        worker.stop().await.unwrap();

        let mut ring = Ring::new();
        ring.add(shard_id.clone());
        let mut fallback_sink = sink(&fabric, "mem://fallback").await;
        let fallback = Arc::new(fabric.connect("mem://fallback").await.unwrap());
        let dispatcher = Dispatcher::new(
            Arc::new(ring),
            Arc::new(HashMap::from([(shard_id, queue)])),
            fallback,
            0,
            false,
            Arc::new(RelayMetrics::new()),
        );

        dispatcher
            .dispatch(RelayMessage::new("stale", Bytes::new()))
            .await;

        assert_eq!(recv(&mut fallback_sink).await.unwrap().subject, "stale");
    }
}
