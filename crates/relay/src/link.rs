//! Link: one (source, topic) pairing actively relaying to a set of shards
//!
//! A link owns its source subscription set (handler replicas sharing one
//! queue group), N shard workers registered on a hash ring, and a fallback
//! connection. Lifecycle runs `Created -> Active -> Draining -> Closed`
//! under the link mutex; transitions are idempotent.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use contracts::{
    Connection, ConnectionFactory, Fabric, RelayError, ShardId, Subscription, TopicConfig,
    DEFAULT_FLUSH_TIMEOUT,
};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dispatch::Dispatcher;
use crate::metrics::RelayMetrics;
use crate::ring::Ring;
use crate::worker::PublishWorker;

/// Which configured source a link subscribes against. Logging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceRole {
    Primary,
    Secondary,
}

impl fmt::Display for SourceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceRole::Primary => f.write_str("primary"),
            SourceRole::Secondary => f.write_str("secondary"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Created,
    Active,
    Draining,
    Closed,
}

/// Connection factory that opens every shard and fallback connection
/// against one destination URL.
pub struct DestinationFactory<F: Fabric> {
    fabric: Arc<F>,
    url: String,
}

impl<F: Fabric> DestinationFactory<F> {
    pub fn new(fabric: Arc<F>, url: impl Into<String>) -> Self {
        Self {
            fabric,
            url: url.into(),
        }
    }
}

impl<F: Fabric + 'static> ConnectionFactory for DestinationFactory<F> {
    type Connection = F::Connection;

    async fn connect(&self, index: usize) -> Result<F::Connection, RelayError> {
        debug!(index, url = %self.url, "opening destination connection");
        self.fabric.connect(&self.url).await
    }
}

pub struct Link<S, F>
where
    S: Connection + 'static,
    F: ConnectionFactory + 'static,
{
    role: SourceRole,
    topic: String,
    group: String,
    config: TopicConfig,
    source: Arc<S>,
    factory: F,
    metrics: Arc<RelayMetrics>,
    fault_tx: watch::Sender<Option<String>>,
    inner: Mutex<Inner<F::Connection>>,
}

struct Inner<C: Connection + 'static> {
    state: LinkState,
    workers: Vec<PublishWorker<C>>,
    fallback: Option<Arc<C>>,
    stop_tx: Option<watch::Sender<bool>>,
    handlers: Vec<JoinHandle<Result<(), RelayError>>>,
}

impl<S, F> Link<S, F>
where
    S: Connection + 'static,
    F: ConnectionFactory + 'static,
{
    pub fn new(
        role: SourceRole,
        topic: impl Into<String>,
        group: impl Into<String>,
        config: TopicConfig,
        source: Arc<S>,
        factory: F,
    ) -> Self {
        let (fault_tx, _) = watch::channel(None);
        Self {
            role,
            topic: topic.into(),
            group: group.into(),
            config: config.normalized(),
            source,
            factory,
            metrics: Arc::new(RelayMetrics::new()),
            fault_tx,
            inner: Mutex::new(Inner {
                state: LinkState::Created,
                workers: Vec::new(),
                fallback: None,
                stop_tx: None,
                handlers: Vec::new(),
            }),
        }
    }

    pub fn role(&self) -> SourceRole {
        self.role
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    pub async fn state(&self) -> LinkState {
        self.inner.lock().await.state
    }

    /// Open shard connections and workers, build the ring, and install the
    /// queue-group handler replicas on the source connection.
    ///
    /// On any failure the link releases everything it opened and stays
    /// `Created`.
    pub async fn subscribe(&self) -> Result<(), RelayError> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            LinkState::Created => {}
            LinkState::Active => return Ok(()),
            LinkState::Draining | LinkState::Closed => {
                return Err(RelayError::lifecycle(format!(
                    "cannot subscribe {} link for {} after close",
                    self.role, self.topic
                )));
            }
        }

        let mut ring = Ring::new();
        let mut queues = HashMap::new();
        let mut workers = Vec::with_capacity(self.config.shard_count);
        for shard in 1..=self.config.shard_count {
            let conn = match self.factory.connect(shard).await {
                Ok(conn) => Arc::new(conn),
                Err(e) => {
                    abort_startup(workers, None, None, Vec::new()).await;
                    return Err(e);
                }
            };
            let shard_id = ShardId::generate();
            let worker = PublishWorker::spawn(shard_id.clone(), conn, Arc::clone(&self.metrics));
            queues.insert(shard_id.clone(), worker.queue());
            ring.add(shard_id);
            workers.push(worker);
        }

        let fallback = match self.factory.connect(0).await {
            Ok(conn) => Arc::new(conn),
            Err(e) => {
                abort_startup(workers, None, None, Vec::new()).await;
                return Err(e);
            }
        };

        let dispatcher = Dispatcher::new(
            Arc::new(ring),
            Arc::new(queues),
            Arc::clone(&fallback),
            self.config.prefix_len,
            self.config.load_balance,
            Arc::clone(&self.metrics),
        );

        let (stop_tx, _) = watch::channel(false);
        let mut handlers = Vec::with_capacity(self.config.handler_count);
        for _ in 0..self.config.handler_count {
            let sub = match self.source.queue_subscribe(&self.topic, &self.group).await {
                Ok(sub) => sub,
                Err(e) => {
                    abort_startup(workers, Some(fallback), Some(stop_tx), handlers).await;
                    return Err(e);
                }
            };
            handlers.push(tokio::spawn(handler_loop(
                sub,
                dispatcher.clone(),
                stop_tx.subscribe(),
                self.fault_tx.clone(),
                self.role,
                self.topic.clone(),
            )));
        }

        if let Err(e) = self.source.flush_timeout(DEFAULT_FLUSH_TIMEOUT).await {
            abort_startup(workers, Some(fallback), Some(stop_tx), handlers).await;
            return Err(e);
        }

        info!(
            role = %self.role,
            topic = %self.topic,
            group = %self.group,
            shards = self.config.shard_count,
            handlers = self.config.handler_count,
            load_balance = self.config.load_balance,
            "link active",
        );
        inner.state = LinkState::Active;
        inner.workers = workers;
        inner.fallback = Some(fallback);
        inner.stop_tx = Some(stop_tx);
        inner.handlers = handlers;
        Ok(())
    }

    /// Unsubscribe the handlers, drain the source, stop every worker, then
    /// release the fallback connection. Best-effort: teardown continues past
    /// errors and the first one is reported.
    pub async fn close(&self) -> Result<(), RelayError> {
        let mut inner = self.inner.lock().await;
        if inner.state != LinkState::Active {
            return Ok(());
        }
        inner.state = LinkState::Draining;
        let mut first_err = None;

        if let Some(stop_tx) = inner.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
        let handlers: Vec<_> = inner.handlers.drain(..).collect();
        for handle in handlers {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => note_close_error(&mut first_err, "unsubscribe", e),
                Err(e) => note_close_error(
                    &mut first_err,
                    "handler",
                    RelayError::lifecycle(format!("handler task failed: {e}")),
                ),
            }
        }

        if let Err(e) = self.source.drain().await {
            note_close_error(&mut first_err, "source drain", e);
        }

        let workers: Vec<_> = inner.workers.drain(..).collect();
        for worker in workers {
            if let Err(e) = worker.stop().await {
                note_close_error(&mut first_err, "worker stop", e);
            }
        }

        if let Some(fallback) = inner.fallback.take() {
            if let Err(e) = fallback.drain().await {
                note_close_error(&mut first_err, "fallback drain", e);
            }
            if let Err(e) = fallback.close().await {
                note_close_error(&mut first_err, "fallback close", e);
            }
        }

        inner.state = LinkState::Closed;
        info!(role = %self.role, topic = %self.topic, "link closed");
        match first_err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// Resolves when the link fails mid-run (source subscription torn down
    /// by the fabric side). Pends forever on a healthy link.
    pub async fn fault(&self) -> RelayError {
        let mut rx = self.fault_tx.subscribe();
        loop {
            let message = rx.borrow_and_update().clone();
            if let Some(message) = message {
                return RelayError::lifecycle(message);
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

fn note_close_error(first: &mut Option<RelayError>, stage: &str, e: RelayError) {
    warn!(stage, error = %e, "error during link close");
    if first.is_none() {
        *first = Some(e);
    }
}

/// Release resources opened by a partially failed `subscribe`.
async fn abort_startup<C: Connection + 'static>(
    workers: Vec<PublishWorker<C>>,
    fallback: Option<Arc<C>>,
    stop_tx: Option<watch::Sender<bool>>,
    handlers: Vec<JoinHandle<Result<(), RelayError>>>,
) {
    if let Some(stop_tx) = stop_tx {
        let _ = stop_tx.send(true);
    }
    for handle in handlers {
        let _ = handle.await;
    }
    for worker in workers {
        if let Err(e) = worker.stop().await {
            warn!(error = %e, "worker stop failed during startup abort");
        }
    }
    if let Some(fallback) = fallback {
        if let Err(e) = fallback.close().await {
            warn!(error = %e, "fallback close failed during startup abort");
        }
    }
}

async fn handler_loop<S, C>(
    mut sub: S,
    dispatcher: Dispatcher<C>,
    mut stop_rx: watch::Receiver<bool>,
    fault_tx: watch::Sender<Option<String>>,
    role: SourceRole,
    topic: String,
) -> Result<(), RelayError>
where
    S: Subscription + 'static,
    C: Connection + 'static,
{
    loop {
        tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            msg = sub.recv() => match msg {
                Some(msg) => dispatcher.dispatch(msg).await,
                None => {
                    warn!(role = %role, topic = %topic, "source subscription closed");
                    let _ = fault_tx.send(Some(format!(
                        "{role} subscription for {topic} closed unexpectedly"
                    )));
                    return Ok(());
                }
            },
        }
    }
    sub.unsubscribe().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use contracts::RelayMessage;
    use fabric::{MemoryConnection, MemoryFabric, MemorySubscription};
    use std::time::Duration;
    use tokio::time::timeout;

    const SRC: &str = "mem://src";
    const DST: &str = "mem://dst";

    async fn recv(sub: &mut MemorySubscription) -> Option<RelayMessage> {
        timeout(Duration::from_millis(500), sub.recv())
            .await
            .ok()
            .flatten()
    }

    async fn test_link(
        fabric: &Arc<MemoryFabric>,
        config: TopicConfig,
    ) -> Link<MemoryConnection, DestinationFactory<MemoryFabric>> {
        let source = Arc::new(fabric.connect(SRC).await.unwrap());
        Link::new(
            SourceRole::Primary,
            "events.>",
            "events-group",
            config,
            source,
            DestinationFactory::new(Arc::clone(fabric), DST),
        )
    }

    async fn dst_sink(fabric: &MemoryFabric) -> MemorySubscription {
        let conn = fabric.connect(DST).await.unwrap();
        conn.queue_subscribe(">", "sink").await.unwrap()
    }

    #[tokio::test]
    async fn test_relays_source_to_destination() {
        let fabric = Arc::new(MemoryFabric::new());
        let mut sink = dst_sink(&fabric).await;
        let link = test_link(&fabric, TopicConfig::default()).await;
        link.subscribe().await.unwrap();
        assert_eq!(link.state().await, LinkState::Active);

        let publisher = fabric.connect(SRC).await.unwrap();
        publisher
            .publish("events.a", Bytes::from_static(b"hello"))
            .await
            .unwrap();

        let msg = recv(&mut sink).await.unwrap();
        assert_eq!(msg.subject, "events.a");
        assert_eq!(&msg.payload[..], b"hello");

        link.close().await.unwrap();
        assert_eq!(link.state().await, LinkState::Closed);
    }

    #[tokio::test]
    async fn test_non_matching_subject_not_relayed() {
        let fabric = Arc::new(MemoryFabric::new());
        let mut sink = dst_sink(&fabric).await;
        let link = test_link(&fabric, TopicConfig::default()).await;
        link.subscribe().await.unwrap();

        let publisher = fabric.connect(SRC).await.unwrap();
        publisher.publish("other.a", Bytes::new()).await.unwrap();

        assert!(recv(&mut sink).await.is_none());
        link.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_handler_replicas_do_not_duplicate() {
        let fabric = Arc::new(MemoryFabric::new());
        let mut sink = dst_sink(&fabric).await;
        let config = TopicConfig {
            handler_count: 3,
            shard_count: 2,
            ..TopicConfig::default()
        };
        let link = test_link(&fabric, config).await;
        link.subscribe().await.unwrap();

        let publisher = fabric.connect(SRC).await.unwrap();
        for i in 0..20 {
            publisher
                .publish(&format!("events.{i}"), Bytes::new())
                .await
                .unwrap();
        }

        let mut count = 0;
        while recv(&mut sink).await.is_some() {
            count += 1;
        }
        assert_eq!(count, 20);
        link.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_subscribe_idempotent_while_active() {
        let fabric = Arc::new(MemoryFabric::new());
        let link = test_link(&fabric, TopicConfig::default()).await;
        link.subscribe().await.unwrap();
        link.subscribe().await.unwrap();
        link.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_idempotent() {
        let fabric = Arc::new(MemoryFabric::new());
        let link = test_link(&fabric, TopicConfig::default()).await;
        // Close before subscribe is a no-op.
        link.close().await.unwrap();
        assert_eq!(link.state().await, LinkState::Created);

        link.subscribe().await.unwrap();
        link.close().await.unwrap();
        link.close().await.unwrap();
        assert_eq!(link.state().await, LinkState::Closed);
    }

    #[tokio::test]
    async fn test_subscribe_after_close_rejected() {
        let fabric = Arc::new(MemoryFabric::new());
        let link = test_link(&fabric, TopicConfig::default()).await;
        link.subscribe().await.unwrap();
        link.close().await.unwrap();
        assert!(link.subscribe().await.is_err());
    }

    #[tokio::test]
    async fn test_destination_failure_keeps_link_created() {
        let fabric = Arc::new(MemoryFabric::new());
        fabric.fail_connections_to(DST);
        let link = test_link(&fabric, TopicConfig::default()).await;

        assert!(link.subscribe().await.is_err());
        assert_eq!(link.state().await, LinkState::Created);
        // And close after the failed subscribe still succeeds.
        link.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_fault_fires_when_source_subscription_drops() {
        let fabric = Arc::new(MemoryFabric::new());
        let link = Arc::new(test_link(&fabric, TopicConfig::default()).await);
        link.subscribe().await.unwrap();

        let watcher = {
            let link = Arc::clone(&link);
            tokio::spawn(async move { link.fault().await })
        };
        fabric.drop_subscriptions(SRC);

        let err = timeout(Duration::from_secs(1), watcher)
            .await
            .expect("fault not observed")
            .unwrap();
        assert!(err.to_string().contains("events.>"), "got: {err}");
        link.close().await.unwrap();
    }
}
