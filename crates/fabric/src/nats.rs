//! NATS fabric
//!
//! Thin adapter over the `async-nats` client. Connection-level buffering and
//! reconnect handling stay inside the client; this layer only maps the
//! operations and errors onto the `contracts` traits.

use std::time::Duration;

use bytes::Bytes;
use contracts::{Connection, Fabric, RelayError, RelayMessage, Subscription};
use futures_util::StreamExt;
use tracing::debug;

/// Fabric backed by real NATS servers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NatsFabric;

impl NatsFabric {
    pub fn new() -> Self {
        Self
    }
}

impl Fabric for NatsFabric {
    type Connection = NatsConnection;

    async fn connect(&self, url: &str) -> Result<NatsConnection, RelayError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| RelayError::connection(url, e.to_string()))?;
        debug!(url = %url, "nats connect");
        Ok(NatsConnection {
            url: url.to_string(),
            client,
        })
    }
}

/// One NATS client connection.
pub struct NatsConnection {
    url: String,
    client: async_nats::Client,
}

impl Connection for NatsConnection {
    type Subscription = NatsSubscription;

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), RelayError> {
        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| RelayError::publish(subject, e.to_string()))
    }

    async fn flush_timeout(&self, timeout: Duration) -> Result<(), RelayError> {
        match tokio::time::timeout(timeout, self.client.flush()).await {
            Ok(result) => result.map_err(|e| RelayError::connection(&self.url, e.to_string())),
            Err(_) => Err(RelayError::connection(
                &self.url,
                format!("flush timed out after {timeout:?}"),
            )),
        }
    }

    async fn queue_subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<NatsSubscription, RelayError> {
        let subscriber = self
            .client
            .queue_subscribe(topic.to_string(), group.to_string())
            .await
            .map_err(|e| RelayError::subscribe(topic, e.to_string()))?;
        debug!(topic = %topic, group = %group, "nats queue subscribe");
        Ok(NatsSubscription { subscriber })
    }

    async fn drain(&self) -> Result<(), RelayError> {
        self.client
            .drain()
            .await
            .map_err(|e| RelayError::connection(&self.url, e.to_string()))
    }

    async fn close(&self) -> Result<(), RelayError> {
        // async-nats has no hard close separate from drain; draining flushes
        // pending writes and terminates the connection task.
        self.drain().await
    }
}

/// One queue-group subscription on a NATS connection.
pub struct NatsSubscription {
    subscriber: async_nats::Subscriber,
}

impl Subscription for NatsSubscription {
    async fn recv(&mut self) -> Option<RelayMessage> {
        self.subscriber
            .next()
            .await
            .map(|msg| RelayMessage::new(msg.subject.as_str(), msg.payload))
    }

    async fn unsubscribe(&mut self) -> Result<(), RelayError> {
        self.subscriber
            .unsubscribe()
            .await
            .map_err(|e| RelayError::subscribe("", e.to_string()))
    }
}
