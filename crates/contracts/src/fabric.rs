//! Fabric traits - messaging-fabric client abstraction
//!
//! Defines the capability the relay consumes from the underlying pub/sub
//! fabric, decoupling the core from any concrete client. Supports unified
//! handling of the in-process memory fabric and real network clients.

use std::time::Duration;

use bytes::Bytes;

use crate::{RelayError, RelayMessage};

/// Default bound for connection flushes issued by workers and the
/// fallback publish path.
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// One queue-group subscription on a source connection.
///
/// Held exclusively by the handler task that drives it; `recv` returning
/// `None` means the subscription was torn down by the fabric side.
#[trait_variant::make(Subscription: Send)]
pub trait LocalSubscription {
    /// Receive the next delivered message, or `None` once closed.
    async fn recv(&mut self) -> Option<RelayMessage>;

    /// Stop delivery for this subscription.
    async fn unsubscribe(&mut self) -> Result<(), RelayError>;
}

/// One connection to a pub/sub fabric.
///
/// All relay code shares connections behind `Arc`, so every operation takes
/// `&self`.
#[trait_variant::make(Connection: Send)]
pub trait LocalConnection: Sync {
    type Subscription: Subscription + 'static;

    /// Publish a payload under a subject. Fire-and-forget: delivery is
    /// confirmed only by the next flush.
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), RelayError>;

    /// Flush buffered outbound messages, bounded by `timeout`.
    async fn flush_timeout(&self, timeout: Duration) -> Result<(), RelayError>;

    /// Subscribe to `topic` as a member of `group`. The fabric delivers each
    /// matching message to exactly one member of the group.
    async fn queue_subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Self::Subscription, RelayError>;

    /// Flush in-flight messages and stop the connection cleanly without
    /// losing buffered payloads.
    async fn drain(&self) -> Result<(), RelayError>;

    /// Close the connection immediately.
    async fn close(&self) -> Result<(), RelayError>;
}

/// Fabric client: opens connections by URL.
#[trait_variant::make(Fabric: Send)]
pub trait LocalFabric: Sync {
    type Connection: Connection + 'static;

    /// Open a new connection to the fabric at `url`.
    async fn connect(&self, url: &str) -> Result<Self::Connection, RelayError>;
}

/// Per-link outbound connection factory.
///
/// Index 0 is reserved for the fallback connection; indices >= 1 produce
/// shard connections.
#[trait_variant::make(ConnectionFactory: Send)]
pub trait LocalConnectionFactory: Sync {
    type Connection: Connection + 'static;

    async fn connect(&self, index: usize) -> Result<Self::Connection, RelayError>;
}
