//! # Relay
//!
//! The dispatch/sharding/worker-pool engine between "a message arrived on a
//! subscription" and "a message was republished on an outbound connection".
//!
//! Layers, leaves first:
//!
//! - [`Ring`]: consistent hash ring mapping routing keys to shard ids, with
//!   optional load-aware selection.
//! - [`PublishWorker`]: per-shard actor buffering publish requests and
//!   flushing them in ordered batches over one dedicated connection.
//! - [`Dispatcher`]: per-link inbound handler resolving routing keys to
//!   workers, with a fallback connection for routing misses.
//! - [`Link`]: one (source, topic) pairing; owns the queue-group handler
//!   replicas, the shard workers, and the open/drain/close lifecycle.
//! - [`Server`]: builds links from configuration, aggregate start/stop, and
//!   fail-fast supervision.

mod dispatch;
mod link;
mod metrics;
mod ring;
mod server;
mod worker;

pub use dispatch::{routing_key, Dispatcher};
pub use link::{DestinationFactory, Link, LinkState, SourceRole};
pub use metrics::{MetricsSnapshot, RelayMetrics};
pub use ring::Ring;
pub use server::Server;
pub use worker::{PublishWorker, WorkerQueue};
