//! # Fabric
//!
//! Fabric client implementations behind the `contracts` traits.
//!
//! - `MemoryFabric`: in-process pub/sub hub, used by tests and demos.
//!   Supports NATS-style subject wildcards and queue groups.
//! - `NatsFabric`: adapter over the `async-nats` client (feature `real-nats`).

mod memory;
#[cfg(feature = "real-nats")]
mod nats;
mod subject;

pub use memory::{MemoryConnection, MemoryFabric, MemorySubscription};
#[cfg(feature = "real-nats")]
pub use nats::{NatsConnection, NatsFabric, NatsSubscription};
pub use subject::subject_matches;
