//! Relay configuration structures
//!
//! Loaded from `relay.yaml` (or TOML/JSON) by the config_loader crate:
//!
//! ```yaml
//! primary: "nats://master1.example.com:4222/"
//! secondary: "nats://master2.example.com:4222/"
//! destination: "nats://localhost:4222/"
//! topic:
//!   "foo.>":
//!     shard: 2
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Top-level relay configuration: source/destination URLs plus the
/// per-topic relay table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Primary source fabric URL
    pub primary: String,

    /// Optional secondary source fabric URL. When set, every topic gets a
    /// second link subscribed against it for failover.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<String>,

    /// Destination fabric URL
    pub destination: String,

    /// Topic pattern -> relay options. BTreeMap keeps link construction
    /// order deterministic.
    #[serde(rename = "topic")]
    pub topics: BTreeMap<String, TopicConfig>,
}

/// Per-topic relay options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicConfig {
    /// Number of shards (publish workers / outbound connections)
    #[serde(default = "default_count", rename = "shard")]
    pub shard_count: usize,

    /// Number of queue-group subscription handler replicas
    #[serde(default = "default_count", rename = "handler")]
    pub handler_count: usize,

    /// Routing-key prefix length in bytes; 0 routes on the full subject
    #[serde(default, rename = "prefix")]
    pub prefix_len: usize,

    /// Route via in-flight counters instead of pure consistent hashing
    #[serde(default, rename = "loadbalance")]
    pub load_balance: bool,
}

fn default_count() -> usize {
    1
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            shard_count: 1,
            handler_count: 1,
            prefix_len: 0,
            load_balance: false,
        }
    }
}

impl TopicConfig {
    /// Clamp counts so a link always has at least one shard and one handler.
    pub fn normalized(self) -> Self {
        Self {
            shard_count: self.shard_count.max(1),
            handler_count: self.handler_count.max(1),
            ..self
        }
    }
}
