//! # Contracts
//!
//! Frozen interface contracts (ICD), defining inter-module data structures and traits.
//! All business crates can only depend on this crate, reverse dependencies are prohibited.
//!
//! ## Delivery Model
//! - Best-effort relay: a message counts as delivered once handed to the
//!   underlying publish call, no application-level acknowledgment
//! - FIFO ordering holds per shard only

mod error;
mod fabric;
mod message;
mod relay_config;
mod shard_id;

pub use error::*;
pub use fabric::*;
pub use message::*;
pub use relay_config::*;
pub use shard_id::ShardId;
