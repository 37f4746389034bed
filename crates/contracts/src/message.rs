//! RelayMessage - the unit of relayed traffic
//!
//! Immutable once enqueued; ownership transfers to the worker queue on
//! enqueue and the message is never mutated afterwards.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// One message taken from a source subscription and republished on the
/// destination fabric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayMessage {
    /// Hierarchical subject the message was published under
    pub subject: String,
    /// Opaque payload, relayed verbatim
    pub payload: Bytes,
}

impl RelayMessage {
    /// Create a message from a subject and payload.
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            payload: payload.into(),
        }
    }
}
