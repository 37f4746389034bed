//! Layered error definitions
//!
//! Categorized by source: config / fabric / routing / lifecycle

use thiserror::Error;

/// Unified error type
#[derive(Debug, Error)]
pub enum RelayError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Fabric Errors =====
    /// Fabric connect failure
    #[error("fabric connection error ({url}): {message}")]
    Connection { url: String, message: String },

    /// Subscribe failure on a source connection
    #[error("subscribe error for topic '{topic}': {message}")]
    Subscribe { topic: String, message: String },

    /// Publish failure on an outbound connection
    #[error("publish error for subject '{subject}': {message}")]
    Publish { subject: String, message: String },

    // ===== Routing Errors =====
    /// Ring or shard-map lookup failure. Handled internally by the
    /// dispatcher (fallback publish), never surfaced to callers.
    #[error("routing miss for key '{key}'")]
    RoutingMiss { key: String },

    // ===== Lifecycle Errors =====
    /// Invalid or failed link/server lifecycle transition
    #[error("lifecycle error: {message}")]
    Lifecycle { message: String },

    /// First error among several links during shutdown
    #[error("shutdown error ({failed} link(s) failed): {first}")]
    AggregateShutdown {
        failed: usize,
        #[source]
        first: Box<RelayError>,
    },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl RelayError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create fabric connection error
    pub fn connection(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create subscribe error
    pub fn subscribe(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Subscribe {
            topic: topic.into(),
            message: message.into(),
        }
    }

    /// Create publish error
    pub fn publish(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Publish {
            subject: subject.into(),
            message: message.into(),
        }
    }

    /// Create routing miss error
    pub fn routing_miss(key: impl Into<String>) -> Self {
        Self::RoutingMiss { key: key.into() }
    }

    /// Create lifecycle error
    pub fn lifecycle(message: impl Into<String>) -> Self {
        Self::Lifecycle {
            message: message.into(),
        }
    }
}
