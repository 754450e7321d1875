//! Error types for message bus

use thiserror::Error;

/// Message bus error
#[derive(Debug, Error)]
pub enum Error {
    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Exchange declaration failed
    #[error("Declare error for exchange {exchange}: {reason}")]
    Declare {
        /// Exchange name
        exchange: String,
        /// Broker-reported reason
        reason: String,
    },

    /// Exchange already exists with different parameters
    #[error("Topology mismatch for exchange {exchange}: expected {expected}, found {found}")]
    TopologyMismatch {
        /// Exchange name
        exchange: String,
        /// Parameters this process declares
        expected: String,
        /// Parameters the broker holds
        found: String,
    },

    /// Publish or subscribe against an exchange that was never declared
    #[error("Unknown exchange: {0}")]
    UnknownExchange(String),

    /// Publish error
    #[error("Publish error: {0}")]
    Publish(String),

    /// Subscribe error
    #[error("Subscribe error: {0}")]
    Subscribe(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Fatal errors abort startup and are never retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::TopologyMismatch { .. })
    }

    /// Whether a publish that failed with this error may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Publish(_))
    }
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
