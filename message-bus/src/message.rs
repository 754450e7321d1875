//! Wire messages broadcast to pin workers

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Emitted once when a payment transitions to confirmed.
///
/// `timestamp` is the confirmation time recorded by the ledger, so a
/// re-published event is byte-identical to the original.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationEvent {
    /// Transaction hash of the confirmed payment
    pub tx_hash: String,

    /// Owner of the payment
    pub username: String,

    /// Credited value
    pub value: Decimal,

    /// Confirmation time
    pub timestamp: DateTime<Utc>,
}

impl ConfirmationEvent {
    /// Serialize to bytes
    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
