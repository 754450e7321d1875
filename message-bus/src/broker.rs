//! Broker port
//!
//! The ledger only needs two capabilities from a broker: idempotent
//! exchange declaration and publication. Implementations must be safe for
//! concurrent use from many tasks.

use crate::{types::ExchangeSpec, Result};
use async_trait::async_trait;
use bytes::Bytes;

/// Publish/declare abstraction over a message broker
#[async_trait]
pub trait Broker: Send + Sync {
    /// Declare an exchange.
    ///
    /// Re-declaring with identical parameters succeeds. Declaring an existing
    /// name with different parameters fails with
    /// [`Error::TopologyMismatch`](crate::Error::TopologyMismatch).
    async fn declare(&self, spec: &ExchangeSpec) -> Result<()>;

    /// Publish `body` to `exchange` with `routing_key`.
    ///
    /// At-least-once; ordering is only preserved per publisher.
    async fn publish(&self, exchange: &str, routing_key: &str, body: Bytes) -> Result<()>;
}
