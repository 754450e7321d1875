//! In-process fanout broker
//!
//! Every subscriber of an exchange receives a copy of every message
//! published after it subscribed. Messages published while nobody is
//! subscribed are dropped, like a fanout exchange with no bound queues.

use crate::{broker::Broker, types::ExchangeSpec, Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::broadcast;

/// Default per-subscriber buffer
pub const DEFAULT_CAPACITY: usize = 1024;

/// A message as seen by a subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Exchange the message was published to
    pub exchange: String,
    /// Routing key supplied by the publisher
    pub routing_key: String,
    /// Message body
    pub body: Bytes,
}

struct DeclaredExchange {
    spec: ExchangeSpec,
    sender: broadcast::Sender<Delivery>,
}

/// In-memory [`Broker`]
pub struct InMemoryBroker {
    exchanges: RwLock<HashMap<String, DeclaredExchange>>,
    capacity: usize,
}

impl InMemoryBroker {
    /// Create broker with default subscriber buffer
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create broker with given subscriber buffer
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            exchanges: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Bind a new subscriber to a declared exchange
    pub fn subscribe(&self, exchange: &str) -> Result<broadcast::Receiver<Delivery>> {
        self.exchanges
            .read()
            .get(exchange)
            .map(|declared| declared.sender.subscribe())
            .ok_or_else(|| Error::UnknownExchange(exchange.to_string()))
    }

    /// Parameters an exchange was declared with
    pub fn declared(&self, exchange: &str) -> Option<ExchangeSpec> {
        self.exchanges
            .read()
            .get(exchange)
            .map(|declared| declared.spec.clone())
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.exchanges.read().keys().cloned().collect();
        f.debug_struct("InMemoryBroker")
            .field("exchanges", &names)
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn declare(&self, spec: &ExchangeSpec) -> Result<()> {
        let mut exchanges = self.exchanges.write();

        if let Some(existing) = exchanges.get(&spec.name) {
            if existing.spec.conflicts_with(spec) {
                return Err(Error::TopologyMismatch {
                    exchange: spec.name.clone(),
                    expected: spec.fingerprint(),
                    found: existing.spec.fingerprint(),
                });
            }
            return Ok(());
        }

        let (sender, _) = broadcast::channel(self.capacity);
        exchanges.insert(
            spec.name.clone(),
            DeclaredExchange {
                spec: spec.clone(),
                sender,
            },
        );

        Ok(())
    }

    async fn publish(&self, exchange: &str, routing_key: &str, body: Bytes) -> Result<()> {
        let exchanges = self.exchanges.read();
        let declared = exchanges
            .get(exchange)
            .ok_or_else(|| Error::UnknownExchange(exchange.to_string()))?;

        if declared.spec.internal {
            return Err(Error::Publish(format!(
                "exchange {} is internal",
                exchange
            )));
        }

        // No subscribers is not an error for a fanout exchange
        let _ = declared.sender.send(Delivery {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            body,
        });

        Ok(())
    }
}
