//! Pin broadcast bus
//!
//! Provides the broadcast side of the pin ledger:
//! - Durable fanout exchanges for pin and pin-removal events
//! - Idempotent topology declaration with fatal drift detection
//! - NATS JetStream and in-memory brokers behind one port
//! - Bounded retry with exponential backoff for publications
//! - Observability via Prometheus metrics

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod broker;
pub mod client;
pub mod error;
pub mod memory;
pub mod message;
pub mod metrics;
pub mod publisher;
pub mod topology;
pub mod types;

pub use broker::Broker;
pub use client::NatsBroker;
pub use error::{Error, Result};
pub use memory::{Delivery, InMemoryBroker};
pub use message::ConfirmationEvent;
pub use publisher::{Publisher, PublisherConfig};
pub use topology::declare_topology;
pub use types::{
    Exchange, ExchangeKind, ExchangeSpec, PIN_EXCHANGE, PIN_EXCHANGE_KEY, PIN_REMOVAL_EXCHANGE,
    PIN_REMOVAL_EXCHANGE_KEY,
};
