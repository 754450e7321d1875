//! NATS JetStream broker
//!
//! Each exchange maps onto one JetStream stream:
//!
//! - stream name = exchange name, subjects = `<exchange>.>`
//! - publications go to `<exchange>.<routing_key>`
//! - `durable` selects file storage, otherwise memory
//! - `auto_delete` selects interest retention, otherwise limits
//! - the exchange fingerprint is stored as the stream description and
//!   compared when the exchange is declared again
//!
//! Every durable consumer bound with [`NatsBroker::bind_consumer`] sees every
//! message, which gives fanout delivery. JetStream has no fire-and-forget
//! stream creation, so `no_wait` is accepted and ignored.

use crate::{
    broker::Broker,
    metrics::EXCHANGE_DECLARE_TOTAL,
    types::{sanitize_subject, ExchangeSpec},
    Error, Result,
};
use async_nats::jetstream::{
    consumer::PullConsumer,
    stream::{Config as StreamConfig, RetentionPolicy, StorageType},
    Context as JetStreamContext,
};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{error, info};

/// Window in which JetStream drops publications with a repeated message id
const DUPLICATE_WINDOW: Duration = Duration::from_secs(120);

/// JetStream-backed [`Broker`]
pub struct NatsBroker {
    context: JetStreamContext,
    declared: RwLock<HashMap<String, ExchangeSpec>>,
}

impl NatsBroker {
    /// Connect to NATS and open a JetStream context
    pub async fn connect(nats_url: &str) -> Result<Self> {
        info!("Connecting to NATS JetStream at {}", nats_url);

        let client = async_nats::connect(nats_url)
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        Ok(Self::from_client(client))
    }

    /// Wrap an existing NATS client
    pub fn from_client(client: async_nats::Client) -> Self {
        Self {
            context: async_nats::jetstream::new(client),
            declared: RwLock::new(HashMap::new()),
        }
    }

    /// Create (or reuse) a durable pull consumer that receives every message
    /// published to `exchange`.
    pub async fn bind_consumer(&self, exchange: &str, durable_name: &str) -> Result<PullConsumer> {
        info!(exchange, durable_name, "Binding consumer");

        let consumer_config = async_nats::jetstream::consumer::pull::Config {
            durable_name: Some(durable_name.to_string()),
            description: Some(format!("Pin worker bound to {}", exchange)),
            filter_subject: format!("{}.>", exchange),
            ack_policy: async_nats::jetstream::consumer::AckPolicy::Explicit,
            deliver_policy: async_nats::jetstream::consumer::DeliverPolicy::All,
            ..Default::default()
        };

        let stream = self
            .context
            .get_stream(exchange)
            .await
            .map_err(|e| Error::Subscribe(e.to_string()))?;

        stream
            .get_or_create_consumer(durable_name, consumer_config)
            .await
            .map_err(|e| Error::Subscribe(e.to_string()))
    }

    fn stream_config(spec: &ExchangeSpec) -> StreamConfig {
        StreamConfig {
            name: spec.name.clone(),
            description: Some(spec.fingerprint()),
            subjects: vec![format!("{}.>", spec.name)],
            retention: if spec.auto_delete {
                RetentionPolicy::Interest
            } else {
                RetentionPolicy::Limits
            },
            storage: if spec.durable {
                StorageType::File
            } else {
                StorageType::Memory
            },
            duplicate_window: DUPLICATE_WINDOW,
            ..Default::default()
        }
    }

    /// Message id used for JetStream de-duplication of retried publishes
    fn message_id(subject: &str, body: &[u8]) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(subject.as_bytes());
        hasher.update(&[0]);
        hasher.update(body);
        hasher.finalize().to_hex().to_string()
    }

    fn record_declare(exchange: &str, status: &str) {
        EXCHANGE_DECLARE_TOTAL
            .with_label_values(&[exchange, status])
            .inc();
    }
}

impl std::fmt::Debug for NatsBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.declared.read().keys().cloned().collect();
        f.debug_struct("NatsBroker").field("declared", &names).finish()
    }
}

#[async_trait]
impl Broker for NatsBroker {
    async fn declare(&self, spec: &ExchangeSpec) -> Result<()> {
        let expected = Self::stream_config(spec);

        let mut stream = self
            .context
            .get_or_create_stream(expected.clone())
            .await
            .map_err(|e| {
                Self::record_declare(&spec.name, "error");
                Error::Declare {
                    exchange: spec.name.clone(),
                    reason: e.to_string(),
                }
            })?;

        let info = stream.info().await.map_err(|e| {
            Self::record_declare(&spec.name, "error");
            Error::Declare {
                exchange: spec.name.clone(),
                reason: e.to_string(),
            }
        })?;
        let found = &info.config;

        if found.description != expected.description
            || found.storage != expected.storage
            || found.retention != expected.retention
            || found.subjects != expected.subjects
        {
            Self::record_declare(&spec.name, "mismatch");
            error!(
                exchange = %spec.name,
                expected = %spec.fingerprint(),
                found = ?found.description,
                "Exchange exists with different parameters"
            );
            return Err(Error::TopologyMismatch {
                exchange: spec.name.clone(),
                expected: spec.fingerprint(),
                found: format!(
                    "{} (storage={:?}, retention={:?}, subjects={:?})",
                    found.description.as_deref().unwrap_or("<none>"),
                    found.storage,
                    found.retention,
                    found.subjects
                ),
            });
        }

        self.declared.write().insert(spec.name.clone(), spec.clone());
        Self::record_declare(&spec.name, "ok");
        info!(exchange = %spec.name, "Exchange {} ready", spec.name);

        Ok(())
    }

    async fn publish(&self, exchange: &str, routing_key: &str, body: Bytes) -> Result<()> {
        let internal = self
            .declared
            .read()
            .get(exchange)
            .map(|spec| spec.internal)
            .unwrap_or(false);
        if internal {
            return Err(Error::Publish(format!("exchange {} is internal", exchange)));
        }

        let subject = format!("{}.{}", exchange, sanitize_subject(routing_key));

        let mut headers = async_nats::HeaderMap::new();
        let message_id = Self::message_id(&subject, &body);
        headers.insert("Nats-Msg-Id", message_id.as_str());

        // Publish, then wait for the stream acknowledgment
        self.context
            .publish_with_headers(subject, headers, body)
            .await
            .map_err(|e| Error::Publish(e.to_string()))?
            .await
            .map_err(|e| Error::Publish(format!("Publish ack failed: {}", e)))?;

        Ok(())
    }
}
