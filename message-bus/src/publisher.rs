//! Message publisher with retry logic

use crate::{
    broker::Broker,
    message::ConfirmationEvent,
    metrics::{MESSAGE_PUBLISH_DURATION, MESSAGE_PUBLISH_TOTAL},
    types::Exchange,
    Result,
};
use backoff::{backoff::Backoff, ExponentialBackoffBuilder};
use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Publisher configuration
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Max publish attempts (first try included)
    pub max_attempts: u32,

    /// Initial retry delay
    pub initial_retry_delay: Duration,

    /// Max retry delay
    pub max_retry_delay: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_retry_delay: Duration::from_millis(100),
            max_retry_delay: Duration::from_secs(2),
        }
    }
}

/// Message publisher
#[derive(Clone)]
pub struct Publisher {
    broker: Arc<dyn Broker>,
    config: PublisherConfig,
}

impl Publisher {
    /// Create new publisher
    pub fn new(broker: Arc<dyn Broker>, config: PublisherConfig) -> Self {
        Self { broker, config }
    }

    /// Publisher configuration
    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// Broadcast a payment confirmation on the pin exchange
    pub async fn publish_confirmation(&self, event: &ConfirmationEvent) -> Result<()> {
        let body = Bytes::from(event.to_bytes()?);
        self.publish(Exchange::Pin, body).await
    }

    /// Publish to one of the ledger exchanges with its fixed routing key
    pub async fn publish(&self, exchange: Exchange, body: Bytes) -> Result<()> {
        let start = Instant::now();

        let result = self.publish_with_retry(exchange, body).await;

        // Record metrics
        let duration = start.elapsed().as_secs_f64();
        MESSAGE_PUBLISH_DURATION
            .with_label_values(&[exchange.name()])
            .observe(duration);

        let status = if result.is_ok() { "success" } else { "error" };
        MESSAGE_PUBLISH_TOTAL
            .with_label_values(&[exchange.name(), status])
            .inc();

        result
    }

    /// Publish with bounded exponential backoff retry
    async fn publish_with_retry(&self, exchange: Exchange, body: Bytes) -> Result<()> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.config.initial_retry_delay)
            .with_max_interval(self.config.max_retry_delay)
            .with_max_elapsed_time(None)
            .build();
        let mut attempts = 0;

        loop {
            attempts += 1;

            match self
                .broker
                .publish(exchange.name(), exchange.routing_key(), body.clone())
                .await
            {
                Ok(()) => {
                    if attempts > 1 {
                        info!(%exchange, attempts, "Message published after retry");
                    }
                    return Ok(());
                }
                Err(e) if !e.is_transient() || attempts >= max_attempts => {
                    error!(%exchange, attempts, error = %e, "Failed to publish");
                    return Err(e);
                }
                Err(e) => {
                    let delay = backoff
                        .next_backoff()
                        .unwrap_or(self.config.max_retry_delay);
                    warn!(
                        %exchange,
                        attempt = attempts,
                        ?delay,
                        error = %e,
                        "Publish failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{memory::InMemoryBroker, types::ExchangeSpec, Error};
    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` publishes, then forwards to an in-memory broker
    struct FlakyBroker {
        inner: InMemoryBroker,
        failures: u32,
        calls: AtomicU32,
        error: fn() -> Error,
    }

    impl FlakyBroker {
        fn new(failures: u32, error: fn() -> Error) -> Self {
            Self {
                inner: InMemoryBroker::new(),
                failures,
                calls: AtomicU32::new(0),
                error,
            }
        }
    }

    #[async_trait]
    impl Broker for FlakyBroker {
        async fn declare(&self, spec: &ExchangeSpec) -> Result<()> {
            self.inner.declare(spec).await
        }

        async fn publish(&self, exchange: &str, routing_key: &str, body: Bytes) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err((self.error)());
            }
            self.inner.publish(exchange, routing_key, body).await
        }
    }

    fn fast_config(max_attempts: u32) -> PublisherConfig {
        PublisherConfig {
            max_attempts,
            initial_retry_delay: Duration::from_millis(1),
            max_retry_delay: Duration::from_millis(5),
        }
    }

    fn connection_lost() -> Error {
        Error::Connection("connection reset".to_string())
    }

    fn event() -> ConfirmationEvent {
        ConfirmationEvent {
            tx_hash: "hash1".to_string(),
            username: "alice".to_string(),
            value: Decimal::new(100, 1),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_publisher_config_default() {
        let config = PublisherConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert!(config.initial_retry_delay < config.max_retry_delay);
    }

    #[tokio::test]
    async fn test_publish_confirmation_targets_pin_exchange() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.declare(&Exchange::Pin.spec()).await.unwrap();
        let mut rx = broker.subscribe(Exchange::Pin.name()).unwrap();

        let publisher = Publisher::new(broker.clone(), fast_config(3));
        publisher.publish_confirmation(&event()).await.unwrap();

        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.routing_key, "ipfs-pin-key");
        let decoded = ConfirmationEvent::from_bytes(&delivery.body).unwrap();
        assert_eq!(decoded.tx_hash, "hash1");
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let broker = Arc::new(FlakyBroker::new(2, connection_lost));
        broker.declare(&Exchange::Pin.spec()).await.unwrap();
        let mut rx = broker.inner.subscribe(Exchange::Pin.name()).unwrap();

        let publisher = Publisher::new(broker.clone(), fast_config(3));
        publisher.publish_confirmation(&event()).await.unwrap();

        assert_eq!(broker.calls.load(Ordering::SeqCst), 3);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let broker = Arc::new(FlakyBroker::new(u32::MAX, connection_lost));
        broker.declare(&Exchange::Pin.spec()).await.unwrap();

        let publisher = Publisher::new(broker.clone(), fast_config(3));
        let err = publisher.publish_confirmation(&event()).await.unwrap_err();

        assert!(matches!(err, Error::Connection(_)));
        assert_eq!(broker.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let broker = Arc::new(InMemoryBroker::new());
        let publisher = Publisher::new(broker, fast_config(5));

        // Never declared
        let err = publisher.publish_confirmation(&event()).await.unwrap_err();
        assert!(matches!(err, Error::UnknownExchange(_)));
    }
}
