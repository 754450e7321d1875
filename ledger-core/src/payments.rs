//! Payment ledger
//!
//! Records per-user numbered payments and confirms them. A confirmation
//! that changes state broadcasts exactly one [`ConfirmationEvent`] on the
//! pin exchange.
//!
//! # Concurrency
//!
//! Any number of ledgers, in one process or many, may share a store. The
//! pre-insert lookups only produce early, descriptive conflicts; the
//! store's unique keys and conditional confirmation update decide every
//! race.
//!
//! [`ConfirmationEvent`]: pin_bus::ConfirmationEvent

use crate::{
    config::LedgerConfig,
    error::{Conflict, Error, Result},
    metrics::Metrics,
    retry::retry_numbering,
    store::{ConfirmOutcome, LedgerStore},
    types::{NewPayment, Payment, PaymentDetails},
};
use pin_bus::Publisher;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Payment ledger
#[derive(Clone)]
pub struct PaymentLedger {
    store: Arc<dyn LedgerStore>,
    publisher: Publisher,
    config: LedgerConfig,
    metrics: Metrics,
}

impl PaymentLedger {
    /// Create ledger over a shared store
    pub fn new(
        store: Arc<dyn LedgerStore>,
        publisher: Publisher,
        config: LedgerConfig,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            publisher,
            config,
            metrics,
        }
    }

    /// Ledger metrics
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Highest payment number of `username`, or 0 if they have none
    pub async fn latest_payment_number(&self, username: &str) -> Result<i64> {
        let latest = self.store.latest_payment(username).await?;
        Ok(latest.map(|p| p.number).unwrap_or(0))
    }

    /// Record a payment under an explicit number.
    ///
    /// Fails with `InvalidArgument` on malformed input and with `Conflict`
    /// when the tx hash or the user's number is already taken.
    pub async fn new_payment(&self, payment: NewPayment) -> Result<Payment> {
        payment.validate()?;
        let d = &payment.details;

        if self.store.find_payment_by_tx_hash(&d.tx_hash).await?.is_some() {
            debug!(tx_hash = %d.tx_hash, "Payment hash already recorded");
            self.metrics.payment_conflicts.inc();
            return Err(Conflict::TxHash(d.tx_hash.clone()).into());
        }

        if self
            .store
            .find_payment_by_number(&d.username, payment.number)
            .await?
            .is_some()
        {
            debug!(username = %d.username, number = payment.number, "Payment number already used");
            self.metrics.payment_conflicts.inc();
            return Err(Conflict::PaymentNumber {
                username: d.username.clone(),
                number: payment.number,
            }
            .into());
        }

        match self.store.insert_payment(&payment).await {
            Ok(created) => {
                self.metrics.payments_created.inc();
                info!(
                    tx_hash = %created.tx_hash,
                    username = %created.username,
                    number = created.number,
                    value = %created.value,
                    "Payment recorded"
                );
                Ok(created)
            }
            Err(e) => {
                if e.is_conflict() {
                    self.metrics.payment_conflicts.inc();
                }
                Err(e)
            }
        }
    }

    /// Record a payment under the user's next number.
    ///
    /// Losing a numbering race to another writer re-reads the latest
    /// number and tries again, up to `max_numbering_attempts` times.
    pub async fn record_payment(&self, details: PaymentDetails) -> Result<Payment> {
        retry_numbering(
            self.config.max_numbering_attempts,
            &self.metrics.numbering_retries,
            |_| {
                let details = details.clone();
                async move {
                    let number = self.latest_payment_number(&details.username).await? + 1;
                    self.new_payment(details.numbered(number)).await
                }
            },
        )
        .await
    }

    /// Mark a payment confirmed.
    ///
    /// Confirming an already confirmed payment returns it unchanged and
    /// publishes nothing. A failed broadcast is logged and counted; the
    /// confirmation itself stays committed.
    pub async fn confirm_payment(&self, tx_hash: &str) -> Result<Payment> {
        match self.store.confirm_payment(tx_hash).await? {
            ConfirmOutcome::Missing => Err(Error::payment_not_found(tx_hash)),
            ConfirmOutcome::AlreadyConfirmed(payment) => {
                debug!(tx_hash, "Payment already confirmed");
                self.metrics.duplicate_confirmations.inc();
                Ok(payment)
            }
            ConfirmOutcome::Transitioned(payment) => {
                self.metrics.payments_confirmed.inc();
                info!(tx_hash, username = %payment.username, "Payment confirmed");

                let event = payment.confirmation_event();
                if let Err(e) = self.publisher.publish_confirmation(&event).await {
                    self.metrics.broadcast_failures.inc();
                    warn!(tx_hash, error = %e, "Confirmation broadcast failed");
                }

                Ok(payment)
            }
        }
    }

    /// Look up a payment by transaction hash
    pub async fn find_payment(&self, tx_hash: &str) -> Result<Payment> {
        self.store
            .find_payment_by_tx_hash(tx_hash)
            .await?
            .ok_or_else(|| Error::payment_not_found(tx_hash))
    }
}

impl std::fmt::Debug for PaymentLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentLedger")
            .field("config", &self.config)
            .field("publisher", self.publisher.config())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{store::RocksStore, types::PaymentType, Config};
    use async_trait::async_trait;
    use bytes::Bytes;
    use pin_bus::{
        declare_topology, Broker, ConfirmationEvent, ExchangeSpec, InMemoryBroker,
        PublisherConfig, PIN_EXCHANGE,
    };
    use rust_decimal::Decimal;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::broadcast::error::TryRecvError;

    struct Harness {
        ledger: PaymentLedger,
        broker: Arc<InMemoryBroker>,
        _temp: TempDir,
    }

    fn open_store() -> (Arc<dyn LedgerStore>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.rocksdb.sync_writes = false;
        (Arc::new(RocksStore::open(&config).unwrap()), temp_dir)
    }

    fn fast_publisher(broker: Arc<dyn Broker>) -> Publisher {
        Publisher::new(
            broker,
            PublisherConfig {
                max_attempts: 2,
                initial_retry_delay: Duration::from_millis(1),
                max_retry_delay: Duration::from_millis(5),
            },
        )
    }

    async fn harness() -> Harness {
        let (store, temp) = open_store();
        let broker = Arc::new(InMemoryBroker::new());
        declare_topology(broker.as_ref()).await.unwrap();

        let ledger = PaymentLedger::new(
            store,
            fast_publisher(broker.clone()),
            LedgerConfig::default(),
            Metrics::new().unwrap(),
        );

        Harness {
            ledger,
            broker,
            _temp: temp,
        }
    }

    fn payment(number: i64, tx_hash: &str, username: &str, value: Decimal) -> NewPayment {
        NewPayment::new(number, "0xAAA", tx_hash, value, "ETH", PaymentType::Eth, username)
    }

    fn details(tx_hash: &str, username: &str) -> PaymentDetails {
        payment(1, tx_hash, username, Decimal::ONE).details
    }

    /// Broker whose publishes always fail
    struct DownBroker;

    #[async_trait]
    impl Broker for DownBroker {
        async fn declare(&self, _spec: &ExchangeSpec) -> pin_bus::Result<()> {
            Ok(())
        }

        async fn publish(&self, _exchange: &str, _key: &str, _body: Bytes) -> pin_bus::Result<()> {
            Err(pin_bus::Error::Publish("broker down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_latest_number_empty_user() {
        let h = harness().await;
        assert_eq!(h.ledger.latest_payment_number("nobody").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_first_payment_then_confirm() {
        let h = harness().await;
        let mut rx = h.broker.subscribe(PIN_EXCHANGE).unwrap();

        let created = h
            .ledger
            .new_payment(payment(1, "0xH1", "alice", Decimal::new(1050, 2)))
            .await
            .unwrap();
        assert!(!created.confirmed);
        assert_eq!(created.value, Decimal::new(1050, 2));
        assert_eq!(h.ledger.latest_payment_number("alice").await.unwrap(), 1);

        let confirmed = h.ledger.confirm_payment("0xH1").await.unwrap();
        assert!(confirmed.confirmed);
        assert!(h.ledger.find_payment("0xH1").await.unwrap().confirmed);

        let delivery = rx.try_recv().unwrap();
        let event = ConfirmationEvent::from_bytes(&delivery.body).unwrap();
        assert_eq!(event.tx_hash, "0xH1");
        assert_eq!(event.username, "alice");
        assert_eq!(event.value, Decimal::new(1050, 2));
        assert_eq!(rx.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[tokio::test]
    async fn test_duplicate_hash_rejected() {
        let h = harness().await;
        h.ledger
            .new_payment(payment(1, "0xH1", "alice", Decimal::ONE))
            .await
            .unwrap();

        let err = h
            .ledger
            .new_payment(payment(2, "0xH1", "alice", Decimal::ONE))
            .await
            .unwrap_err();
        assert_eq!(err.conflict(), Some(&Conflict::TxHash("0xH1".to_string())));
        assert_eq!(h.ledger.latest_payment_number("alice").await.unwrap(), 1);
        assert_eq!(h.ledger.metrics().payment_conflicts.get(), 1);
    }

    #[tokio::test]
    async fn test_taken_number_rejected() {
        let h = harness().await;
        h.ledger
            .new_payment(payment(1, "0xH1", "alice", Decimal::ONE))
            .await
            .unwrap();

        let err = h
            .ledger
            .new_payment(payment(1, "0xH2", "alice", Decimal::ONE))
            .await
            .unwrap_err();
        assert!(matches!(
            err.conflict(),
            Some(Conflict::PaymentNumber { number: 1, .. })
        ));
        assert!(h.ledger.find_payment("0xH2").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_negative_value_rejected() {
        let h = harness().await;
        let err = h
            .ledger
            .new_payment(payment(1, "0xH1", "alice", Decimal::new(-1, 0)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(h.ledger.latest_payment_number("alice").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_confirm_is_idempotent() {
        let h = harness().await;
        let mut rx = h.broker.subscribe(PIN_EXCHANGE).unwrap();
        h.ledger
            .new_payment(payment(1, "0xH1", "alice", Decimal::ONE))
            .await
            .unwrap();

        let first = h.ledger.confirm_payment("0xH1").await.unwrap();
        let second = h.ledger.confirm_payment("0xH1").await.unwrap();
        assert!(second.confirmed);
        assert_eq!(first, second);

        assert!(rx.try_recv().is_ok());
        assert_eq!(rx.try_recv().unwrap_err(), TryRecvError::Empty);
        assert_eq!(h.ledger.metrics().payments_confirmed.get(), 1);
        assert_eq!(h.ledger.metrics().duplicate_confirmations.get(), 1);
    }

    #[tokio::test]
    async fn test_confirm_unknown_hash() {
        let h = harness().await;
        let mut rx = h.broker.subscribe(PIN_EXCHANGE).unwrap();

        let err = h.ledger.confirm_payment("0xNONE").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(rx.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[tokio::test]
    async fn test_publish_failure_keeps_confirmation() {
        let (store, _temp) = open_store();
        let ledger = PaymentLedger::new(
            store,
            fast_publisher(Arc::new(DownBroker)),
            LedgerConfig::default(),
            Metrics::new().unwrap(),
        );
        ledger
            .new_payment(payment(1, "0xH1", "alice", Decimal::ONE))
            .await
            .unwrap();

        let confirmed = ledger.confirm_payment("0xH1").await.unwrap();
        assert!(confirmed.confirmed);
        assert!(ledger.find_payment("0xH1").await.unwrap().confirmed);
        assert_eq!(ledger.metrics().broadcast_failures.get(), 1);

        // Broadcast is not re-attempted for an already confirmed payment
        ledger.confirm_payment("0xH1").await.unwrap();
        assert_eq!(ledger.metrics().broadcast_failures.get(), 1);
    }

    #[tokio::test]
    async fn test_record_payment_numbers_sequentially() {
        let h = harness().await;

        let first = h.ledger.record_payment(details("0xH1", "alice")).await.unwrap();
        let second = h.ledger.record_payment(details("0xH2", "alice")).await.unwrap();
        let other = h.ledger.record_payment(details("0xH3", "bob")).await.unwrap();

        assert_eq!(first.number, 1);
        assert_eq!(second.number, 2);
        assert_eq!(other.number, 1);
    }

    #[tokio::test]
    async fn test_record_payment_hash_conflict_not_retried() {
        let h = harness().await;
        h.ledger.record_payment(details("0xH1", "alice")).await.unwrap();

        let err = h
            .ledger
            .record_payment(details("0xH1", "alice"))
            .await
            .unwrap_err();
        assert!(matches!(err.conflict(), Some(Conflict::TxHash(_))));
        assert_eq!(h.ledger.metrics().numbering_retries.get(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_record_payment_distinct_numbers() {
        let h = harness().await;
        let ledger = PaymentLedger::new(
            h.ledger.store.clone(),
            h.ledger.publisher.clone(),
            LedgerConfig {
                max_numbering_attempts: 16,
            },
            Metrics::new().unwrap(),
        );

        let mut tasks = Vec::new();
        for i in 0..8 {
            let ledger = ledger.clone();
            tasks.push(tokio::spawn(async move {
                ledger
                    .record_payment(details(&format!("0xH{}", i), "alice"))
                    .await
            }));
        }

        let mut numbers = Vec::new();
        for task in tasks {
            numbers.push(task.await.unwrap().unwrap().number);
        }
        numbers.sort_unstable();
        assert_eq!(numbers, (1..=8).collect::<Vec<i64>>());
    }
}
