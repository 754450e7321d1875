//! Ledger Store port
//!
//! The store is the only arbiter of mutual exclusion between workers:
//! uniqueness is enforced by the store at write time and confirmation is a
//! single conditional update. Reads done by the managers before a write are
//! advisory.
//!
//! # Adapters
//!
//! - [`RocksStore`] - embedded RocksDB, one process
//! - [`PgStore`] - PostgreSQL, any number of processes

mod postgres;
mod rocks;

pub use postgres::PgStore;
pub use rocks::RocksStore;

use crate::{
    types::{AirdropRegistration, NewPayment, NewRegistration, Payment},
    Config, Result,
};
use crate::config::StorageBackend;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

/// Result of the confirmation check-and-set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// This call flipped `confirmed` from false to true
    Transitioned(Payment),
    /// Payment was already confirmed; nothing written
    AlreadyConfirmed(Payment),
    /// No payment with that hash
    Missing,
}

/// Durable state for payments and airdrop registrations
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert a payment. Violating the tx hash or (username, number)
    /// uniqueness fails with [`Error::Conflict`](crate::Error::Conflict).
    async fn insert_payment(&self, payment: &NewPayment) -> Result<Payment>;

    /// Point lookup by transaction hash
    async fn find_payment_by_tx_hash(&self, tx_hash: &str) -> Result<Option<Payment>>;

    /// Point lookup by (username, number)
    async fn find_payment_by_number(&self, username: &str, number: i64)
        -> Result<Option<Payment>>;

    /// Highest-numbered payment of a user
    async fn latest_payment(&self, username: &str) -> Result<Option<Payment>>;

    /// Atomically set `confirmed` if it is currently false
    async fn confirm_payment(&self, tx_hash: &str) -> Result<ConfirmOutcome>;

    /// Insert a registration. Violating drop id or address uniqueness fails
    /// with [`Error::Conflict`](crate::Error::Conflict).
    async fn insert_registration(&self, registration: &NewRegistration)
        -> Result<AirdropRegistration>;

    /// Point lookup by drop id
    async fn find_registration_by_drop_id(&self, drop_id: &str)
        -> Result<Option<AirdropRegistration>>;

    /// Point lookup by eth address
    async fn find_registration_by_eth_address(
        &self,
        eth_address: &str,
    ) -> Result<Option<AirdropRegistration>>;

    /// Flush and release resources (graceful shutdown)
    async fn close(&self) -> Result<()>;
}

/// Open the store selected by `config.backend`.
///
/// PostgreSQL stores are migrated before they are returned.
pub async fn open_store(config: &Config) -> Result<Arc<dyn LedgerStore>> {
    match config.backend {
        StorageBackend::RocksDb => Ok(Arc::new(RocksStore::open(config)?)),
        StorageBackend::Postgres => {
            let store = PgStore::connect(&config.database).await?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
    }
}

/// Run `work`, then close `store` whatever the outcome.
///
/// An error from `work` wins over an error from closing; the latter is
/// only logged in that case.
pub async fn run_then_close<T, E, Fut>(store: &dyn LedgerStore, work: Fut) -> std::result::Result<T, E>
where
    Fut: Future<Output = std::result::Result<T, E>>,
    E: From<crate::Error>,
{
    let outcome = work.await;
    let closed = store.close().await;

    match (outcome, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(close_err)) => Err(close_err.into()),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(close_err)) => {
            tracing::warn!(error = %close_err, "Store close failed after earlier error");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// RocksDB store that counts `close` calls
    struct CountingStore {
        inner: RocksStore,
        closes: AtomicUsize,
        _temp: TempDir,
    }

    impl CountingStore {
        fn new() -> Self {
            let temp_dir = TempDir::new().unwrap();
            let mut config = Config::default();
            config.data_dir = temp_dir.path().to_path_buf();
            config.rocksdb.sync_writes = false;
            Self {
                inner: RocksStore::open(&config).unwrap(),
                closes: AtomicUsize::new(0),
                _temp: temp_dir,
            }
        }
    }

    #[async_trait]
    impl LedgerStore for CountingStore {
        async fn insert_payment(&self, payment: &NewPayment) -> Result<Payment> {
            self.inner.insert_payment(payment).await
        }
        async fn find_payment_by_tx_hash(&self, tx_hash: &str) -> Result<Option<Payment>> {
            self.inner.find_payment_by_tx_hash(tx_hash).await
        }
        async fn find_payment_by_number(&self, username: &str, number: i64) -> Result<Option<Payment>> {
            self.inner.find_payment_by_number(username, number).await
        }
        async fn latest_payment(&self, username: &str) -> Result<Option<Payment>> {
            self.inner.latest_payment(username).await
        }
        async fn confirm_payment(&self, tx_hash: &str) -> Result<ConfirmOutcome> {
            self.inner.confirm_payment(tx_hash).await
        }
        async fn insert_registration(&self, registration: &NewRegistration) -> Result<AirdropRegistration> {
            self.inner.insert_registration(registration).await
        }
        async fn find_registration_by_drop_id(&self, drop_id: &str) -> Result<Option<AirdropRegistration>> {
            self.inner.find_registration_by_drop_id(drop_id).await
        }
        async fn find_registration_by_eth_address(&self, eth_address: &str) -> Result<Option<AirdropRegistration>> {
            self.inner.find_registration_by_eth_address(eth_address).await
        }
        async fn close(&self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.inner.close().await
        }
    }

    #[tokio::test]
    async fn test_closes_after_success() {
        let store = CountingStore::new();
        let value = run_then_close(&store, async { Ok::<_, Error>(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(store.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_closes_when_work_fails() {
        let store = CountingStore::new();

        // Broker unreachable after the store was opened
        let result: std::result::Result<(), Error> = run_then_close(&store, async {
            Err(pin_bus::Error::Connection("connection refused".to_string()).into())
        })
        .await;

        assert!(matches!(result, Err(Error::Broker(pin_bus::Error::Connection(_)))));
        assert_eq!(store.closes.load(Ordering::SeqCst), 1);
    }
}
