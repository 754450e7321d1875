//! Airdrop registry
//!
//! Registrations bind a drop id to one receiving address. Both keys are
//! unique across all users and a registration never changes once stored.

use crate::{
    error::{Conflict, Error, Result},
    metrics::Metrics,
    store::LedgerStore,
    types::{AirdropRegistration, NewRegistration},
};
use std::sync::Arc;
use tracing::{debug, info};

/// Airdrop registry
#[derive(Clone)]
pub struct AirdropRegistry {
    store: Arc<dyn LedgerStore>,
    metrics: Metrics,
}

impl AirdropRegistry {
    /// Create registry over a shared store
    pub fn new(store: Arc<dyn LedgerStore>, metrics: Metrics) -> Self {
        Self { store, metrics }
    }

    /// Register `eth_address` for `drop_id` on behalf of `username`.
    ///
    /// A taken drop id is reported before a taken address.
    pub async fn register_airdrop(
        &self,
        drop_id: &str,
        eth_address: &str,
        username: &str,
    ) -> Result<AirdropRegistration> {
        let registration = NewRegistration {
            drop_id: drop_id.to_string(),
            eth_address: eth_address.to_string(),
            username: username.to_string(),
        };
        registration.validate()?;

        if self.store.find_registration_by_drop_id(drop_id).await?.is_some() {
            debug!(drop_id, "Airdrop id already registered");
            self.metrics.registration_conflicts.inc();
            return Err(Conflict::DropId(drop_id.to_string()).into());
        }

        if self
            .store
            .find_registration_by_eth_address(eth_address)
            .await?
            .is_some()
        {
            debug!(eth_address, "Airdrop address already registered");
            self.metrics.registration_conflicts.inc();
            return Err(Conflict::EthAddress(eth_address.to_string()).into());
        }

        match self.store.insert_registration(&registration).await {
            Ok(created) => {
                self.metrics.registrations_created.inc();
                info!(drop_id, eth_address, username, "Airdrop registered");
                Ok(created)
            }
            Err(e) => {
                if e.is_conflict() {
                    self.metrics.registration_conflicts.inc();
                }
                Err(e)
            }
        }
    }

    /// Look up a registration by drop id
    pub async fn find_by_drop_id(&self, drop_id: &str) -> Result<AirdropRegistration> {
        self.store
            .find_registration_by_drop_id(drop_id)
            .await?
            .ok_or_else(|| Error::airdrop_not_found(drop_id))
    }

    /// Look up a registration by receiving address
    pub async fn find_by_eth_address(&self, eth_address: &str) -> Result<AirdropRegistration> {
        self.store
            .find_registration_by_eth_address(eth_address)
            .await?
            .ok_or_else(|| Error::airdrop_not_found(eth_address))
    }
}

impl std::fmt::Debug for AirdropRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AirdropRegistry").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{store::RocksStore, Config};
    use tempfile::TempDir;

    fn registry() -> (AirdropRegistry, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.rocksdb.sync_writes = false;

        let store = Arc::new(RocksStore::open(&config).unwrap());
        (AirdropRegistry::new(store, Metrics::new().unwrap()), temp_dir)
    }

    #[tokio::test]
    async fn test_register_and_find() {
        let (registry, _temp) = registry();

        let created = registry.register_airdrop("drop-1", "0xBBB", "bob").await.unwrap();
        assert_eq!(created.drop_id, "drop-1");
        assert_eq!(created.username, "bob");

        assert_eq!(registry.find_by_drop_id("drop-1").await.unwrap(), created);
        assert_eq!(registry.find_by_eth_address("0xBBB").await.unwrap(), created);
        assert_eq!(registry.metrics.registrations_created.get(), 1);
    }

    #[tokio::test]
    async fn test_reused_address_rejected() {
        let (registry, _temp) = registry();
        registry.register_airdrop("drop-1", "0xBBB", "bob").await.unwrap();

        let err = registry
            .register_airdrop("drop-2", "0xBBB", "carol")
            .await
            .unwrap_err();
        assert_eq!(err.conflict(), Some(&Conflict::EthAddress("0xBBB".to_string())));
        assert_eq!(
            err.to_string(),
            "Conflict: airdrop with eth address 0xBBB already exists"
        );

        assert!(registry.find_by_drop_id("drop-2").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_drop_id_reported_first() {
        let (registry, _temp) = registry();
        registry.register_airdrop("drop-1", "0xBBB", "bob").await.unwrap();

        // Both keys taken: the drop id wins
        let err = registry
            .register_airdrop("drop-1", "0xBBB", "bob")
            .await
            .unwrap_err();
        assert_eq!(err.conflict(), Some(&Conflict::DropId("drop-1".to_string())));
        assert_eq!(registry.metrics.registration_conflicts.get(), 1);
    }

    #[tokio::test]
    async fn test_reused_drop_id_rejected() {
        let (registry, _temp) = registry();
        registry.register_airdrop("drop-1", "0xBBB", "bob").await.unwrap();

        // Fresh address and user, taken drop id
        let err = registry
            .register_airdrop("drop-1", "0xCCC", "carol")
            .await
            .unwrap_err();
        assert_eq!(err.conflict(), Some(&Conflict::DropId("drop-1".to_string())));
        assert_eq!(err.to_string(), "Conflict: airdrop with id drop-1 already exists");

        assert!(registry.find_by_eth_address("0xCCC").await.unwrap_err().is_not_found());
        assert_eq!(registry.find_by_drop_id("drop-1").await.unwrap().eth_address, "0xBBB");
    }

    #[tokio::test]
    async fn test_empty_identifiers_rejected() {
        let (registry, _temp) = registry();

        for (drop_id, address, user) in [("", "0xB", "bob"), ("d", "", "bob"), ("d", "0xB", "")] {
            let err = registry.register_airdrop(drop_id, address, user).await.unwrap_err();
            assert!(matches!(err, Error::InvalidArgument(_)));
        }
        assert!(registry.find_by_drop_id("d").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_find_missing() {
        let (registry, _temp) = registry();
        let err = registry.find_by_eth_address("0xNONE").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "airdrop not found: 0xNONE");
    }
}
