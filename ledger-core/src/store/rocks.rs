//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `payments` - Payments (key: tx_hash)
//! - `payment_numbers` - Unique index (key: len(username) || username || number) -> tx_hash
//! - `registrations` - Airdrop registrations (key: drop_id)
//! - `registration_addresses` - Unique index (key: eth_address) -> drop_id
//!
//! Every write that must respect a unique key or the confirmation
//! precondition checks and commits under the writer lock with a single
//! `WriteBatch`. RocksDB's lock file keeps other processes out of the
//! directory, so the writer lock covers every writer of the data.

use super::{ConfirmOutcome, LedgerStore};
use crate::{
    error::{Conflict, Error, Result},
    types::{AirdropRegistration, NewPayment, NewRegistration, Payment},
    Config,
};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch,
    WriteOptions, DB,
};
use std::sync::Arc;

/// Column family names
const CF_PAYMENTS: &str = "payments";
const CF_PAYMENT_NUMBERS: &str = "payment_numbers";
const CF_REGISTRATIONS: &str = "registrations";
const CF_REGISTRATION_ADDRESSES: &str = "registration_addresses";

/// RocksDB-backed [`LedgerStore`]
pub struct RocksStore {
    db: Arc<DB>,
    writer: Mutex<()>,
    sync_writes: bool,
}

impl RocksStore {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        // Database options
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_PAYMENTS, Self::cf_options_records()),
            ColumnFamilyDescriptor::new(CF_PAYMENT_NUMBERS, Self::cf_options_indices()),
            ColumnFamilyDescriptor::new(CF_REGISTRATIONS, Self::cf_options_records()),
            ColumnFamilyDescriptor::new(CF_REGISTRATION_ADDRESSES, Self::cf_options_indices()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened RocksDB ledger store");

        Ok(Self {
            db: Arc::new(db),
            writer: Mutex::new(()),
            sync_writes: config.rocksdb.sync_writes,
        })
    }

    // Column family options

    fn cf_options_records() -> Options {
        let mut opts = Options::default();
        // Records are read far more often than written
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        // Existence checks benefit from bloom filters
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false); // 10 bits per key
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    // Helper: get column family handle

    fn cf_handle(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.sync_writes);
        self.db.write_opt(batch, &opts)?;
        Ok(())
    }

    // Index key helpers

    fn username_prefix(username: &str) -> Vec<u8> {
        let bytes = username.as_bytes();
        let mut key = Vec::with_capacity(4 + bytes.len() + 8);
        key.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        key.extend_from_slice(bytes);
        key
    }

    /// Big-endian number keeps a user's payments sorted by number
    fn payment_number_key(username: &str, number: i64) -> Vec<u8> {
        let mut key = Self::username_prefix(username);
        key.extend_from_slice(&(number as u64).to_be_bytes());
        key
    }

    // Payment operations

    fn get_payment(&self, tx_hash: &str) -> Result<Option<Payment>> {
        let cf = self.cf_handle(CF_PAYMENTS)?;
        match self.db.get_cf(&cf, tx_hash.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    fn get_payment_by_number(&self, username: &str, number: i64) -> Result<Option<Payment>> {
        let cf = self.cf_handle(CF_PAYMENT_NUMBERS)?;
        let key = Self::payment_number_key(username, number);

        match self.db.get_cf(&cf, &key)? {
            Some(tx_hash) => {
                let tx_hash = String::from_utf8(tx_hash)
                    .map_err(|e| Error::Storage(format!("corrupt number index: {}", e)))?;
                self.get_payment(&tx_hash)
            }
            None => Ok(None),
        }
    }

    fn get_latest_payment(&self, username: &str) -> Result<Option<Payment>> {
        let cf = self.cf_handle(CF_PAYMENT_NUMBERS)?;
        let prefix = Self::username_prefix(username);
        let upper = Self::payment_number_key(username, i64::MAX);

        let mut iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&upper[..], Direction::Reverse));

        match iter.next() {
            Some(item) => {
                let (key, tx_hash) = item?;
                if !key.starts_with(&prefix) {
                    return Ok(None);
                }
                let tx_hash = String::from_utf8(tx_hash.to_vec())
                    .map_err(|e| Error::Storage(format!("corrupt number index: {}", e)))?;
                self.get_payment(&tx_hash)
            }
            None => Ok(None),
        }
    }

    fn put_new_payment(&self, new: &NewPayment) -> Result<Payment> {
        let _writer = self.writer.lock();

        let d = &new.details;
        let cf_payments = self.cf_handle(CF_PAYMENTS)?;
        let cf_numbers = self.cf_handle(CF_PAYMENT_NUMBERS)?;
        let number_key = Self::payment_number_key(&d.username, new.number);

        if self.db.get_pinned_cf(&cf_payments, d.tx_hash.as_bytes())?.is_some() {
            return Err(Conflict::TxHash(d.tx_hash.clone()).into());
        }
        if self.db.get_pinned_cf(&cf_numbers, &number_key)?.is_some() {
            return Err(Conflict::PaymentNumber {
                username: d.username.clone(),
                number: new.number,
            }
            .into());
        }

        let payment = Payment::from_new(new, Utc::now());

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_payments, payment.tx_hash.as_bytes(), bincode::serialize(&payment)?);
        batch.put_cf(&cf_numbers, &number_key, payment.tx_hash.as_bytes());
        self.write(batch)?;

        tracing::debug!(
            tx_hash = %payment.tx_hash,
            username = %payment.username,
            number = payment.number,
            "Payment stored"
        );

        Ok(payment)
    }

    fn set_confirmed(&self, tx_hash: &str) -> Result<ConfirmOutcome> {
        let _writer = self.writer.lock();

        let mut payment = match self.get_payment(tx_hash)? {
            Some(payment) => payment,
            None => return Ok(ConfirmOutcome::Missing),
        };

        if payment.confirmed {
            return Ok(ConfirmOutcome::AlreadyConfirmed(payment));
        }

        payment.confirmed = true;
        payment.updated_at = Utc::now();

        let cf = self.cf_handle(CF_PAYMENTS)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf, tx_hash.as_bytes(), bincode::serialize(&payment)?);
        self.write(batch)?;

        Ok(ConfirmOutcome::Transitioned(payment))
    }

    // Registration operations

    fn get_registration(&self, drop_id: &str) -> Result<Option<AirdropRegistration>> {
        let cf = self.cf_handle(CF_REGISTRATIONS)?;
        match self.db.get_cf(&cf, drop_id.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    fn get_registration_by_address(&self, eth_address: &str) -> Result<Option<AirdropRegistration>> {
        let cf = self.cf_handle(CF_REGISTRATION_ADDRESSES)?;
        match self.db.get_cf(&cf, eth_address.as_bytes())? {
            Some(drop_id) => {
                let drop_id = String::from_utf8(drop_id)
                    .map_err(|e| Error::Storage(format!("corrupt address index: {}", e)))?;
                self.get_registration(&drop_id)
            }
            None => Ok(None),
        }
    }

    fn put_new_registration(&self, new: &NewRegistration) -> Result<AirdropRegistration> {
        let _writer = self.writer.lock();

        let cf_registrations = self.cf_handle(CF_REGISTRATIONS)?;
        let cf_addresses = self.cf_handle(CF_REGISTRATION_ADDRESSES)?;

        if self
            .db
            .get_pinned_cf(&cf_registrations, new.drop_id.as_bytes())?
            .is_some()
        {
            return Err(Conflict::DropId(new.drop_id.clone()).into());
        }
        if self
            .db
            .get_pinned_cf(&cf_addresses, new.eth_address.as_bytes())?
            .is_some()
        {
            return Err(Conflict::EthAddress(new.eth_address.clone()).into());
        }

        let registration = AirdropRegistration::from_new(new, Utc::now());

        let mut batch = WriteBatch::default();
        batch.put_cf(
            &cf_registrations,
            registration.drop_id.as_bytes(),
            bincode::serialize(&registration)?,
        );
        batch.put_cf(
            &cf_addresses,
            registration.eth_address.as_bytes(),
            registration.drop_id.as_bytes(),
        );
        self.write(batch)?;

        Ok(registration)
    }
}

impl std::fmt::Debug for RocksStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksStore")
            .field("path", &self.db.path())
            .field("sync_writes", &self.sync_writes)
            .finish()
    }
}

#[async_trait]
impl LedgerStore for RocksStore {
    async fn insert_payment(&self, payment: &NewPayment) -> Result<Payment> {
        self.put_new_payment(payment)
    }

    async fn find_payment_by_tx_hash(&self, tx_hash: &str) -> Result<Option<Payment>> {
        self.get_payment(tx_hash)
    }

    async fn find_payment_by_number(
        &self,
        username: &str,
        number: i64,
    ) -> Result<Option<Payment>> {
        self.get_payment_by_number(username, number)
    }

    async fn latest_payment(&self, username: &str) -> Result<Option<Payment>> {
        self.get_latest_payment(username)
    }

    async fn confirm_payment(&self, tx_hash: &str) -> Result<ConfirmOutcome> {
        self.set_confirmed(tx_hash)
    }

    async fn insert_registration(
        &self,
        registration: &NewRegistration,
    ) -> Result<AirdropRegistration> {
        self.put_new_registration(registration)
    }

    async fn find_registration_by_drop_id(
        &self,
        drop_id: &str,
    ) -> Result<Option<AirdropRegistration>> {
        self.get_registration(drop_id)
    }

    async fn find_registration_by_eth_address(
        &self,
        eth_address: &str,
    ) -> Result<Option<AirdropRegistration>> {
        self.get_registration_by_address(eth_address)
    }

    async fn close(&self) -> Result<()> {
        self.db.flush()?;
        tracing::info!("RocksDB flushed for shutdown");
        Ok(())
    }
}
