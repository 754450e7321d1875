//! PostgreSQL-backed ledger store
//!
//! Uniqueness is enforced by the named constraints in `migrations/` and a
//! violation is reported as the matching [`Conflict`]. Confirmation is a
//! single conditional `UPDATE`, so any number of workers can share a
//! database.

use super::{ConfirmOutcome, LedgerStore};
use crate::{
    config::DatabaseConfig,
    error::{Conflict, Error, Result},
    types::{AirdropRegistration, NewPayment, NewRegistration, Payment, PaymentType},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// SQLSTATE for unique_violation
const UNIQUE_VIOLATION: &str = "23505";

const PAYMENT_COLUMNS: &str = "id, number, deposit_address, tx_hash, value, blockchain, \
     payment_type, username, confirmed, created_at, updated_at";

const REGISTRATION_COLUMNS: &str = "id, drop_id, eth_address, username, created_at";

/// PostgreSQL [`LedgerStore`]
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

#[derive(Debug, FromRow)]
struct PaymentRow {
    id: Uuid,
    number: i64,
    deposit_address: String,
    tx_hash: String,
    value: Decimal,
    blockchain: String,
    payment_type: String,
    username: String,
    confirmed: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = Error;

    fn try_from(row: PaymentRow) -> Result<Self> {
        let payment_type: PaymentType = row
            .payment_type
            .parse()
            .map_err(|e| Error::Storage(format!("corrupt payment row {}: {}", row.tx_hash, e)))?;

        Ok(Payment {
            id: row.id,
            number: row.number,
            deposit_address: row.deposit_address,
            tx_hash: row.tx_hash,
            value: row.value,
            blockchain: row.blockchain,
            payment_type,
            username: row.username,
            confirmed: row.confirmed,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct RegistrationRow {
    id: Uuid,
    drop_id: String,
    eth_address: String,
    username: String,
    created_at: DateTime<Utc>,
}

impl From<RegistrationRow> for AirdropRegistration {
    fn from(row: RegistrationRow) -> Self {
        AirdropRegistration {
            id: row.id,
            drop_id: row.drop_id,
            eth_address: row.eth_address,
            username: row.username,
            created_at: row.created_at,
        }
    }
}

impl PgStore {
    /// Connect a pool
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        info!(max_connections = config.max_connections, "Connecting to PostgreSQL");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await?;

        info!("Database connection pool created successfully");

        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Underlying pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending schema migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations applied");
        Ok(())
    }

    async fn fetch_payment(&self, sql: &str, key: &str, number: Option<i64>) -> Result<Option<Payment>> {
        let mut query = sqlx::query_as::<_, PaymentRow>(sql).bind(key);
        if let Some(number) = number {
            query = query.bind(number);
        }
        query
            .fetch_optional(&self.pool)
            .await?
            .map(Payment::try_from)
            .transpose()
    }

    async fn fetch_registration(&self, sql: &str, key: &str) -> Result<Option<AirdropRegistration>> {
        let row = sqlx::query_as::<_, RegistrationRow>(sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(AirdropRegistration::from))
    }
}

/// Map a unique violation to the key it collided with
fn unique_violation(err: &sqlx::Error) -> Option<&str> {
    match err {
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            Some(db_err.constraint().unwrap_or_default())
        }
        _ => None,
    }
}

fn payment_insert_error(err: sqlx::Error, payment: &NewPayment) -> Error {
    let d = &payment.details;
    let constraint = unique_violation(&err).map(str::to_owned);
    match constraint.as_deref() {
        Some("payments_tx_hash_unique") => Conflict::TxHash(d.tx_hash.clone()).into(),
        Some("payments_user_number_unique") => Conflict::PaymentNumber {
            username: d.username.clone(),
            number: payment.number,
        }
        .into(),
        _ => err.into(),
    }
}

fn registration_insert_error(err: sqlx::Error, registration: &NewRegistration) -> Error {
    let constraint = unique_violation(&err).map(str::to_owned);
    match constraint.as_deref() {
        Some("airdrop_registrations_drop_id_unique") => {
            Conflict::DropId(registration.drop_id.clone()).into()
        }
        Some("airdrop_registrations_eth_address_unique") => {
            Conflict::EthAddress(registration.eth_address.clone()).into()
        }
        _ => err.into(),
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn insert_payment(&self, payment: &NewPayment) -> Result<Payment> {
        let record = Payment::from_new(payment, Utc::now());

        let sql = format!(
            "INSERT INTO payments ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) RETURNING {}",
            PAYMENT_COLUMNS, PAYMENT_COLUMNS
        );

        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(record.id)
            .bind(record.number)
            .bind(&record.deposit_address)
            .bind(&record.tx_hash)
            .bind(record.value)
            .bind(&record.blockchain)
            .bind(record.payment_type.as_str())
            .bind(&record.username)
            .bind(record.confirmed)
            .bind(record.created_at)
            .bind(record.updated_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| payment_insert_error(e, payment))?;

        Payment::try_from(row)
    }

    async fn find_payment_by_tx_hash(&self, tx_hash: &str) -> Result<Option<Payment>> {
        let sql = format!("SELECT {} FROM payments WHERE tx_hash = $1", PAYMENT_COLUMNS);
        self.fetch_payment(&sql, tx_hash, None).await
    }

    async fn find_payment_by_number(
        &self,
        username: &str,
        number: i64,
    ) -> Result<Option<Payment>> {
        let sql = format!(
            "SELECT {} FROM payments WHERE username = $1 AND number = $2",
            PAYMENT_COLUMNS
        );
        self.fetch_payment(&sql, username, Some(number)).await
    }

    async fn latest_payment(&self, username: &str) -> Result<Option<Payment>> {
        let sql = format!(
            "SELECT {} FROM payments WHERE username = $1 ORDER BY number DESC LIMIT 1",
            PAYMENT_COLUMNS
        );
        self.fetch_payment(&sql, username, None).await
    }

    async fn confirm_payment(&self, tx_hash: &str) -> Result<ConfirmOutcome> {
        let sql = format!(
            "UPDATE payments SET confirmed = TRUE, updated_at = $2 \
             WHERE tx_hash = $1 AND confirmed = FALSE RETURNING {}",
            PAYMENT_COLUMNS
        );

        let updated = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(tx_hash)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = updated {
            return Ok(ConfirmOutcome::Transitioned(Payment::try_from(row)?));
        }

        // Lost the update: either confirmed already or never existed
        match self.find_payment_by_tx_hash(tx_hash).await? {
            Some(payment) => Ok(ConfirmOutcome::AlreadyConfirmed(payment)),
            None => Ok(ConfirmOutcome::Missing),
        }
    }

    async fn insert_registration(
        &self,
        registration: &NewRegistration,
    ) -> Result<AirdropRegistration> {
        let record = AirdropRegistration::from_new(registration, Utc::now());

        let sql = format!(
            "INSERT INTO airdrop_registrations ({}) VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            REGISTRATION_COLUMNS, REGISTRATION_COLUMNS
        );

        let row = sqlx::query_as::<_, RegistrationRow>(&sql)
            .bind(record.id)
            .bind(&record.drop_id)
            .bind(&record.eth_address)
            .bind(&record.username)
            .bind(record.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| registration_insert_error(e, registration))?;

        Ok(row.into())
    }

    async fn find_registration_by_drop_id(
        &self,
        drop_id: &str,
    ) -> Result<Option<AirdropRegistration>> {
        let sql = format!(
            "SELECT {} FROM airdrop_registrations WHERE drop_id = $1",
            REGISTRATION_COLUMNS
        );
        self.fetch_registration(&sql, drop_id).await
    }

    async fn find_registration_by_eth_address(
        &self,
        eth_address: &str,
    ) -> Result<Option<AirdropRegistration>> {
        let sql = format!(
            "SELECT {} FROM airdrop_registrations WHERE eth_address = $1",
            REGISTRATION_COLUMNS
        );
        self.fetch_registration(&sql, eth_address).await
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        info!("Database pool closed");
        Ok(())
    }
}
