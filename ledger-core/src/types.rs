//! Core types for the ledger
//!
//! Entities are plain data: uniqueness and state-transition rules live in
//! the store adapters and the managers, and the relational schema lives in
//! `migrations/`.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use pin_bus::ConfirmationEvent;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Currency the payment was made in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentType {
    /// Ether
    Eth,
    /// RTC token
    Rtc,
    /// Monero
    Xmr,
    /// Bitcoin
    Btc,
    /// Litecoin
    Ltc,
}

impl PaymentType {
    /// Upper-case tag
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::Eth => "ETH",
            PaymentType::Rtc => "RTC",
            PaymentType::Xmr => "XMR",
            PaymentType::Btc => "BTC",
            PaymentType::Ltc => "LTC",
        }
    }
}

impl FromStr for PaymentType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ETH" => Ok(PaymentType::Eth),
            "RTC" => Ok(PaymentType::Rtc),
            "XMR" => Ok(PaymentType::Xmr),
            "BTC" => Ok(PaymentType::Btc),
            "LTC" => Ok(PaymentType::Ltc),
            other => Err(Error::InvalidArgument(format!(
                "unknown payment type: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for PaymentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payment parameters supplied by the transaction detector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDetails {
    /// Address the user paid into
    pub deposit_address: String,

    /// Transaction hash (globally unique)
    pub tx_hash: String,

    /// Credited value, never negative
    pub value: Decimal,

    /// Blockchain the transaction lives on
    pub blockchain: String,

    /// Currency tag
    pub payment_type: PaymentType,

    /// Owner of the payment
    pub username: String,
}

impl PaymentDetails {
    /// Attach a sequence number
    pub fn numbered(self, number: i64) -> NewPayment {
        NewPayment {
            number,
            details: self,
        }
    }
}

/// Payment about to be inserted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPayment {
    /// Per-user sequence number
    pub number: i64,

    /// Payment parameters
    pub details: PaymentDetails,
}

impl NewPayment {
    /// Build from positional parameters
    pub fn new(
        number: i64,
        deposit_address: impl Into<String>,
        tx_hash: impl Into<String>,
        value: Decimal,
        blockchain: impl Into<String>,
        payment_type: PaymentType,
        username: impl Into<String>,
    ) -> Self {
        PaymentDetails {
            deposit_address: deposit_address.into(),
            tx_hash: tx_hash.into(),
            value,
            blockchain: blockchain.into(),
            payment_type,
            username: username.into(),
        }
        .numbered(number)
    }

    /// Check input invariants
    pub fn validate(&self) -> Result<()> {
        let d = &self.details;

        if d.value.is_sign_negative() && !d.value.is_zero() {
            return Err(Error::InvalidArgument(format!(
                "value must not be negative: {}",
                d.value
            )));
        }
        if self.number < 1 {
            return Err(Error::InvalidArgument(format!(
                "payment number must be positive: {}",
                self.number
            )));
        }
        require_non_empty("tx_hash", &d.tx_hash)?;
        require_non_empty("deposit_address", &d.deposit_address)?;
        require_non_empty("username", &d.username)?;

        Ok(())
    }
}

/// Recorded payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Row ID (UUIDv7)
    pub id: Uuid,

    /// Per-user sequence number
    pub number: i64,

    /// Address the user paid into
    pub deposit_address: String,

    /// Transaction hash
    pub tx_hash: String,

    /// Credited value
    pub value: Decimal,

    /// Blockchain identifier
    pub blockchain: String,

    /// Currency tag
    pub payment_type: PaymentType,

    /// Owner
    pub username: String,

    /// Set once, never cleared
    pub confirmed: bool,

    /// Insert time
    pub created_at: DateTime<Utc>,

    /// Last mutation time
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Materialize an unconfirmed payment
    pub fn from_new(new: &NewPayment, now: DateTime<Utc>) -> Self {
        let d = &new.details;
        Self {
            id: Uuid::now_v7(),
            number: new.number,
            deposit_address: d.deposit_address.clone(),
            tx_hash: d.tx_hash.clone(),
            value: d.value,
            blockchain: d.blockchain.clone(),
            payment_type: d.payment_type,
            username: d.username.clone(),
            confirmed: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Event broadcast for this payment's confirmation
    pub fn confirmation_event(&self) -> ConfirmationEvent {
        ConfirmationEvent {
            tx_hash: self.tx_hash.clone(),
            username: self.username.clone(),
            value: self.value,
            timestamp: self.updated_at,
        }
    }
}

/// Airdrop registration about to be inserted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRegistration {
    /// Drop identifier (globally unique)
    pub drop_id: String,

    /// Receiving address (globally unique)
    pub eth_address: String,

    /// Owner
    pub username: String,
}

impl NewRegistration {
    /// Check input invariants
    pub fn validate(&self) -> Result<()> {
        require_non_empty("drop_id", &self.drop_id)?;
        require_non_empty("eth_address", &self.eth_address)?;
        require_non_empty("username", &self.username)?;
        Ok(())
    }
}

/// Recorded airdrop registration (immutable)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AirdropRegistration {
    /// Row ID (UUIDv7)
    pub id: Uuid,

    /// Drop identifier
    pub drop_id: String,

    /// Receiving address
    pub eth_address: String,

    /// Owner
    pub username: String,

    /// Insert time
    pub created_at: DateTime<Utc>,
}

impl AirdropRegistration {
    /// Materialize a registration
    pub fn from_new(new: &NewRegistration, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            drop_id: new.drop_id.clone(),
            eth_address: new.eth_address.clone(),
            username: new.username.clone(),
            created_at: now,
        }
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidArgument(format!("{} must not be empty", field)));
    }
    Ok(())
}
