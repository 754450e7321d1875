//! Pin Ledger Core
//!
//! Payment ledger and airdrop registry for the pinning service.
//!
//! # Architecture
//!
//! - **Store port**: [`LedgerStore`] with RocksDB and PostgreSQL adapters
//! - **Store-arbitrated**: uniqueness and confirmation are decided by the
//!   store, so any number of workers may share it
//! - **Broadcast**: state-changing confirmations publish one event on the
//!   `ipfs-pin` exchange via [`pin_bus`]
//!
//! # Invariants
//!
//! - Transaction hashes are unique across all users
//! - `(username, number)` is unique
//! - `confirmed` only ever goes from false to true
//! - Drop ids and eth addresses are each unique across all registrations

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod airdrop;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod payments;
pub mod retry;
pub mod store;
pub mod types;

// Re-exports
pub use airdrop::AirdropRegistry;
pub use config::Config;
pub use error::{Conflict, Error, Result};
pub use logging::{init_logging, LogFormat};
pub use metrics::Metrics;
pub use payments::PaymentLedger;
pub use store::{open_store, ConfirmOutcome, LedgerStore, PgStore, RocksStore};
pub use types::{
    AirdropRegistration, NewPayment, NewRegistration, Payment, PaymentDetails, PaymentType,
};
