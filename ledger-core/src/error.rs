//! Error types for the ledger

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Lookup target absent
    #[error("{entity} not found: {key}")]
    NotFound {
        /// Entity kind ("payment", "airdrop")
        entity: &'static str,
        /// Key that was looked up
        key: String,
    },

    /// Uniqueness or idempotency violation
    #[error("Conflict: {0}")]
    Conflict(#[from] Conflict),

    /// Malformed input
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Storage error (RocksDB, PostgreSQL, encoding, IO)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Broker error (declare or publish)
    #[error("Broker error: {0}")]
    Broker(#[from] pin_bus::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// The unique key a write collided with
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    /// Payment with this transaction hash exists
    #[error("payment with tx hash {0} already exists")]
    TxHash(String),

    /// Payment number already used for this user
    #[error("payment number {number} already exists for user {username}")]
    PaymentNumber {
        /// Owner of the payment
        username: String,
        /// Sequence number
        number: i64,
    },

    /// Airdrop with this drop id exists
    #[error("airdrop with id {0} already exists")]
    DropId(String),

    /// Airdrop with this eth address exists
    #[error("airdrop with eth address {0} already exists")]
    EthAddress(String),
}

impl Error {
    /// Payment lookup miss
    pub fn payment_not_found(tx_hash: &str) -> Self {
        Error::NotFound {
            entity: "payment",
            key: tx_hash.to_string(),
        }
    }

    /// Airdrop lookup miss
    pub fn airdrop_not_found(key: &str) -> Self {
        Error::NotFound {
            entity: "airdrop",
            key: key.to_string(),
        }
    }

    /// Whether this is a lookup miss
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Whether this is a uniqueness violation
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    /// The violated key, if this is a conflict
    pub fn conflict(&self) -> Option<&Conflict> {
        match self {
            Error::Conflict(c) => Some(c),
            _ => None,
        }
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Error::Storage(format!("migration failed: {}", err))
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Storage(format!("encoding: {}", err))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
