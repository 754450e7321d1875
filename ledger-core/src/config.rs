//! Configuration for the ledger
//!
//! Connection parameters are handed to the ledger by its host process;
//! nothing here is persisted by the ledger itself.

use crate::logging::LogFormat;
use pin_bus::PublisherConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Store implementation
    pub backend: StorageBackend,

    /// Log output format
    pub log_format: LogFormat,

    /// Default log filter when `RUST_LOG` is unset
    pub log_level: String,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// PostgreSQL configuration
    pub database: DatabaseConfig,

    /// Broker configuration
    pub broker: BrokerConfig,

    /// Payment ledger behaviour
    pub ledger: LedgerConfig,

    /// Confirmation broadcast retries
    pub publish: PublishConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "pin-ledger".to_string(),
            data_dir: PathBuf::from("./data/ledger"),
            backend: StorageBackend::RocksDb,
            log_format: LogFormat::Human,
            log_level: "info".to_string(),
            rocksdb: RocksDBConfig::default(),
            database: DatabaseConfig::default(),
            broker: BrokerConfig::default(),
            ledger: LedgerConfig::default(),
            publish: PublishConfig::default(),
        }
    }
}

/// Store implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Embedded RocksDB (single process)
    RocksDb,
    /// PostgreSQL (shared by many workers)
    Postgres,
}

impl std::str::FromStr for StorageBackend {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "rocksdb" => Ok(StorageBackend::RocksDb),
            "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
            other => Err(crate::Error::Config(format!("unknown backend: {}", other))),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,

    /// fsync the WAL on every write
    pub sync_writes: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 4,
            max_background_jobs: 4,
            enable_statistics: false,
            sync_writes: true,
        }
    }
}

/// PostgreSQL configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connection URL
    pub url: String,

    /// Pool size
    pub max_connections: u32,

    /// Pool acquire timeout (seconds)
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            acquire_timeout_secs: 5,
        }
    }
}

/// Broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// NATS server URL
    pub url: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
        }
    }
}

/// Payment ledger behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Attempts `record_payment` makes before reporting a numbering conflict
    pub max_numbering_attempts: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_numbering_attempts: 5,
        }
    }
}

/// Confirmation broadcast retries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Max publish attempts (first try included)
    pub max_attempts: u32,

    /// Initial retry delay (milliseconds)
    pub initial_retry_delay_ms: u64,

    /// Max retry delay (milliseconds)
    pub max_retry_delay_ms: u64,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_retry_delay_ms: 100,
            max_retry_delay_ms: 2_000,
        }
    }
}

impl PublishConfig {
    /// Publisher settings for the broadcast bus
    pub fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            max_attempts: self.max_attempts,
            initial_retry_delay: Duration::from_millis(self.initial_retry_delay_ms),
            max_retry_delay: Duration::from_millis(self.max_retry_delay_ms),
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse TOML; missing keys take their defaults
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Override fields from environment variables
    pub fn apply_env(&mut self) -> crate::Result<()> {
        if let Ok(data_dir) = std::env::var("LEDGER_DATA_DIR") {
            self.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(backend) = std::env::var("LEDGER_BACKEND") {
            self.backend = backend.parse()?;
        }

        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = url;
        }

        if let Ok(url) = std::env::var("NATS_URL") {
            self.broker.url = url;
        }

        if let Ok(format) = std::env::var("LEDGER_LOG_FORMAT") {
            self.log_format = format.parse()?;
        }

        if let Ok(level) = std::env::var("LEDGER_LOG_LEVEL") {
            self.log_level = level;
        }

        Ok(())
    }

    /// Reject settings the ledger cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.ledger.max_numbering_attempts == 0 {
            return Err(crate::Error::Config(
                "ledger.max_numbering_attempts must be at least 1".to_string(),
            ));
        }

        if self.publish.max_attempts == 0 {
            return Err(crate::Error::Config(
                "publish.max_attempts must be at least 1".to_string(),
            ));
        }

        if self.backend == StorageBackend::Postgres && self.database.url.is_empty() {
            return Err(crate::Error::Config(
                "database.url is required for the postgres backend".to_string(),
            ));
        }

        Ok(())
    }
}
