//! Configuration for the ledger

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Collection browsing configuration
    pub collection: CollectionConfig,

    /// Share snapshot configuration
    pub shares: ShareConfig,

    /// Notification fan-out configuration
    pub notifications: NotificationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/frag-ledger"),
            service_name: "frag-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            rocksdb: RocksDBConfig::default(),
            collection: CollectionConfig::default(),
            shares: ShareConfig::default(),
            notifications: NotificationConfig::default(),
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

    /// How long a transaction waits for a row lock before failing (ms)
    pub lock_timeout_ms: i64,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 4,
            max_background_jobs: 4,
            lock_timeout_ms: 5_000,
            enable_statistics: false,
        }
    }
}

/// Collection browsing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    /// Mothers per page
    pub page_size: usize,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self { page_size: 12 }
    }
}

/// Share snapshot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShareConfig {
    /// Length of minted share ids
    pub id_length: usize,

    /// Attempts at minting an unused share id before giving up
    pub max_id_attempts: u32,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            id_length: 24,
            max_id_attempts: 5,
        }
    }
}

/// Notification fan-out configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Enable fan-out
    pub enabled: bool,

    /// Bounded mailbox size; notifications beyond it are dropped
    pub mailbox_capacity: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mailbox_capacity: 1000,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    ///
    /// `FRAG_LEDGER_CONFIG` names a TOML file used as the base; the other
    /// variables override single fields on top of it.
    pub fn from_env() -> crate::Result<Self> {
        let mut config = match std::env::var("FRAG_LEDGER_CONFIG") {
            Ok(path) => Config::from_file(path)?,
            Err(_) => Config::default(),
        };

        if let Ok(data_dir) = std::env::var("FRAG_LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(page_size) = std::env::var("FRAG_LEDGER_PAGE_SIZE") {
            config.collection.page_size = page_size.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid FRAG_LEDGER_PAGE_SIZE: {}", e))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> crate::Result<()> {
        if self.collection.page_size == 0 {
            return Err(crate::Error::Config("collection.page_size must be positive".into()));
        }
        if self.shares.id_length < 8 {
            return Err(crate::Error::Config("shares.id_length must be at least 8".into()));
        }
        if self.shares.max_id_attempts == 0 {
            return Err(crate::Error::Config("shares.max_id_attempts must be positive".into()));
        }
        Ok(())
    }
}
