//! Error types for the ledger

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or malformed attributes, unrecognized type or rule
    #[error("Validation error: {0}")]
    Validation(String),

    /// Frag absent, not owned by the caller, not alive, out of splits, or
    /// private. The variants are folded together so callers cannot probe for
    /// the existence of private items.
    #[error("Not found or forbidden")]
    NotFoundOrForbidden,

    /// Disallowed or self-transfer target
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    /// Malformed import batch
    #[error("Import validation failed: {0}")]
    ImportValidation(String),

    /// Persisted state breaks a structural invariant (e.g. two lineage roots)
    #[error("Integrity violation: {0}")]
    IntegrityViolation(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Row serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Snapshot serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Metrics registration error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl Error {
    /// Whether this error came from caller input rather than the store
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::Validation(_)
                | Error::NotFoundOrForbidden
                | Error::InvalidRecipient(_)
                | Error::ImportValidation(_)
        )
    }
}
