//! Error types for sync-engine.

use std::path::PathBuf;

use filing_sync_client::{FetchError, SourceError};
use filing_sync_types::TypesError;

/// Main error type for sync-engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Remote fetch error (retries exhausted or fatal response).
    #[error("{0}")]
    Fetch(#[from] FetchError),

    /// Remote source could not be constructed.
    #[error("source error: {0}")]
    Source(#[from] SourceError),
}

/// Storage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Audit row was already finalized.
    #[error("sync run {sync_id} is already finalized")]
    AlreadyFinalized {
        /// The run that was finalized twice.
        sync_id: i64,
    },

    /// Audit row does not exist.
    #[error("sync run {sync_id} not found")]
    RunNotFound {
        /// The missing run.
        sync_id: i64,
    },

    /// A stored value could not be read back.
    #[error("invalid stored value: {0}")]
    InvalidRow(#[from] TypesError),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// Database directory could not be created.
    #[error("invalid database path {path}: {source}")]
    InvalidPath {
        /// The offending path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
