//! Error types for filing-sync domain types.

use thiserror::Error;

/// Errors raised while converting domain types to and from their stored form.
#[derive(Debug, Error)]
pub enum TypesError {
    /// Unknown sync mode label
    #[error("invalid sync mode: {0}")]
    InvalidMode(String),

    /// Unknown sync status label
    #[error("invalid sync status: {0}")]
    InvalidStatus(String),

    /// Stored timestamp could not be parsed
    #[error("invalid timestamp {value:?}: {source}")]
    InvalidTimestamp {
        /// The offending text.
        value: String,
        /// Underlying chrono error.
        #[source]
        source: chrono::ParseError,
    },

    /// Stored date could not be parsed
    #[error("invalid date {value:?}: {source}")]
    InvalidDate {
        /// The offending text.
        value: String,
        /// Underlying chrono error.
        #[source]
        source: chrono::ParseError,
    },
}
