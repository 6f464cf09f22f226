//! Error types for the Anchor state store.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("failed to encode value: {0}")]
    Encode(#[source] serde_json::Error),

    /// A stored value no longer parses as its record type.
    #[error("failed to decode value at key {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}
