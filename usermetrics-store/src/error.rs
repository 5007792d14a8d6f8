//! Error types for the store connector.

use thiserror::Error;

/// Errors raised while talking to a data store instance.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The underlying DuckDB driver failed
    #[error("Database error: {0}")]
    Database(#[from] duckdb::Error),

    /// No instance with this name is configured
    #[error("Unknown store instance: {0}")]
    UnknownInstance(String),

    /// A write was attempted through a read-only handle
    #[error("Handle on instance {0} is read-only")]
    ReadOnly(String),

    /// A column type the connector does not map to a `Value`
    #[error("Unsupported column type: {0}")]
    UnsupportedType(String),

    /// The connection is in use and cannot be cloned right now
    #[error("Connection busy on instance {0}")]
    Busy(String),

    /// The configured engine is not available
    #[error("Unsupported engine type: {0}")]
    UnsupportedEngine(String),

    /// Invalid engine option
    #[error("Invalid option {key}: {value}")]
    InvalidOption { key: String, value: String },
}

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;
