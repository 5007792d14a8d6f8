//! Error types for metric computation.
//!
//! Utility failures (timestamps, namespaces, escaping) surface unchanged
//! through `process`; nothing here retries.

use thiserror::Error;
use umstore_core::StoreError;

#[derive(Error, Debug)]
pub enum MetricError {
    /// A timestamp representation that does not parse to a calendar value
    #[error("Malformed timestamp: {0}")]
    MalformedTimestamp(String),

    /// A namespace filter that is neither "all namespaces" nor a non-empty set of codes
    #[error("Invalid namespace: {0}")]
    InvalidNamespace(String),

    /// A catalogue metric with no strategy behind it
    #[error("Metric {0} is not implemented")]
    UnimplementedMetric(String),

    /// A metric name outside the catalogue
    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    /// Store row arity disagrees with the declared header
    #[error("Header mismatch: header has {expected} fields, row has {actual}")]
    HeaderMismatch { expected: usize, actual: usize },

    /// No cohort has been recorded yet
    #[error("No cohorts exist")]
    NoCohortsExist,

    /// `process` was called without any users
    #[error("No users to pass to process method")]
    EmptyCohort,

    /// Template key with no registered template
    #[error("Unknown query template: {0}")]
    UnknownTemplate(String),

    /// A template placeholder was left without a value
    #[error("Template {template} is missing slot {slot}")]
    MissingSlot { template: String, slot: String },

    /// A project or table name that is not a plain identifier
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// A rendered query that is not standard SQL
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// A time window whose start is after its end
    #[error("Invalid time window: {start} > {end}")]
    InvalidWindow { start: String, end: String },

    /// A process option the chosen metric needs was not given
    #[error("Option {0} is required")]
    MissingOption(&'static str),

    /// An experiment name missing from the catalogue
    #[error("Unknown experiment: {0}")]
    UnknownExperiment(String),

    /// A row value with an unexpected type
    #[error("Unexpected value in column {column}: {value}")]
    UnexpectedValue { column: String, value: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Store connector failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, MetricError>;
