//! Error types for the connector core.

use thiserror::Error;

/// Result type alias for connector operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the connector core.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration, detected before any network call.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// A statement failed on the store.
    #[error("query error: {0}")]
    Query(#[from] QueryError),

    /// Acquiring or using a connection failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// The ring topology could not be used for planning.
    #[error("topology error: {0}")]
    Topology(String),

    /// The scanner was already closed.
    #[error("scanner is closed")]
    ScannerClosed,

    /// One or more batches of a write task failed.
    #[error("write failed: {failed} of {total} batches failed, first error: {first_error}")]
    WriteFailed {
        failed: u64,
        total: u64,
        first_error: String,
    },

    /// The surrounding task was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the store rejected the statement because the feature it
    /// relies on does not exist on the server.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Error::Query(QueryError::Unsupported(_)))
    }

    /// Whether this error came from task cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Batch size must be positive.
    #[error("invalid batch size: {0}")]
    InvalidBatchSize(String),

    /// Grouping buffer must hold at least one batch.
    #[error("invalid batch grouping buffer size: {0}")]
    InvalidGroupingBufferSize(usize),

    /// Unrecognized grouping key name.
    #[error("unknown batch grouping key: {0}")]
    UnknownGroupingKey(String),

    /// Parallelism level must be positive.
    #[error("invalid parallelism level: {0}")]
    InvalidParallelism(usize),

    /// Throughput caps must be positive and finite.
    #[error("invalid throughput: {0} MiB/s")]
    InvalidThroughput(f64),

    /// Split size must be positive.
    #[error("invalid split size: {0} bytes")]
    InvalidSplitSize(u64),

    /// Fetch size must be positive.
    #[error("invalid fetch size: {0} rows")]
    InvalidFetchSize(usize),

    /// Primary key columns are not all part of the selected columns.
    #[error("primary key columns missing from selected columns: {missing:?}")]
    MissingPrimaryKeyColumns { missing: Vec<String> },

    /// A referenced column does not exist in the table.
    #[error("column {column} not found in table {table}")]
    UnknownColumn { table: String, column: String },

    /// A column type has no codec.
    #[error("no codec registered for type {0}")]
    MissingCodec(String),

    /// Any other invalid option.
    #[error("invalid option: {0}")]
    Invalid(String),
}

/// Errors reported by the store for a single statement.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// The server does not support what the statement needs.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The statement is malformed or references unknown objects.
    #[error("invalid query: {0}")]
    Invalid(String),

    /// Not enough replicas were available.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Generic execution failure.
    #[error("execution failed: {0}")]
    Execution(String),

    /// A value could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_classification() {
        let err: Error = QueryError::Unsupported("system.size_estimates".into()).into();
        assert!(err.is_unsupported());
        assert!(!err.is_cancelled());

        let err: Error = QueryError::Invalid("bad".into()).into();
        assert!(!err.is_unsupported());
    }

    #[test]
    fn test_write_failed_message() {
        let err = Error::WriteFailed {
            failed: 2,
            total: 10,
            first_error: "timed out".into(),
        };
        assert_eq!(
            err.to_string(),
            "write failed: 2 of 10 batches failed, first error: timed out"
        );
    }
}
