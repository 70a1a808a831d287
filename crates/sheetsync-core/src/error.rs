//! Error types for sheetsync core library.
//!
//! Uses hierarchical domain-specific errors following the thiserror pattern.

use crate::writer::PendingWrite;
use thiserror::Error;

/// Result type alias for sheetsync operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for sheetsync.
#[derive(Error, Debug)]
pub enum Error {
    /// Synchronous validation failure, never retried
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The named table could not be located at startup
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A remote call failed on every allowed attempt
    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: StoreError,
    },

    /// A flush could not deliver its writes
    #[error("{} writes undelivered: {source}", .writes.len())]
    UndeliveredWrites {
        writes: Vec<PendingWrite>,
        #[source]
        source: Box<Error>,
    },

    /// Snapshot construction error
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    /// Store error surfaced without retry
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The lifecycle has stopped and no longer accepts writes
    #[error("Shutdown requested")]
    Shutdown,
}

impl Error {
    /// Writes carried by an `UndeliveredWrites` error, empty otherwise.
    pub fn undelivered(&self) -> &[PendingWrite] {
        match self {
            Error::UndeliveredWrites { writes, .. } => writes,
            _ => &[],
        }
    }

    /// Attempt count of the underlying retry exhaustion, if any.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Error::RetryExhausted { attempts, .. } => Some(*attempts),
            Error::UndeliveredWrites { source, .. } => source.attempts(),
            _ => None,
        }
    }
}

/// Remote table store errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The named table does not exist
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// Store has not been initialized
    #[error("Store not initialized")]
    NotInitialized,

    /// Transient failure talking to the store
    #[error("Transient failure: {0}")]
    Transient(String),

    /// The store returned data that could not be decoded
    #[error("Malformed data: {0}")]
    Malformed(String),

    /// Local IO failure in a file-backed store
    #[error("IO failure: {0}")]
    Io(String),
}

impl StoreError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            StoreError::TableNotFound(_) | StoreError::NotInitialized
        )
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

/// Snapshot construction errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SnapshotError {
    /// The configured header row lies beyond the table extent
    #[error("Header row {row} is beyond the table extent ({available} rows)")]
    HeaderRowOutOfRange { row: u32, available: usize },

    /// Header names must be unique
    #[error("Duplicate header: {0}")]
    DuplicateHeader(String),

    /// The header row yielded no columns
    #[error("Header row {0} is empty")]
    EmptyHeader(u32),
}

// Conversion implementations for external error types

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::InvalidConfig(err.to_string())
    }
}
