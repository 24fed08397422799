//! Error taxonomy for metrics storage.

use std::io::ErrorKind;

use rusqlite::ErrorCode;
use thiserror::Error;

/// Every failure a storage operation can report.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Malformed update or unknown metric kind.
    #[error("Invalid metric update: {0}")]
    Validation(String),

    /// No metric of that kind and name.
    #[error("Metric not found: {0}")]
    NotFound(String),

    /// Failure worth retrying.
    #[error("Transient backend error: {0}")]
    Transient(String),

    /// Terminal backend failure.
    #[error("Backend error: {0}")]
    Backend(String),

    /// Every retry attempt failed.
    #[error("Operation failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Attempts made, the first included.
        attempts: usize,
        /// Message of the final failure.
        last: String,
    },

    /// Snapshot could not be written or read.
    #[error("Snapshot persistence error: {0}")]
    Persistence(String),

    /// Invalid or unreadable configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem or socket failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// SQLite failure.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A blocking task panicked or was aborted.
    #[error("Async task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// The caller cancelled the operation.
    #[error("Operation cancelled")]
    Cancelled,
}

/// Result type alias for metrics storage operations
pub type Result<T> = std::result::Result<T, MetricsError>;

impl MetricsError {
    /// Creates a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Creates a new not-found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Creates a new transient backend error
    pub fn transient<S: Into<String>>(msg: S) -> Self {
        Self::Transient(msg.into())
    }

    /// Creates a new terminal backend error
    pub fn backend<S: Into<String>>(msg: S) -> Self {
        Self::Backend(msg.into())
    }

    /// Creates a new persistence error
    pub fn persistence<S: Into<String>>(msg: S) -> Self {
        Self::Persistence(msg.into())
    }

    /// Creates a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Returns true if retrying the failed operation may succeed.
    ///
    /// Only connectivity faults qualify: network-level I/O failures and
    /// database errors that report a busy, locked or failing connection.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient(_) => true,
            Self::Io(err) => matches!(
                err.kind(),
                ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::ConnectionRefused
                    | ErrorKind::NotConnected
                    | ErrorKind::BrokenPipe
                    | ErrorKind::TimedOut
                    | ErrorKind::Interrupted
            ),
            Self::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::SystemIoFailure
            ),
            _ => false,
        }
    }

    /// Returns the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Transient(_) => "transient",
            Self::Backend(_) | Self::RetriesExhausted { .. } => "backend",
            Self::Database(_) if self.is_transient() => "transient",
            Self::Database(_) => "backend",
            Self::Persistence(_) | Self::Io(_) | Self::Serialization(_) => "persistence",
            Self::Config(_) => "config",
            Self::Join(_) => "async",
            Self::Cancelled => "cancelled",
        }
    }
}
