//! Error types for podcast-dl
//!
//! This module provides the error taxonomy used across the library:
//! - Admission errors (item not found, insufficient storage) surfaced to callers
//! - Transfer failures (bad status, size mismatch, network) recorded on the download
//! - Persistence and filesystem errors with context about what was attempted

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for podcast-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for podcast-dl
///
/// This is the primary error type used throughout the library. Each variant includes
/// contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_concurrent_downloads")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Download-related error
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found (subscription, item or download)
    #[error("not found: {0}")]
    NotFound(String),

    /// Shutdown in progress - not accepting new work
    #[error("shutdown in progress: not accepting new downloads")]
    ShuttingDown,

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Insufficient disk space to admit a download
    #[error("insufficient disk space: need {required} bytes, have {available} bytes")]
    InsufficientSpace {
        /// Number of bytes required (declared size plus safety buffer)
        required: u64,
        /// Number of bytes currently available on disk
        available: u64,
    },

    /// Failed to check disk space
    #[error("failed to check disk space: {0}")]
    DiskSpaceCheckFailed(String),

    /// Feed source failed to produce a snapshot
    #[error("feed error: {0}")]
    Feed(String),

    /// Consumption oracle lookup failed
    #[error("consumption oracle error: {0}")]
    Oracle(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),

    /// Constraint violation (e.g., duplicate key)
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

/// Download-related errors
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Item to enqueue does not exist
    #[error("item {id} not found")]
    ItemNotFound {
        /// The item ID that was not found
        id: i64,
    },

    /// Download not found in database
    #[error("download {id} not found")]
    NotFound {
        /// The download ID that was not found
        id: i64,
    },

    /// Server answered with a status other than 200/206/416
    #[error("HTTP {status}: {reason}")]
    HttpStatus {
        /// The HTTP status code
        status: u16,
        /// Canonical reason phrase (may be empty)
        reason: String,
    },

    /// Final file size disagrees with the expected size beyond tolerance
    #[error("size mismatch: expected {expected}, got {actual}")]
    SizeMismatch {
        /// Expected total size in bytes
        expected: u64,
        /// Actual size on disk in bytes
        actual: u64,
    },

    /// Transfer was cancelled while streaming
    #[error("transfer of download {id} cancelled")]
    Cancelled {
        /// The download ID whose transfer was cancelled
        id: i64,
    },

    /// Whole-transfer timeout elapsed
    #[error("transfer timed out after {secs} seconds")]
    TimedOut {
        /// Configured timeout in seconds
        secs: u64,
    },

    /// Relative path escapes the download root
    #[error("path {path} resolves outside the download root")]
    InvalidPath {
        /// The offending relative path
        path: PathBuf,
    },
}

impl Error {
    /// Whether this error is a transfer failure that should be recorded on the
    /// download (and counted against its retries) rather than surfaced to a caller.
    pub fn is_transfer_failure(&self) -> bool {
        matches!(
            self,
            Error::Network(_)
                | Error::Io(_)
                | Error::Download(
                    DownloadError::HttpStatus { .. }
                        | DownloadError::SizeMismatch { .. }
                        | DownloadError::TimedOut { .. }
                )
        )
    }
}
