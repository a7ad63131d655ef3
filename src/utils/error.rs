//! Error types for the ingestion stages
//!
//! Each stage returns its own error enum. All of them classify into
//! [`ErrorKind`](crate::error::ErrorKind) through the
//! [`Classify`](crate::error::Classify) trait, so callers decide between
//! retry, skip and abort without inspecting concrete types.

use std::time::Duration;
use thiserror::Error;

use crate::error::ErrorKind;

/// Errors that can occur during HTTP fetching operations
#[derive(Error, Debug)]
pub enum FetchError {
    /// Transport-level failure (connect, TLS, body read)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Request timeout
    #[error("Request timeout")]
    Timeout,

    /// Rate limited by the remote side (HTTP 429)
    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Resource absent (HTTP 404)
    #[error("Resource not found")]
    NotFound,

    /// Any other non-200 status
    #[error("Unexpected status: {0}")]
    Status(u16),

    /// Every attempt failed
    #[error("Gave up after {attempts} attempts (last error: {last})")]
    RetriesExhausted { attempts: u32, last: ErrorKind },

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The HTTP session was already released
    #[error("HTTP client is closed")]
    Closed,
}

impl FetchError {
    /// Map a non-200 status to the matching error
    pub fn from_status(status: u16, retry_after: Option<Duration>) -> Self {
        match status {
            404 => Self::NotFound,
            429 => Self::RateLimited { retry_after },
            other => Self::Status(other),
        }
    }
}

/// Errors raised by the record store and the object store
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite failure
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A thread holding the connection panicked
    #[error("Store lock poisoned")]
    LockPoisoned,

    /// A blocking task could not be joined
    #[error("Blocking task failed: {0}")]
    Task(String),

    /// Object key would escape the store root
    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    /// The store was closed during shutdown
    #[error("Store is closed")]
    Closed,
}

/// Per-item failures reported by the idempotent pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Source-specific extraction failed
    #[error("Extraction failed: {0}")]
    Extraction(String),

    /// A fetch needed by the item failed
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// Media download or upload failed
    #[error("Media failed: {0}")]
    Media(String),

    /// The prepared record carries a different key than the candidate
    #[error("Record key '{actual}' does not match candidate key '{expected}'")]
    KeyMismatch { expected: String, actual: String },

    /// Persistence failed for a reason other than a uniqueness violation
    #[error("Persistence failed: {0}")]
    Store(#[from] StoreError),
}

impl PipelineError {
    pub fn extraction(msg: impl Into<String>) -> Self {
        Self::Extraction(msg.into())
    }

    pub fn media(msg: impl Into<String>) -> Self {
        Self::Media(msg.into())
    }
}
