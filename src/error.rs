//! Unified error handling for the newsdesk crate
//!
//! Every stage of the ingestion engine returns an explicit error value.
//! This module ties them together:
//!
//! - [`ErrorKind`] - the handling taxonomy (retry, skip, abort)
//! - [`Classify`] - implemented by every error type to report its kind
//! - [`Error`] - unified enum wrapping all domain-specific errors
//!
//! # Handling strategy by kind
//!
//! | Kind | Handling |
//! |------|----------|
//! | `Transient` | retried with capped backoff, then surfaced as a skipped fetch |
//! | `RateLimited` | retried after `Retry-After` or backoff |
//! | `NotFound` | no retry, the unit of work is skipped |
//! | `ParseFailure` | item reported failed, cycle continues |
//! | `UniqueViolation` | treated as successful dedup |
//! | `Persistence` | transaction rolled back, item failed, cycle continues |
//! | `Fatal` | startup only, process exits non-zero |
//!
//! # Usage
//!
//! ```rust,ignore
//! use newsdesk::error::{Classify, Error, ErrorKind};
//!
//! fn handle_error(err: Error) {
//!     match err.kind() {
//!         ErrorKind::Fatal => eprintln!("Fatal error: {err}"),
//!         kind if err.is_recoverable() => println!("Retrying ({kind}): {err}"),
//!         _ => println!("Skipping: {err}"),
//!     }
//! }
//! ```

use std::fmt;
use std::io;
use thiserror::Error;

pub use crate::config::ConfigError;
pub use crate::scheduler::error::SchedulerError;
pub use crate::utils::error::{FetchError, PipelineError, StoreError};

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Network timeout, transport failure, 5xx and other unexpected statuses
    Transient,
    /// HTTP 429
    RateLimited,
    /// HTTP 404
    NotFound,
    /// Content could not be extracted
    ParseFailure,
    /// Record with the same idempotency key already exists
    UniqueViolation,
    /// Any other storage failure
    Persistence,
    /// Startup dependency unreachable after its retry budget
    Fatal,
    /// Invalid or missing configuration
    Config,
    /// Work was cancelled by shutdown
    Cancelled,
}

impl ErrorKind {
    /// Stable label for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::RateLimited => "rate_limited",
            Self::NotFound => "not_found",
            Self::ParseFailure => "parse_failure",
            Self::UniqueViolation => "unique_violation",
            Self::Persistence => "persistence",
            Self::Fatal => "fatal",
            Self::Config => "config",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient | Self::RateLimited)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common interface implemented by all newsdesk error types
pub trait Classify: std::error::Error {
    /// The handling category of this error
    fn kind(&self) -> ErrorKind;

    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool {
        self.kind().is_retryable()
    }
}

/// Unified error type for the newsdesk crate
#[derive(Error, Debug)]
pub enum Error {
    /// Fetch-specific errors
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Record store and object store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Per-item pipeline errors
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Scheduler lifecycle errors
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Classify for FetchError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Http(_) | Self::Timeout | Self::Status(_) => ErrorKind::Transient,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::NotFound => ErrorKind::NotFound,
            // Retries are already spent; the caller skips the unit of work.
            Self::RetriesExhausted { .. } => ErrorKind::Transient,
            Self::InvalidUrl(_) => ErrorKind::ParseFailure,
            Self::Closed => ErrorKind::Cancelled,
        }
    }

    fn is_recoverable(&self) -> bool {
        !matches!(self, Self::RetriesExhausted { .. }) && self.kind().is_retryable()
    }
}

impl Classify for StoreError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Closed => ErrorKind::Cancelled,
            _ => ErrorKind::Persistence,
        }
    }
}

impl Classify for PipelineError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Extraction(_) | Self::KeyMismatch { .. } => ErrorKind::ParseFailure,
            Self::Fetch(e) => e.kind(),
            Self::Media(_) => ErrorKind::Transient,
            Self::Store(e) => e.kind(),
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_recoverable(),
            _ => false,
        }
    }
}

impl Classify for ConfigError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Config
    }
}

impl Classify for SchedulerError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::StartupFailed { .. } => ErrorKind::Fatal,
            Self::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::Transient,
        }
    }
}

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Fetch(e) => e.kind(),
            Self::Store(e) => e.kind(),
            Self::Pipeline(e) => e.kind(),
            Self::Config(e) => e.kind(),
            Self::Scheduler(e) => e.kind(),
            Self::Io(_) => ErrorKind::Transient,
            Self::Json(_) => ErrorKind::ParseFailure,
            Self::Other { .. } => ErrorKind::Transient,
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_recoverable(),
            Self::Store(e) => e.is_recoverable(),
            Self::Pipeline(e) => e.is_recoverable(),
            Self::Config(_) | Self::Json(_) | Self::Other { .. } => false,
            Self::Scheduler(e) => e.is_recoverable(),
            Self::Io(_) => true,
        }
    }
}

impl Error {
    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Whether the process should exit because of this error
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: format!("{err:#}"),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fetch_error_kinds() {
        assert_eq!(FetchError::Timeout.kind(), ErrorKind::Transient);
        assert_eq!(FetchError::Status(503).kind(), ErrorKind::Transient);
        assert_eq!(
            FetchError::from_status(429, Some(Duration::from_secs(3))).kind(),
            ErrorKind::RateLimited
        );
        assert_eq!(FetchError::from_status(404, None).kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_is_recoverable() {
        assert!(FetchError::Timeout.is_recoverable());
        assert!(!FetchError::NotFound.is_recoverable());

        let exhausted = FetchError::RetriesExhausted {
            attempts: 3,
            last: ErrorKind::Transient,
        };
        assert!(!exhausted.is_recoverable());
    }

    #[test]
    fn test_pipeline_error_kinds() {
        let err = PipelineError::extraction("no title");
        assert_eq!(err.kind(), ErrorKind::ParseFailure);

        let err = PipelineError::Store(StoreError::LockPoisoned);
        assert_eq!(err.kind(), ErrorKind::Persistence);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_startup_failure_is_fatal() {
        let err: Error = SchedulerError::startup_failed("record store", "unreachable").into();
        assert_eq!(err.kind(), ErrorKind::Fatal);
        assert!(err.is_fatal());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_error_conversion() {
        let unified: Error = FetchError::NotFound.into();
        assert!(matches!(unified, Error::Fetch(_)));
        assert_eq!(unified.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_config_error() {
        let err: Error = ConfigError::MissingEnvVar("WORKER_SOURCE".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_other_error() {
        let err = Error::other("Something went wrong");
        assert_eq!(err.to_string(), "Something went wrong");
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(ErrorKind::UniqueViolation.to_string(), "unique_violation");
        assert!(ErrorKind::RateLimited.is_retryable());
        assert!(!ErrorKind::ParseFailure.is_retryable());
    }
}
