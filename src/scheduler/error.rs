//! Error types for the scheduler module

use std::fmt;
use std::time::Duration;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler-specific errors
#[derive(Debug)]
pub enum SchedulerError {
    /// A dependency could not be initialized within its retry budget
    StartupFailed {
        dependency: String,
        reason: String,
    },

    /// The fetch cycle returned an error
    CycleFailed {
        source_name: String,
        reason: String,
    },

    /// The fetch cycle panicked
    CyclePanicked {
        source_name: String,
        reason: String,
    },

    /// The cleanup hook did not finish in time
    CleanupTimedOut {
        timeout: Duration,
    },

    /// A resource did not close in time
    CloseTimedOut {
        resource: String,
        timeout: Duration,
    },

    /// `run` was called on a scheduler that already left `Idle`
    AlreadyStarted,

    /// The in-flight cycle was cancelled by shutdown
    Cancelled,
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartupFailed { dependency, reason } => {
                write!(f, "Failed to initialize {}: {}", dependency, reason)
            }
            Self::CycleFailed {
                source_name,
                reason,
            } => {
                write!(f, "Fetch cycle for '{}' failed: {}", source_name, reason)
            }
            Self::CyclePanicked {
                source_name,
                reason,
            } => {
                write!(f, "Fetch cycle for '{}' panicked: {}", source_name, reason)
            }
            Self::CleanupTimedOut { timeout } => {
                write!(f, "Cleanup hook timed out after {:?}", timeout)
            }
            Self::CloseTimedOut { resource, timeout } => {
                write!(f, "Closing '{}' timed out after {:?}", resource, timeout)
            }
            Self::AlreadyStarted => write!(f, "Scheduler already started"),
            Self::Cancelled => write!(f, "Fetch cycle cancelled"),
        }
    }
}

impl std::error::Error for SchedulerError {}

impl SchedulerError {
    /// Create a startup failure
    pub fn startup_failed(dependency: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StartupFailed {
            dependency: dependency.into(),
            reason: reason.into(),
        }
    }

    /// Create a cycle failure
    pub fn cycle_failed(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CycleFailed {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    /// Create a cycle panic error from a panic payload
    pub fn cycle_panicked(
        source_name: impl Into<String>,
        payload: Box<dyn std::any::Any + Send>,
    ) -> Self {
        let reason = if let Some(msg) = payload.downcast_ref::<&str>() {
            (*msg).to_string()
        } else if let Some(msg) = payload.downcast_ref::<String>() {
            msg.clone()
        } else {
            "unknown panic payload".to_string()
        };

        Self::CyclePanicked {
            source_name: source_name.into(),
            reason,
        }
    }

    /// Whether the error happened while stopping
    pub fn is_shutdown_error(&self) -> bool {
        matches!(
            self,
            Self::CleanupTimedOut { .. } | Self::CloseTimedOut { .. } | Self::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Classify, ErrorKind};

    #[test]
    fn test_display() {
        let err = SchedulerError::startup_failed("record store", "connection refused");
        assert_eq!(
            err.to_string(),
            "Failed to initialize record store: connection refused"
        );

        let err = SchedulerError::CloseTimedOut {
            resource: "http".to_string(),
            timeout: Duration::from_secs(5),
        };
        assert_eq!(err.to_string(), "Closing 'http' timed out after 5s");
    }

    #[test]
    fn test_panic_payload_extraction() {
        let err = SchedulerError::cycle_panicked("tasnim", Box::new("boom"));
        assert!(err.to_string().contains("boom"));

        let err = SchedulerError::cycle_panicked("tasnim", Box::new(String::from("owned boom")));
        assert!(err.to_string().contains("owned boom"));

        let err = SchedulerError::cycle_panicked("tasnim", Box::new(42_u8));
        assert!(err.to_string().contains("unknown panic payload"));
    }

    #[test]
    fn test_kinds() {
        assert_eq!(
            SchedulerError::startup_failed("db", "down").kind(),
            ErrorKind::Fatal
        );
        assert!(SchedulerError::cycle_failed("src", "oops").is_recoverable());
        assert!(SchedulerError::Cancelled.is_shutdown_error());
        assert!(!SchedulerError::AlreadyStarted.is_shutdown_error());
    }
}
