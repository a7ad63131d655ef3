//! Owned resources released at shutdown

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::scheduler::error::SchedulerError;

/// Something the worker must release when it stops
#[async_trait]
pub trait Resource: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Release the resource; calling twice must be harmless
    async fn close(&self) -> anyhow::Result<()>;
}

/// Outcome of closing one resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed,
    Failed(String),
    TimedOut,
}

/// Outcome of [`close_all`]
#[derive(Debug, Clone, Default)]
pub struct CloseSummary {
    pub results: Vec<(String, CloseOutcome)>,
}

impl CloseSummary {
    pub fn closed(&self) -> usize {
        self.count(|o| matches!(o, CloseOutcome::Closed))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, CloseOutcome::Failed(_)))
    }

    pub fn timed_out(&self) -> usize {
        self.count(|o| matches!(o, CloseOutcome::TimedOut))
    }

    pub fn is_clean(&self) -> bool {
        self.closed() == self.results.len()
    }

    fn count(&self, pred: impl Fn(&CloseOutcome) -> bool) -> usize {
        self.results.iter().filter(|(_, o)| pred(o)).count()
    }
}

/// Close every resource in order, each bounded by `timeout`
///
/// A failing or hanging resource is logged and does not prevent the
/// remaining ones from being closed.
pub async fn close_all(resources: &[Arc<dyn Resource>], timeout: Duration) -> CloseSummary {
    let mut summary = CloseSummary::default();

    for resource in resources {
        let name = resource.name().to_string();
        let outcome = match tokio::time::timeout(timeout, resource.close()).await {
            Ok(Ok(())) => {
                tracing::debug!(resource = %name, "Resource closed");
                CloseOutcome::Closed
            }
            Ok(Err(e)) => {
                tracing::warn!(resource = %name, error = %e, "Failed to close resource");
                CloseOutcome::Failed(e.to_string())
            }
            Err(_) => {
                let err = SchedulerError::CloseTimedOut {
                    resource: name.clone(),
                    timeout,
                };
                tracing::warn!(resource = %name, error = %err, "Resource abandoned");
                CloseOutcome::TimedOut
            }
        };
        summary.results.push((name, outcome));
    }

    summary
}
