//! Bounded retry for startup dependencies
//!
//! Opening the record store or the media root may fail transiently right
//! after a container starts. [`with_retry_if`] retries such operations a
//! bounded number of times with exponential backoff; when the budget runs
//! out the last error is returned and the caller turns it into a fatal
//! startup error.
//!
//! Per-request HTTP retries follow their own status-driven rules and live in
//! [`crate::crawler::fetcher::FetchRetryPolicy`].

use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry budget with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryBudget {
    /// Total attempts, including the first one
    pub max_attempts: u32,

    /// Delay before the second attempt
    pub base_delay: Duration,

    /// Upper bound for any single delay
    pub max_delay: Duration,

    /// Growth factor between consecutive delays
    pub backoff_multiplier: f64,
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryBudget {
    /// Budget with `max_attempts` and default delays
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Default::default()
        }
    }

    /// Budget with custom delays
    pub fn with_delays(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier: 2.0,
        }
    }

    /// Delay before attempt `attempt` (0-based); the first attempt never waits
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponential =
            self.base_delay.as_secs_f64() * self.backoff_multiplier.powi((attempt - 1) as i32);
        Duration::from_secs_f64(exponential.min(self.max_delay.as_secs_f64()))
    }
}

/// Execute `operation` until it succeeds or the budget is spent
pub async fn with_retry<T, F, Fut>(budget: &RetryBudget, label: &str, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    with_retry_if(budget, label, operation, |_| true).await
}

/// Execute `operation` with retries, stopping early on errors that
/// `should_retry` rejects
///
/// # Example
///
/// ```no_run
/// use newsdesk::utils::retry::{with_retry_if, RetryBudget};
///
/// # async fn example() -> anyhow::Result<()> {
/// let budget = RetryBudget::new(3);
/// let value = with_retry_if(
///     &budget,
///     "record store",
///     || async { Ok::<_, anyhow::Error>(42) },
///     |e| !e.to_string().contains("permission denied"),
/// )
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn with_retry_if<T, F, Fut, P>(
    budget: &RetryBudget,
    label: &str,
    operation: F,
    should_retry: P,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&anyhow::Error) -> bool,
{
    let mut last_error = None;

    for attempt in 0..budget.max_attempts {
        if attempt > 0 {
            let delay = budget.delay_before(attempt);
            debug!(
                target_name = label,
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                "Retrying after delay"
            );
            tokio::time::sleep(delay).await;
        }

        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(target_name = label, attempt = attempt, "Succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) => {
                if !should_retry(&e) {
                    warn!(target_name = label, error = %e, "Non-retryable error encountered");
                    return Err(e);
                }

                warn!(
                    target_name = label,
                    attempt = attempt + 1,
                    max_attempts = budget.max_attempts,
                    error = %e,
                    "Attempt failed"
                );
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("{label}: no attempts were made")))
}
