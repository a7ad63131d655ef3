//! Per-source request admission control
//!
//! Two constraints are enforced together for every source:
//!
//! - at most `max_requests_per_window` admissions in any trailing 60 second
//!   window
//! - at least `min_delay` between two consecutive admissions
//!
//! `acquire` never rejects; it suspends the caller until both constraints
//! hold. The internal mutex only guards the timestamp bookkeeping and is
//! always released before the caller sleeps.
//!
//! # Example
//!
//! ```no_run
//! use newsdesk::crawler::rate_limiter::{RateLimitConfig, RateLimiter, RequestType};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let limiter = RateLimiter::new(RateLimitConfig::new(60, Duration::from_secs(1)));
//! limiter.acquire("tasnim", RequestType::Page).await;
//! let stats = limiter.get_stats("tasnim");
//! assert_eq!(stats.requests_last_minute, 1);
//! # }
//! ```

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

use crate::config::Config;
use crate::metrics;
use crate::utils::clock::{SharedClock, TokioClock};

/// Length of the sliding window
pub const WINDOW: Duration = Duration::from_secs(60);

/// Added to computed window waits so the oldest entry has left the window
/// when the caller wakes up
pub const WAIT_PADDING: Duration = Duration::from_millis(100);

/// Kind of outbound request, used for logs and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    /// RSS/Atom feed or listing page
    Feed,
    /// Article page
    Page,
    /// Vendor API call
    Api,
    /// Image or other media download
    Media,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Feed => "feed",
            Self::Page => "page",
            Self::Api => "api",
            Self::Media => "media",
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Limits applied to each source
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Admissions allowed in any trailing window
    pub max_requests_per_window: u32,

    /// Minimum spacing between admissions
    pub min_delay: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests_per_window: 60,
            min_delay: Duration::from_secs(1),
        }
    }
}

impl RateLimitConfig {
    pub fn new(max_requests_per_window: u32, min_delay: Duration) -> Self {
        Self {
            max_requests_per_window: max_requests_per_window.max(1),
            min_delay,
        }
    }
}

impl From<&Config> for RateLimitConfig {
    fn from(config: &Config) -> Self {
        Self::new(
            config.rate_limit.max_requests_per_minute,
            config.delay_between_requests(),
        )
    }
}

/// Admission history of one source
///
/// Timestamps are clock offsets, oldest first. Entries that fell out of the
/// window are purged lazily on each admission check.
#[derive(Debug, Default, Clone)]
pub struct RateWindow {
    timestamps: VecDeque<Duration>,
    last_admission: Option<Duration>,
}

impl RateWindow {
    /// Drop entries at least one window old
    fn purge(&mut self, now: Duration) {
        while let Some(&oldest) = self.timestamps.front() {
            if now.saturating_sub(oldest) >= WINDOW {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// How long the caller must wait before it can be admitted at `now`
    fn wait_needed(&self, now: Duration, config: &RateLimitConfig) -> Option<Duration> {
        if self.timestamps.len() >= config.max_requests_per_window as usize {
            if let Some(&oldest) = self.timestamps.front() {
                let age = now.saturating_sub(oldest);
                return Some(WINDOW.saturating_sub(age) + WAIT_PADDING);
            }
        }

        let last = self.last_admission?;
        let since_last = now.saturating_sub(last);
        if since_last < config.min_delay {
            return Some(config.min_delay - since_last);
        }

        None
    }

    fn record(&mut self, now: Duration) {
        self.timestamps.push_back(now);
        self.last_admission = Some(now);
    }

    /// Admissions within the window ending at `now`
    fn occupancy_at(&self, now: Duration) -> usize {
        self.timestamps
            .iter()
            .filter(|&&ts| now.saturating_sub(ts) < WINDOW)
            .count()
    }
}

/// Snapshot of one source's limiter state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitStats {
    pub source: String,
    pub requests_last_minute: usize,
    pub max_requests_per_minute: u32,
    pub delay_between_requests: Duration,
}

/// Sliding-window rate limiter keyed by source
///
/// Each worker owns one instance for its single source. Sharing an instance
/// between sources works but serializes their bookkeeping behind one lock
/// and gives no fairness between them.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    clock: SharedClock,
    windows: Mutex<HashMap<String, RateWindow>>,
}

/// Shared limiter handle
pub type SharedRateLimiter = Arc<RateLimiter>;

impl RateLimiter {
    /// Create a limiter driven by the tokio timer
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, TokioClock::shared())
    }

    /// Create a limiter with an injected clock
    pub fn with_clock(config: RateLimitConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Wait until a request for `source` may be sent
    pub async fn acquire(&self, source: &str, request_type: RequestType) {
        let mut waited = Duration::ZERO;

        loop {
            let wait = {
                let mut windows = self.lock();
                let now = self.clock.now();
                let window = windows.entry(source.to_string()).or_default();
                window.purge(now);

                match window.wait_needed(now, &self.config) {
                    Some(wait) => wait,
                    None => {
                        window.record(now);
                        break;
                    }
                }
            };

            debug!(
                source = source,
                request_type = %request_type,
                wait_ms = wait.as_millis() as u64,
                "Rate limit reached, waiting"
            );
            self.clock.sleep(wait).await;
            waited += wait;
        }

        if !waited.is_zero() {
            metrics::record_rate_limit_wait(source, request_type.as_str(), waited.as_secs_f64());
        }
    }

    /// Current occupancy and configured limits for `source`
    pub fn get_stats(&self, source: &str) -> RateLimitStats {
        let now = self.clock.now();
        let requests_last_minute = self
            .lock()
            .get(source)
            .map(|w| w.occupancy_at(now))
            .unwrap_or(0);

        RateLimitStats {
            source: source.to_string(),
            requests_last_minute,
            max_requests_per_minute: self.config.max_requests_per_window,
            delay_between_requests: self.config.min_delay,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, RateWindow>> {
        // Bookkeeping is updated in one step, so a poisoned map is still consistent.
        self.windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::clock::{Clock, ManualClock};

    fn limiter(max: u32, delay: Duration) -> (RateLimiter, Arc<ManualClock>) {
        let clock = ManualClock::shared();
        let limiter = RateLimiter::with_clock(RateLimitConfig::new(max, delay), clock.clone());
        (limiter, clock)
    }

    #[tokio::test]
    async fn test_first_request_is_immediate() {
        let (limiter, clock) = limiter(5, Duration::from_secs(1));
        limiter.acquire("tasnim", RequestType::Feed).await;
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_min_delay_enforced() {
        let (limiter, clock) = limiter(60, Duration::from_millis(500));
        limiter.acquire("tasnim", RequestType::Page).await;
        clock.advance(Duration::from_millis(200));
        limiter.acquire("tasnim", RequestType::Page).await;

        assert_eq!(clock.sleeps(), vec![Duration::from_millis(300)]);
    }

    #[tokio::test]
    async fn test_window_capacity_wait() {
        let (limiter, clock) = limiter(2, Duration::ZERO);
        limiter.acquire("tasnim", RequestType::Page).await;
        clock.advance(Duration::from_secs(10));
        limiter.acquire("tasnim", RequestType::Page).await;
        clock.advance(Duration::from_secs(5));
        limiter.acquire("tasnim", RequestType::Page).await;

        // Oldest entry is 15s old: 60 - 15 + padding
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(45) + WAIT_PADDING]
        );
        assert_eq!(limiter.get_stats("tasnim").requests_last_minute, 2);
    }

    #[tokio::test]
    async fn test_sources_are_independent() {
        let (limiter, clock) = limiter(1, Duration::from_secs(1));
        limiter.acquire("tasnim", RequestType::Page).await;
        limiter.acquire("irna", RequestType::Page).await;
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_stats_do_not_count_expired_entries() {
        let (limiter, clock) = limiter(10, Duration::ZERO);
        limiter.acquire("tasnim", RequestType::Api).await;
        limiter.acquire("tasnim", RequestType::Api).await;
        assert_eq!(limiter.get_stats("tasnim").requests_last_minute, 2);

        clock.advance(WINDOW);
        let stats = limiter.get_stats("tasnim");
        assert_eq!(stats.requests_last_minute, 0);
        assert_eq!(stats.max_requests_per_minute, 10);
        assert_eq!(stats.delay_between_requests, Duration::ZERO);
    }

    #[test]
    fn test_stats_for_unknown_source() {
        let (limiter, _clock) = limiter(3, Duration::from_secs(2));
        let stats = limiter.get_stats("unknown");
        assert_eq!(stats.requests_last_minute, 0);
        assert_eq!(stats.max_requests_per_minute, 3);
    }

    #[test]
    fn test_window_purge() {
        let mut window = RateWindow::default();
        window.record(Duration::from_secs(0));
        window.record(Duration::from_secs(30));
        window.purge(Duration::from_secs(60));
        assert_eq!(window.occupancy_at(Duration::from_secs(60)), 1);
    }

    #[test]
    fn test_config_from_worker_config() {
        let mut config = Config::for_source("tasnim");
        config.rate_limit.max_requests_per_minute = 2;
        config.rate_limit.delay_between_requests_secs = 0.5;

        let limits = RateLimitConfig::from(&config);
        assert_eq!(limits.max_requests_per_window, 2);
        assert_eq!(limits.min_delay, Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_clock_time_moves_with_waits() {
        let (limiter, clock) = limiter(1, Duration::ZERO);
        limiter.acquire("tasnim", RequestType::Page).await;
        limiter.acquire("tasnim", RequestType::Page).await;
        assert_eq!(clock.now(), WINDOW + WAIT_PADDING);
    }
}
