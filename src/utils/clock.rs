//! Injectable time source
//!
//! The rate limiter and the fetch retry policy never call `tokio::time`
//! directly. They go through a [`Clock`], so tests can swap in a
//! [`ManualClock`] and assert exact waits without sleeping for real.

use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Monotonic time source with an awaitable sleep
#[async_trait]
pub trait Clock: Send + Sync + fmt::Debug {
    /// Time elapsed since the clock's origin
    fn now(&self) -> Duration;

    /// Suspend the caller for `duration`
    async fn sleep(&self, duration: Duration);
}

/// Shared clock handle
pub type SharedClock = Arc<dyn Clock>;

/// Clock backed by the tokio timer
///
/// Uses `tokio::time::Instant`, so it follows paused time in tests
/// started with `#[tokio::test(start_paused = true)]`.
#[derive(Debug, Clone)]
pub struct TokioClock {
    origin: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }

    /// Convenience constructor for the shared form
    pub fn shared() -> SharedClock {
        Arc::new(Self::new())
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Simulated clock for deterministic tests
///
/// `sleep` returns immediately after advancing the simulated time by the
/// requested amount. Every requested sleep is recorded in order.
#[derive(Debug, Default)]
pub struct ManualClock {
    state: Mutex<ManualState>,
}

#[derive(Debug, Default)]
struct ManualState {
    now: Duration,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared manual clock
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Move time forward without recording a sleep
    pub fn advance(&self, by: Duration) {
        let mut state = self.lock();
        state.now += by;
    }

    /// All sleeps requested so far, in order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.lock().sleeps.clone()
    }

    /// Sum of all requested sleeps
    pub fn total_slept(&self) -> Duration {
        self.lock().sleeps.iter().sum()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.lock().now
    }

    async fn sleep(&self, duration: Duration) {
        {
            let mut state = self.lock();
            state.now += duration;
            state.sleeps.push(duration);
        }
        tokio::task::yield_now().await;
    }
}
