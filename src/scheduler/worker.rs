//! Periodic driver for one source
//!
//! ```text
//!  Idle ──run()──> Running ──shutdown──> ShuttingDown ──> Stopped
//!                    │  ▲
//!                    ▼  │
//!         cycle ──> wait(poll_interval - cycle_duration)
//! ```
//!
//! Each cycle runs as its own task so shutdown can abort it and a panic in
//! source code only fails that cycle. When a cycle takes longer than the
//! poll interval the next one starts immediately.
//!
//! Shutdown converges on one idempotent sequence: abort the in-flight
//! cycle, run the source's cleanup hook, then close every owned resource
//! under its own `close_timeout`. Unwinding the aborted cycle and the
//! cleanup hook share a single `cleanup_timeout` budget.

use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::crawler::pipeline::IdempotentPipeline;
use crate::crawler::source::{CycleContext, CycleReport, Source};
use crate::metrics;
use crate::scheduler::error::SchedulerError;
use crate::scheduler::resources::{close_all, Resource};
use crate::scheduler::shutdown::{ShutdownHandle, ShutdownSignal};

// ============================================================================
// Configuration & State
// ============================================================================

/// Timing for one scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Target time between cycle starts
    pub poll_interval: Duration,

    /// Upper bound for the source's cleanup hook
    pub cleanup_timeout: Duration,

    /// Upper bound for closing each resource
    pub close_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(300),
            cleanup_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&Config> for SchedulerConfig {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            cleanup_timeout: config.cleanup_timeout(),
            close_timeout: config.close_timeout(),
        }
    }
}

/// Lifecycle state of a scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Running,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::ShuttingDown => "shutting_down",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Scheduler counters (thread-safe)
#[derive(Debug, Default)]
pub struct SchedulerStats {
    /// Cycles that ran to completion, successfully or not
    pub cycles: AtomicU64,

    /// Cycles that returned an error or panicked
    pub failed_cycles: AtomicU64,

    /// Cycles that took longer than the poll interval
    pub overruns: AtomicU64,

    /// Cycles aborted by shutdown
    pub cancelled_cycles: AtomicU64,

    pub items_saved: AtomicU64,
    pub items_skipped: AtomicU64,
    pub items_failed: AtomicU64,
}

impl SchedulerStats {
    fn add_report(&self, report: &CycleReport) {
        self.items_saved.fetch_add(report.saved, Ordering::Relaxed);
        self.items_skipped.fetch_add(report.skipped, Ordering::Relaxed);
        self.items_failed.fetch_add(report.failed, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            failed_cycles: self.failed_cycles.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            cancelled_cycles: self.cancelled_cycles.load(Ordering::Relaxed),
            items_saved: self.items_saved.load(Ordering::Relaxed),
            items_skipped: self.items_skipped.load(Ordering::Relaxed),
            items_failed: self.items_failed.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of scheduler counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerSnapshot {
    pub cycles: u64,
    pub failed_cycles: u64,
    pub overruns: u64,
    pub cancelled_cycles: u64,
    pub items_saved: u64,
    pub items_skipped: u64,
    pub items_failed: u64,
}

/// How a cycle ended, from the loop's point of view
enum CycleEnd {
    Finished,
    /// Shutdown won; carries the deadline of the cleanup budget
    Interrupted(Instant),
}

// ============================================================================
// Scheduler
// ============================================================================

/// Drives the fetch cycles of exactly one source
pub struct WorkerScheduler {
    source: Arc<dyn Source>,
    pipeline: Arc<IdempotentPipeline>,
    config: SchedulerConfig,
    resources: Vec<Arc<dyn Resource>>,
    shutdown: ShutdownHandle,
    state: watch::Sender<WorkerState>,
    started: AtomicBool,
    finalized: AtomicBool,
    stats: Arc<SchedulerStats>,
}

impl WorkerScheduler {
    pub fn new(
        source: Arc<dyn Source>,
        pipeline: Arc<IdempotentPipeline>,
        config: SchedulerConfig,
    ) -> Self {
        let (state, _) = watch::channel(WorkerState::Idle);
        Self {
            source,
            pipeline,
            config,
            resources: Vec::new(),
            shutdown: ShutdownHandle::new(),
            state,
            started: AtomicBool::new(false),
            finalized: AtomicBool::new(false),
            stats: Arc::new(SchedulerStats::default()),
        }
    }

    /// Register a resource to close at shutdown, in registration order
    pub fn with_resource(mut self, resource: Arc<dyn Resource>) -> Self {
        self.resources.push(resource);
        self
    }

    /// Share an existing shutdown handle (e.g. one wired to OS signals)
    pub fn with_shutdown_handle(mut self, handle: ShutdownHandle) -> Self {
        self.shutdown = handle;
        self
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Request shutdown; safe to call any number of times
    pub fn shutdown(&self) {
        if self.shutdown.shutdown() {
            info!(source = %self.source.name(), "Shutdown requested");
        }
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// Resolve once the scheduler reached `Stopped`
    pub async fn stopped(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|s| *s == WorkerState::Stopped).await;
    }

    pub fn stats(&self) -> SchedulerSnapshot {
        self.stats.snapshot()
    }

    /// Run cycles until shutdown, then release everything
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::AlreadyStarted` if called twice. Cycle
    /// failures never end the loop.
    pub async fn run(&self) -> Result<SchedulerSnapshot, SchedulerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyStarted);
        }

        let signal = self.shutdown.signal();
        let name = self.source.name().to_string();

        self.set_state(WorkerState::Running);
        info!(
            source = %name,
            poll_interval_secs = self.config.poll_interval.as_secs_f64(),
            "Worker started"
        );

        let mut cleanup_deadline = None;
        while !signal.is_shutdown() {
            let cycle_start = Instant::now();

            if let CycleEnd::Interrupted(deadline) = self.run_cycle(&name, &signal).await {
                cleanup_deadline = Some(deadline);
                break;
            }

            let elapsed = cycle_start.elapsed();
            match self.config.poll_interval.checked_sub(elapsed) {
                Some(remaining) if !remaining.is_zero() => {
                    debug!(
                        source = %name,
                        wait_secs = remaining.as_secs_f64(),
                        "Waiting for next cycle"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(remaining) => {}
                        _ = signal.wait() => break,
                    }
                }
                _ => {
                    self.stats.overruns.fetch_add(1, Ordering::Relaxed);
                    metrics::record_overrun(&name);
                    warn!(
                        source = %name,
                        cycle_secs = elapsed.as_secs_f64(),
                        poll_interval_secs = self.config.poll_interval.as_secs_f64(),
                        "Cycle overran poll interval, starting next cycle immediately"
                    );
                }
            }
        }

        self.finalize(cleanup_deadline).await;
        Ok(self.stats.snapshot())
    }

    /// One cycle as an abortable task
    async fn run_cycle(&self, name: &str, signal: &ShutdownSignal) -> CycleEnd {
        let ctx = CycleContext::new(name, Arc::clone(&self.pipeline), signal.clone());
        let source = Arc::clone(&self.source);
        let started = Instant::now();

        let mut task = tokio::spawn(async move { source.fetch_cycle(&ctx).await });

        let joined = tokio::select! {
            joined = &mut task => joined,
            _ = signal.wait() => {
                task.abort();
                let deadline = Instant::now() + self.config.cleanup_timeout;
                // Let the aborted cycle unwind before cleanup touches shared state
                if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
                    warn!(source = %name, "Aborted cycle still unwinding, continuing shutdown");
                }
                self.stats.cancelled_cycles.fetch_add(1, Ordering::Relaxed);
                info!(source = %name, error = %SchedulerError::Cancelled, "Cycle interrupted by shutdown");
                return CycleEnd::Interrupted(deadline);
            }
        };

        let duration = started.elapsed();
        self.stats.cycles.fetch_add(1, Ordering::Relaxed);

        let failure = match joined {
            Ok(Ok(report)) => {
                self.stats.add_report(&report);
                metrics::observe_cycle(name, "success", duration.as_secs_f64());
                info!(
                    source = %name,
                    attempted = report.attempted,
                    saved = report.saved,
                    skipped = report.skipped,
                    failed = report.failed,
                    duration_ms = duration.as_millis() as u64,
                    "Cycle completed"
                );

                if let Err(e) = self.pipeline.store().record_run(name, Utc::now()).await {
                    warn!(source = %name, error = %e, "Failed to record last run");
                }
                return CycleEnd::Finished;
            }
            Ok(Err(e)) => SchedulerError::cycle_failed(name, format!("{e:#}")),
            Err(join_error) if join_error.is_panic() => {
                SchedulerError::cycle_panicked(name, join_error.into_panic())
            }
            Err(_) => {
                // Aborted from outside the scheduler
                self.stats.cancelled_cycles.fetch_add(1, Ordering::Relaxed);
                warn!(source = %name, error = %SchedulerError::Cancelled, "Cycle task cancelled");
                return CycleEnd::Finished;
            }
        };

        self.stats.failed_cycles.fetch_add(1, Ordering::Relaxed);
        metrics::observe_cycle(name, "failed", duration.as_secs_f64());
        error!(source = %name, error = %failure, "Cycle failed, continuing");
        CycleEnd::Finished
    }

    /// Cleanup and resource release; runs at most once
    ///
    /// `cleanup_deadline` is set when an aborted cycle already spent part of
    /// the cleanup budget.
    async fn finalize(&self, cleanup_deadline: Option<Instant>) {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return;
        }

        self.shutdown.shutdown();
        self.set_state(WorkerState::ShuttingDown);
        let name = self.source.name();
        info!(source = %name, "Worker shutting down");

        if let Some(hook) = self.source.cleanup_hook() {
            let deadline =
                cleanup_deadline.unwrap_or_else(|| Instant::now() + self.config.cleanup_timeout);
            match tokio::time::timeout_at(deadline, hook.cleanup()).await {
                Ok(Ok(())) => debug!(source = %name, "Cleanup hook finished"),
                Ok(Err(e)) => warn!(source = %name, error = %e, "Cleanup hook failed"),
                Err(_) => {
                    let err = SchedulerError::CleanupTimedOut {
                        timeout: self.config.cleanup_timeout,
                    };
                    warn!(source = %name, error = %err, "Cleanup hook abandoned");
                }
            }
        }

        let summary = close_all(&self.resources, self.config.close_timeout).await;
        info!(
            source = %name,
            closed = summary.closed(),
            failed = summary.failed(),
            timed_out = summary.timed_out(),
            "Resources released"
        );

        self.set_state(WorkerState::Stopped);
        info!(source = %name, "Worker stopped");
    }

    fn set_state(&self, next: WorkerState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(source = %self.source.name(), from = %previous, to = %next, "State changed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryRecordStore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    struct CountingSource {
        cycles: AtomicU32,
    }

    #[async_trait]
    impl Source for CountingSource {
        fn name(&self) -> &str {
            "counting"
        }

        async fn fetch_cycle(&self, _ctx: &CycleContext) -> anyhow::Result<CycleReport> {
            self.cycles.fetch_add(1, Ordering::SeqCst);
            Ok(CycleReport::default())
        }
    }

    fn scheduler(poll: u64) -> (Arc<WorkerScheduler>, Arc<CountingSource>) {
        let source = Arc::new(CountingSource {
            cycles: AtomicU32::new(0),
        });
        let pipeline = Arc::new(IdempotentPipeline::new(Arc::new(MemoryRecordStore::new())));
        let config = SchedulerConfig {
            poll_interval: Duration::from_secs(poll),
            ..Default::default()
        };
        (
            Arc::new(WorkerScheduler::new(source.clone(), pipeline, config)),
            source,
        )
    }

    #[test]
    fn test_config_from_worker_config() {
        let mut config = Config::for_source("tasnim");
        config.source.poll_interval_secs = 60;
        config.shutdown.cleanup_timeout_secs = 3;
        config.shutdown.close_timeout_secs = 2;

        let sched = SchedulerConfig::from(&config);
        assert_eq!(sched.poll_interval, Duration::from_secs(60));
        assert_eq!(sched.cleanup_timeout, Duration::from_secs(3));
        assert_eq!(sched.close_timeout, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_shutdown() {
        let (sched, source) = scheduler(10);
        assert_eq!(sched.state(), WorkerState::Idle);

        let runner = tokio::spawn({
            let sched = Arc::clone(&sched);
            async move { sched.run().await }
        });

        // Cycles at t=0, 10, 20
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(sched.state(), WorkerState::Running);
        sched.shutdown();

        let snapshot = runner.await.unwrap().unwrap();
        assert_eq!(sched.state(), WorkerState::Stopped);
        assert_eq!(source.cycles.load(Ordering::SeqCst), 3);
        assert_eq!(snapshot.cycles, 3);
        assert_eq!(snapshot.overruns, 0);
    }

    #[tokio::test]
    async fn test_run_twice_is_rejected() {
        let (sched, _source) = scheduler(10);
        sched.shutdown();
        sched.run().await.unwrap();

        assert!(matches!(
            sched.run().await,
            Err(SchedulerError::AlreadyStarted)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_before_run_skips_cycles() {
        let (sched, source) = scheduler(10);
        sched.shutdown();
        sched.run().await.unwrap();

        assert_eq!(source.cycles.load(Ordering::SeqCst), 0);
        assert_eq!(sched.state(), WorkerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_run_recorded() {
        let (sched, _source) = scheduler(10);
        let runner = tokio::spawn({
            let sched = Arc::clone(&sched);
            async move { sched.run().await }
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        sched.shutdown();
        runner.await.unwrap().unwrap();

        let last = sched.pipeline.store().last_run("counting").await.unwrap();
        assert!(last.is_some());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(WorkerState::ShuttingDown.to_string(), "shutting_down");
        assert_eq!(WorkerState::Stopped.to_string(), "stopped");
    }
}
