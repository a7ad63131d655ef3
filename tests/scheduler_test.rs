//! Scheduler timing and shutdown behavior
//!
//! All tests run on paused tokio time, so multi-minute schedules complete
//! instantly and timings are exact.

use async_trait::async_trait;
use newsdesk::crawler::pipeline::IdempotentPipeline;
use newsdesk::crawler::source::{Cleanup, CycleContext, CycleReport, Source};
use newsdesk::scheduler::{
    Resource, SchedulerConfig, SchedulerError, SchedulerSnapshot, WorkerScheduler, WorkerState,
};
use newsdesk::storage::MemoryRecordStore;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

// ============================================================================
// Test doubles
// ============================================================================

/// Source whose cycles take a fixed time and can be told to fail
#[derive(Default)]
struct ScriptedSource {
    cycle_duration: Duration,
    panic_on_first: bool,
    fail_every_cycle: bool,
    starts: Mutex<Vec<Instant>>,
    cleanups: AtomicU32,
}

impl ScriptedSource {
    fn taking(cycle_duration: Duration) -> Self {
        Self {
            cycle_duration,
            ..Default::default()
        }
    }

    fn starts(&self) -> Vec<Instant> {
        self.starts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Source for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn fetch_cycle(&self, _ctx: &CycleContext) -> anyhow::Result<CycleReport> {
        let first = {
            let mut starts = self.starts.lock().unwrap();
            starts.push(Instant::now());
            starts.len() == 1
        };

        if self.panic_on_first && first {
            panic!("source bug");
        }

        tokio::time::sleep(self.cycle_duration).await;

        if self.fail_every_cycle {
            anyhow::bail!("upstream returned garbage");
        }
        Ok(CycleReport::default())
    }

    fn cleanup_hook(&self) -> Option<&dyn Cleanup> {
        Some(self)
    }
}

#[async_trait]
impl Cleanup for ScriptedSource {
    async fn cleanup(&self) -> anyhow::Result<()> {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Resource that never finishes closing
struct HungResource;

#[async_trait]
impl Resource for HungResource {
    fn name(&self) -> &str {
        "hung"
    }

    async fn close(&self) -> anyhow::Result<()> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

#[derive(Default)]
struct CountingResource {
    closes: AtomicU32,
}

#[async_trait]
impl Resource for CountingResource {
    fn name(&self) -> &str {
        "counting"
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn scheduler(source: Arc<ScriptedSource>, poll_secs: u64) -> WorkerScheduler {
    let pipeline = Arc::new(IdempotentPipeline::new(Arc::new(MemoryRecordStore::new())));
    WorkerScheduler::new(
        source,
        pipeline,
        SchedulerConfig {
            poll_interval: Duration::from_secs(poll_secs),
            cleanup_timeout: Duration::from_secs(2),
            close_timeout: Duration::from_secs(5),
        },
    )
}

type RunHandle = JoinHandle<Result<SchedulerSnapshot, SchedulerError>>;

fn spawn_run(sched: &Arc<WorkerScheduler>) -> RunHandle {
    let sched = Arc::clone(sched);
    tokio::spawn(async move { sched.run().await })
}

// ============================================================================
// Timing
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_fast_cycles_start_on_poll_interval() {
    let source = Arc::new(ScriptedSource::taking(Duration::from_secs(2)));
    let sched = Arc::new(scheduler(source.clone(), 10));
    let runner = spawn_run(&sched);

    tokio::time::sleep(Duration::from_secs(35)).await;
    sched.shutdown();
    let snapshot = runner.await.unwrap().unwrap();

    let starts = source.starts();
    assert_eq!(starts.len(), 4);
    for pair in starts.windows(2) {
        assert_eq!(pair[1] - pair[0], Duration::from_secs(10));
    }
    assert_eq!(snapshot.overruns, 0);
}

/// A cycle longer than the interval is followed immediately by the next
#[tokio::test(start_paused = true)]
async fn test_overrun_starts_next_cycle_immediately() {
    let source = Arc::new(ScriptedSource::taking(Duration::from_secs(7)));
    let sched = Arc::new(scheduler(source.clone(), 5));
    let runner = spawn_run(&sched);

    tokio::time::sleep(Duration::from_secs(20)).await;
    sched.shutdown();
    let snapshot = runner.await.unwrap().unwrap();

    // Starts at 0, 7, 14; the third cycle is aborted at 20
    let starts = source.starts();
    assert_eq!(starts.len(), 3);
    for pair in starts.windows(2) {
        assert_eq!(pair[1] - pair[0], Duration::from_secs(7));
    }
    assert_eq!(snapshot.cycles, 2);
    assert!(snapshot.overruns >= 1);
    assert_eq!(snapshot.cancelled_cycles, 1);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_panicking_cycle_does_not_stop_worker() {
    let source = Arc::new(ScriptedSource {
        panic_on_first: true,
        ..Default::default()
    });
    let sched = Arc::new(scheduler(source.clone(), 10));
    let runner = spawn_run(&sched);

    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_eq!(sched.state(), WorkerState::Running);
    sched.shutdown();
    let snapshot = runner.await.unwrap().unwrap();

    assert_eq!(snapshot.cycles, 3);
    assert_eq!(snapshot.failed_cycles, 1);
}

#[tokio::test(start_paused = true)]
async fn test_failing_cycles_keep_schedule() {
    let source = Arc::new(ScriptedSource {
        fail_every_cycle: true,
        ..Default::default()
    });
    let sched = Arc::new(scheduler(source.clone(), 10));
    let runner = spawn_run(&sched);

    tokio::time::sleep(Duration::from_secs(25)).await;
    sched.shutdown();
    let snapshot = runner.await.unwrap().unwrap();

    assert_eq!(snapshot.cycles, 3);
    assert_eq!(snapshot.failed_cycles, 3);
}

// ============================================================================
// Shutdown
// ============================================================================

/// Shutdown during the wait stops promptly; repeated requests clean up once
#[tokio::test(start_paused = true)]
async fn test_shutdown_during_wait_is_prompt_and_idempotent() {
    let source = Arc::new(ScriptedSource::taking(Duration::from_secs(1)));
    let resource = Arc::new(CountingResource::default());
    let sched = Arc::new(scheduler(source.clone(), 300).with_resource(resource.clone()));
    let handle = sched.shutdown_handle();
    let runner = spawn_run(&sched);

    tokio::time::sleep(Duration::from_secs(5)).await;
    let requested = Instant::now();
    handle.shutdown();
    sched.shutdown();
    handle.shutdown();

    runner.await.unwrap().unwrap();
    sched.shutdown();

    assert!(requested.elapsed() < Duration::from_secs(1));
    assert_eq!(sched.state(), WorkerState::Stopped);
    assert_eq!(source.cleanups.load(Ordering::SeqCst), 1);
    assert_eq!(resource.closes.load(Ordering::SeqCst), 1);
}

/// A cycle stuck in a long operation is aborted by shutdown
#[tokio::test(start_paused = true)]
async fn test_shutdown_aborts_in_flight_cycle() {
    let source = Arc::new(ScriptedSource::taking(Duration::from_secs(3_600)));
    let sched = Arc::new(scheduler(source.clone(), 10));
    let runner = spawn_run(&sched);

    tokio::time::sleep(Duration::from_secs(5)).await;
    let requested = Instant::now();
    sched.shutdown();
    let snapshot = runner.await.unwrap().unwrap();

    assert!(requested.elapsed() < Duration::from_secs(5));
    assert_eq!(snapshot.cycles, 0);
    assert_eq!(snapshot.cancelled_cycles, 1);
    assert_eq!(source.cleanups.load(Ordering::SeqCst), 1);
}

/// A resource that hangs on close is abandoned after its timeout
#[tokio::test(start_paused = true)]
async fn test_hung_resource_does_not_block_others() {
    let source = Arc::new(ScriptedSource::default());
    let healthy = Arc::new(CountingResource::default());
    let sched = Arc::new(
        scheduler(source, 300)
            .with_resource(Arc::new(HungResource))
            .with_resource(healthy.clone()),
    );
    let runner = spawn_run(&sched);

    tokio::time::sleep(Duration::from_secs(1)).await;
    let requested = Instant::now();
    sched.shutdown();
    runner.await.unwrap().unwrap();

    let elapsed = requested.elapsed();
    assert!(elapsed >= Duration::from_secs(5));
    assert!(elapsed < Duration::from_secs(6));
    assert_eq!(healthy.closes.load(Ordering::SeqCst), 1);
    assert_eq!(sched.state(), WorkerState::Stopped);
}

/// Cycle stuck in blocking code with a cleanup hook that never returns
struct StuckSource {
    block_for: Duration,
}

#[async_trait]
impl Source for StuckSource {
    fn name(&self) -> &str {
        "stuck"
    }

    async fn fetch_cycle(&self, _ctx: &CycleContext) -> anyhow::Result<CycleReport> {
        // Blocking keeps the aborted task from unwinding until it returns
        std::thread::sleep(self.block_for);
        tokio::time::sleep(Duration::from_secs(3_600)).await;
        Ok(CycleReport::default())
    }

    fn cleanup_hook(&self) -> Option<&dyn Cleanup> {
        Some(self)
    }
}

#[async_trait]
impl Cleanup for StuckSource {
    async fn cleanup(&self) -> anyhow::Result<()> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

/// Unwinding an aborted cycle and the cleanup hook share one budget
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_unwind_and_hung_cleanup_share_budget() {
    let source = Arc::new(StuckSource {
        block_for: Duration::from_millis(2_500),
    });
    let pipeline = Arc::new(IdempotentPipeline::new(Arc::new(MemoryRecordStore::new())));
    let sched = Arc::new(WorkerScheduler::new(
        source,
        pipeline,
        SchedulerConfig {
            poll_interval: Duration::from_secs(60),
            cleanup_timeout: Duration::from_secs(1),
            close_timeout: Duration::from_secs(1),
        },
    ));
    let runner = spawn_run(&sched);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let requested = Instant::now();
    sched.shutdown();
    let snapshot = runner.await.unwrap().unwrap();

    let elapsed = requested.elapsed();
    assert!(elapsed >= Duration::from_millis(900), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(1_800), "{elapsed:?}");
    assert_eq!(snapshot.cancelled_cycles, 1);
    assert_eq!(sched.state(), WorkerState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_state_transitions_are_observable() {
    let source = Arc::new(ScriptedSource::default());
    let sched = Arc::new(scheduler(source, 60));
    let mut states = sched.subscribe_state();
    let runner = spawn_run(&sched);

    states.wait_for(|s| *s == WorkerState::Running).await.unwrap();
    sched.shutdown();
    sched.stopped().await;

    runner.await.unwrap().unwrap();
    assert_eq!(*states.borrow(), WorkerState::Stopped);
}
