//! Worker scheduling and lifecycle
//!
//! This module drives one source's periodic fetch cycles and owns the
//! cancellation and shutdown lifecycle.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   SIGTERM / SIGINT   ┌────────────────┐
//! │   OS signal  │ ───────────────────> │ ShutdownHandle │ <── explicit shutdown()
//! └──────────────┘                      └───────┬────────┘
//!                                               │ ShutdownSignal
//!                                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        WorkerScheduler                          │
//! │   cycle task ──> wait remainder of poll interval ──> cycle ...  │
//! │                                                                 │
//! │   on shutdown: abort cycle -> cleanup hook -> close resources   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`worker`] - The scheduler loop, its states and statistics
//! - [`shutdown`] - Idempotent shutdown primitive and OS signal wiring
//! - [`resources`] - Owned resources closed under per-resource timeouts
//! - [`error`] - Scheduler errors

pub mod error;
pub mod resources;
pub mod shutdown;
pub mod worker;

pub use error::{SchedulerError, SchedulerResult};
pub use resources::{close_all, CloseOutcome, CloseSummary, Resource};
pub use shutdown::{listen_for_os_signals, ShutdownHandle, ShutdownSignal};
pub use worker::{SchedulerConfig, SchedulerSnapshot, SchedulerStats, WorkerScheduler, WorkerState};
