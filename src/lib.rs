//! newsdesk - Generic news ingestion engine
//!
//! Polls external news sources on a fixed interval, rate-limits outbound
//! requests per source, retries fetches with status-driven backoff and
//! persists every logical item at most once.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration from environment or TOML
//! - [`crawler`] - Rate limiter, fetch retry policy, idempotent pipeline
//! - [`scheduler`] - Periodic cycles, shutdown and resource release
//! - [`storage`] - Record store (SQLite) and content-addressed media store
//! - [`sources`] - Built-in source implementations
//! - [`models`] - Core data structures and types
//! - [`metrics`] - Prometheus counters and histograms
//! - [`utils`] - Common utilities and helpers
//!
//! # Example
//!
//! ```no_run
//! use newsdesk::config::Config;
//! use newsdesk::crawler::Worker;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let worker = Worker::new(config).await?;
//!     newsdesk::scheduler::listen_for_os_signals(worker.shutdown_handle());
//!     worker.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod crawler;
pub mod error;
pub mod metrics;
pub mod models;
pub mod scheduler;
pub mod sources;
pub mod storage;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::crawler::{
        CycleContext, CycleReport, IdempotentPipeline, ProcessOutcome, RateLimiter, Source, Worker,
    };
    pub use crate::error::{Classify, Error, ErrorKind, Result};
    pub use crate::models::{CandidateItem, IdempotencyKey, NewsRecord};
    pub use crate::scheduler::{ShutdownHandle, WorkerScheduler, WorkerState};
    pub use crate::storage::{RecordStore, SqliteRecordStore};
}

// Direct re-exports for convenience
pub use models::{CandidateItem, IdempotencyKey, NewsRecord};
