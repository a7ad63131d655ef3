//! Ingestion engine with rate limiting
//!
//! This module implements the generic machinery every source reuses:
//!
//! - [`rate_limiter`] - per-source admission control
//! - [`fetcher`] - HTTP fetching with status-driven retries
//! - [`pipeline`] - persist-once processing of candidate items
//! - [`source`] - the contract source-specific logic implements
//!
//! [`Worker`] wires them to storage and a [`WorkerScheduler`] for one source.

pub mod fetcher;
pub mod pipeline;
pub mod rate_limiter;
pub mod source;

pub use fetcher::{FetchResponse, FetchRetryPolicy, HttpFetcher};
pub use pipeline::{IdempotentPipeline, ProcessOutcome, SkipReason};
pub use rate_limiter::{RateLimitConfig, RateLimiter, RequestType, SharedRateLimiter};
pub use source::{Cleanup, CycleContext, CycleReport, Source};

use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::scheduler::{
    Resource, SchedulerConfig, SchedulerError, SchedulerSnapshot, ShutdownHandle, WorkerScheduler,
};
use crate::sources;
use crate::storage::Storage;
use crate::utils::retry::{with_retry, RetryBudget};

/// A fully assembled worker for one source
pub struct Worker {
    config: Config,
    limiter: SharedRateLimiter,
    pipeline: Arc<IdempotentPipeline>,
    scheduler: WorkerScheduler,
}

impl Worker {
    /// Validate `config`, open storage and build the configured source
    ///
    /// # Errors
    ///
    /// Invalid configuration, or storage still unreachable after
    /// `startup_retries` attempts (a fatal error).
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let storage = open_storage(&config).await?;
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig::from(&config)));
        let fetcher = Arc::new(HttpFetcher::from_config(&config, Arc::clone(&limiter))?);

        let pipeline = Arc::new(
            IdempotentPipeline::new(storage.records.clone())
                .with_media(storage.media.clone(), config.storage.media_prefix.clone()),
        );
        let source = sources::build_source(&config, Arc::clone(&fetcher));

        // Closed in this order at shutdown
        let mut resources: Vec<Arc<dyn Resource>> = Vec::with_capacity(3);
        resources.push(fetcher);
        resources.push(storage.records);
        resources.push(storage.media);
        Ok(Self::with_source(config, source, pipeline, limiter, resources))
    }

    /// Assemble a worker around an existing source and pipeline
    pub fn with_source(
        config: Config,
        source: Arc<dyn Source>,
        pipeline: Arc<IdempotentPipeline>,
        limiter: SharedRateLimiter,
        resources: Vec<Arc<dyn Resource>>,
    ) -> Self {
        let scheduler = resources.into_iter().fold(
            WorkerScheduler::new(source, Arc::clone(&pipeline), SchedulerConfig::from(&config)),
            WorkerScheduler::with_resource,
        );

        Self {
            config,
            limiter,
            pipeline,
            scheduler,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn rate_limiter(&self) -> &SharedRateLimiter {
        &self.limiter
    }

    pub fn pipeline(&self) -> &Arc<IdempotentPipeline> {
        &self.pipeline
    }

    pub fn scheduler(&self) -> &WorkerScheduler {
        &self.scheduler
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.scheduler.shutdown_handle()
    }

    /// Run until shutdown is requested
    pub async fn run(&self) -> Result<SchedulerSnapshot> {
        tracing::info!(
            source = %self.config.source.name,
            urls = self.config.source.urls.len(),
            "Starting worker"
        );

        let snapshot = self.scheduler.run().await?;
        let pipeline = self.pipeline.stats();
        let limiter = self.limiter.get_stats(&self.config.source.name);

        tracing::info!(
            source = %self.config.source.name,
            cycles = snapshot.cycles,
            failed_cycles = snapshot.failed_cycles,
            overruns = snapshot.overruns,
            saved = pipeline.saved,
            skipped = pipeline.skipped,
            failed = pipeline.failed,
            requests_last_minute = limiter.requests_last_minute,
            "Worker finished"
        );
        Ok(snapshot)
    }
}

/// Open storage within the startup retry budget
///
/// # Errors
///
/// `SchedulerError::StartupFailed` once the budget is spent.
pub async fn open_storage(config: &Config) -> std::result::Result<Storage, SchedulerError> {
    let budget = RetryBudget::new(config.storage.startup_retries);

    with_retry(&budget, "storage", || async {
        Storage::open(&config.storage)
            .await
            .map_err(anyhow::Error::from)
    })
    .await
    .map_err(|e| SchedulerError::startup_failed("storage", format!("{e:#}")))
}
