//! Contract between the scheduler and source-specific ingestion logic

use async_trait::async_trait;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;

use crate::crawler::pipeline::{IdempotentPipeline, ProcessOutcome};
use crate::models::{CandidateItem, NewsRecord};
use crate::scheduler::shutdown::ShutdownSignal;
use crate::utils::error::PipelineError;

/// Everything a fetch cycle may use
#[derive(Clone)]
pub struct CycleContext {
    pub source: String,
    pub pipeline: Arc<IdempotentPipeline>,
    pub shutdown: ShutdownSignal,
}

impl CycleContext {
    pub fn new(
        source: impl Into<String>,
        pipeline: Arc<IdempotentPipeline>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            source: source.into(),
            pipeline,
            shutdown,
        }
    }

    /// Run one candidate through the pipeline and count its outcome
    pub async fn process(&self, report: &mut CycleReport, item: CandidateItem) -> ProcessOutcome {
        let outcome = self.pipeline.process(item).await;
        report.record(&outcome);
        outcome
    }

    /// Like [`process`](Self::process) with source-specific preparation
    pub async fn process_with<F, Fut>(
        &self,
        report: &mut CycleReport,
        item: CandidateItem,
        prepare: F,
    ) -> ProcessOutcome
    where
        F: FnOnce(CandidateItem) -> Fut,
        Fut: Future<Output = Result<NewsRecord, PipelineError>>,
    {
        let outcome = self.pipeline.process_with(item, prepare).await;
        report.record(&outcome);
        outcome
    }
}

/// Item counts for one fetch cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub attempted: u64,
    pub saved: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl CycleReport {
    pub fn record(&mut self, outcome: &ProcessOutcome) {
        self.attempted += 1;
        match outcome {
            ProcessOutcome::Saved => self.saved += 1,
            ProcessOutcome::Skipped(_) => self.skipped += 1,
            ProcessOutcome::Failed(_) => self.failed += 1,
        }
    }

    /// Work units that could not even produce a candidate (e.g. a fetch
    /// that returned nothing)
    pub fn record_unfetched(&mut self) {
        self.attempted += 1;
        self.failed += 1;
    }
}

/// Optional shutdown hook of a source
#[async_trait]
pub trait Cleanup: Send + Sync {
    async fn cleanup(&self) -> anyhow::Result<()>;
}

/// Source-specific ingestion logic driven by the scheduler
///
/// A cycle performs any number of rate-limited fetches and pipeline calls,
/// sequentially. Errors returned from `fetch_cycle` fail the cycle but
/// never stop the worker.
#[async_trait]
pub trait Source: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_cycle(&self, ctx: &CycleContext) -> anyhow::Result<CycleReport>;

    /// Hook invoked once during shutdown, if the source has one
    fn cleanup_hook(&self) -> Option<&dyn Cleanup> {
        None
    }
}
