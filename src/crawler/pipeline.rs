//! Persist-once ingestion pipeline
//!
//! Every candidate item goes through the same steps:
//!
//! ```text
//! CandidateItem ──> key ──> exists? ──yes──> Skipped(AlreadyExists)
//!                              │ no
//!                              ▼
//!                      prepare (extract, media)
//!                              │
//!                     error ───┼──> Failed
//!                              ▼
//!                           insert ──unique violation──> Skipped(AlreadyExists)
//!                              │  ──other error──────> Failed
//!                              ▼
//!                            Saved
//! ```
//!
//! The existence check only saves work; it may race with a concurrent
//! cycle. The record store's unique key is what guarantees at most one
//! record per idempotency key.
//!
//! # Example
//!
//! ```no_run
//! use newsdesk::crawler::pipeline::{IdempotentPipeline, ProcessOutcome};
//! use newsdesk::models::CandidateItem;
//! use newsdesk::storage::MemoryRecordStore;
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let pipeline = IdempotentPipeline::new(Arc::new(MemoryRecordStore::new()));
//! let item = CandidateItem::new("tasnim", "1").with_title("Headline");
//! assert!(matches!(pipeline.process(item).await, ProcessOutcome::Saved));
//! # }
//! ```

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::metrics;
use crate::models::{CandidateItem, MediaAsset, NewsRecord};
use crate::storage::{media_key, sniff_image_type, InsertOutcome, ObjectStore, SharedRecordStore};
use crate::utils::error::PipelineError;
use crate::utils::sha256_hex;

/// Default key prefix for media assets
pub const DEFAULT_MEDIA_PREFIX: &str = "news-images";

// ============================================================================
// Outcomes
// ============================================================================

/// Why an item was not persisted although nothing failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A record with the same idempotency key is already stored
    AlreadyExists,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyExists => write!(f, "already exists"),
        }
    }
}

/// Result of processing one candidate
#[derive(Debug)]
pub enum ProcessOutcome {
    Saved,
    Skipped(SkipReason),
    Failed(PipelineError),
}

impl ProcessOutcome {
    /// Short label for logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            Self::Saved => "saved",
            Self::Skipped(_) => "skipped",
            Self::Failed(_) => "failed",
        }
    }

    pub fn is_saved(&self) -> bool {
        matches!(self, Self::Saved)
    }
}

// ============================================================================
// Pipeline Statistics
// ============================================================================

/// Pipeline statistics (thread-safe)
#[derive(Debug, Default)]
pub struct PipelineStats {
    /// Items handed to the pipeline
    pub processed: AtomicU64,

    /// Newly persisted records
    pub saved: AtomicU64,

    /// Duplicates detected by the existence check or the unique key
    pub skipped: AtomicU64,

    /// Items that failed in preparation or persistence
    pub failed: AtomicU64,

    /// Media bytes uploaded
    pub media_bytes: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, outcome: &ProcessOutcome) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            ProcessOutcome::Saved => &self.saved,
            ProcessOutcome::Skipped(_) => &self.skipped,
            ProcessOutcome::Failed(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            saved: self.saved.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            media_bytes: self.media_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of pipeline statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub processed: u64,
    pub saved: u64,
    pub skipped: u64,
    pub failed: u64,
    pub media_bytes: u64,
}

impl StatsSnapshot {
    /// Share of items that did not fail (0.0 - 1.0)
    pub fn success_rate(&self) -> f64 {
        if self.processed == 0 {
            return 1.0;
        }
        (self.saved + self.skipped) as f64 / self.processed as f64
    }
}

// ============================================================================
// Pipeline Implementation
// ============================================================================

/// Enforces at most one persisted record per idempotency key
///
/// Items are processed one at a time by the caller; the pipeline itself
/// never spawns work.
pub struct IdempotentPipeline {
    store: SharedRecordStore,
    media: Option<Arc<dyn ObjectStore>>,
    media_prefix: String,
    stats: Arc<PipelineStats>,
}

impl IdempotentPipeline {
    pub fn new(store: SharedRecordStore) -> Self {
        Self {
            store,
            media: None,
            media_prefix: DEFAULT_MEDIA_PREFIX.to_string(),
            stats: PipelineStats::new(),
        }
    }

    /// Attach an object store for [`upload_media`](Self::upload_media)
    pub fn with_media(mut self, media: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        self.media = Some(media);
        self.media_prefix = prefix.into();
        self
    }

    pub fn store(&self) -> &SharedRecordStore {
        &self.store
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Persist the candidate as-is
    pub async fn process(&self, item: CandidateItem) -> ProcessOutcome {
        self.process_with(item, |item| async move { Ok(NewsRecord::from_candidate(&item)) })
            .await
    }

    /// Persist the record built by `prepare`
    ///
    /// `prepare` holds the expensive work (extraction, media) and only runs
    /// when the key is not known to exist. The record it returns must keep
    /// the candidate's key.
    pub async fn process_with<F, Fut>(&self, item: CandidateItem, prepare: F) -> ProcessOutcome
    where
        F: FnOnce(CandidateItem) -> Fut,
        Fut: Future<Output = Result<NewsRecord, PipelineError>>,
    {
        let key = item.key();
        let source = item.source.clone();

        let outcome = 'outcome: {
            match self.store.exists(&key).await {
                Ok(true) => break 'outcome ProcessOutcome::Skipped(SkipReason::AlreadyExists),
                Ok(false) => {}
                Err(e) => {
                    // Insert still enforces uniqueness
                    tracing::warn!(
                        source = %source,
                        key = %key,
                        error = %e,
                        "Existence check failed, continuing to insert"
                    );
                }
            }

            let record = match prepare(item).await {
                Ok(record) => record,
                Err(e) => break 'outcome ProcessOutcome::Failed(e),
            };

            if record.key != key {
                break 'outcome ProcessOutcome::Failed(PipelineError::KeyMismatch {
                    expected: key.to_string(),
                    actual: record.key.to_string(),
                });
            }

            match self.store.insert(&record).await {
                Ok(InsertOutcome::Inserted) => ProcessOutcome::Saved,
                Ok(InsertOutcome::UniqueViolation) => {
                    ProcessOutcome::Skipped(SkipReason::AlreadyExists)
                }
                Err(e) => ProcessOutcome::Failed(PipelineError::Store(e)),
            }
        };

        match &outcome {
            ProcessOutcome::Saved => {
                tracing::info!(source = %source, key = %key, "Record saved");
            }
            ProcessOutcome::Skipped(reason) => {
                tracing::debug!(source = %source, key = %key, reason = %reason, "Item skipped");
            }
            ProcessOutcome::Failed(e) => {
                tracing::warn!(source = %source, key = %key, error = %e, "Item failed");
            }
        }

        self.stats.record(&outcome);
        metrics::record_pipeline_outcome(&source, outcome.label());
        outcome
    }

    /// Store image bytes under their content-addressed key
    ///
    /// Uploading identical bytes for the same source and date returns the
    /// same asset and writes nothing new.
    pub async fn upload_media(
        &self,
        source: &str,
        date: DateTime<Utc>,
        bytes: Bytes,
    ) -> Result<MediaAsset, PipelineError> {
        let media = self
            .media
            .as_ref()
            .ok_or_else(|| PipelineError::media("no media store configured"))?;

        let image_type = sniff_image_type(&bytes)
            .ok_or_else(|| PipelineError::media("payload is not a supported image"))?;

        let key = media_key(&self.media_prefix, source, date, &bytes, image_type);
        let size = bytes.len() as u64;
        let sha256 = sha256_hex(&bytes);

        media
            .put(&key, bytes, image_type.content_type())
            .await
            .map_err(|e| PipelineError::media(format!("upload of {key} failed: {e}")))?;

        self.stats.media_bytes.fetch_add(size, Ordering::Relaxed);

        Ok(MediaAsset {
            key,
            content_type: image_type.content_type().to_string(),
            size,
            sha256,
        })
    }
}
