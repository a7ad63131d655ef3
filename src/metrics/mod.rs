//! Prometheus metrics for newsdesk workers
//!
//! This module provides metrics tracking for:
//! - Fetching: attempts by outcome, backoff sleeps, rate limiter waits
//! - Pipeline: item outcomes per source
//! - Scheduler: cycle duration and overruns
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops. There is no
//! HTTP endpoint; [`write_textfile`] dumps the registry for a node exporter
//! textfile collector.

use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};
use std::path::Path;
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for all worker metrics
struct WorkerMetrics {
    fetch_attempts: CounterVec,
    backoff_seconds: CounterVec,
    rate_limit_wait_seconds: HistogramVec,
    pipeline_items: CounterVec,
    cycle_duration: HistogramVec,
    cycle_overruns: CounterVec,
}

/// Global storage for worker metrics
static WORKER_METRICS: OnceLock<WorkerMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Safe to call more than once; only the first call registers anything.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = newsdesk::metrics::init_metrics() {
///     eprintln!("Warning: Metrics initialization failed: {}", e);
///     // Application can continue without metrics
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    // Prevent double initialization
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let metrics = WorkerMetrics {
        fetch_attempts: register_counter_vec!(
            "newsdesk_fetch_attempts_total",
            "Fetch attempts by source and outcome",
            &["source", "outcome"]
        )?,
        backoff_seconds: register_counter_vec!(
            "newsdesk_fetch_backoff_seconds_total",
            "Seconds spent sleeping between fetch attempts",
            &["source"]
        )?,
        rate_limit_wait_seconds: register_histogram_vec!(
            "newsdesk_rate_limit_wait_seconds",
            "Time callers waited for rate limiter admission",
            &["source", "request_type"],
            vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
        )?,
        pipeline_items: register_counter_vec!(
            "newsdesk_pipeline_items_total",
            "Pipeline outcomes by source",
            &["source", "outcome"]
        )?,
        cycle_duration: register_histogram_vec!(
            "newsdesk_cycle_duration_seconds",
            "Fetch cycle duration in seconds",
            &["source", "status"],
            vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]
        )?,
        cycle_overruns: register_counter_vec!(
            "newsdesk_cycle_overruns_total",
            "Cycles that took longer than the poll interval",
            &["source"]
        )?,
    };

    WORKER_METRICS
        .set(metrics)
        .map_err(|_| "Worker metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    WORKER_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Write the text exposition to `path`, replacing any previous file
pub fn write_textfile(path: &Path) -> anyhow::Result<()> {
    let text = encode_metrics().map_err(|e| anyhow::anyhow!("Failed to encode metrics: {e}"))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let temp_path = path.with_extension("prom.tmp");
    std::fs::write(&temp_path, text)?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}

/// Record one fetch attempt
pub fn record_fetch_attempt(source: &str, outcome: &str) {
    if let Some(m) = WORKER_METRICS.get() {
        m.fetch_attempts.with_label_values(&[source, outcome]).inc();
    }
}

/// Record a backoff sleep
pub fn record_backoff(source: &str, secs: f64) {
    if let Some(m) = WORKER_METRICS.get() {
        m.backoff_seconds.with_label_values(&[source]).inc_by(secs);
    }
}

/// Record time spent waiting for admission
pub fn record_rate_limit_wait(source: &str, request_type: &str, secs: f64) {
    if let Some(m) = WORKER_METRICS.get() {
        m.rate_limit_wait_seconds
            .with_label_values(&[source, request_type])
            .observe(secs);
    }
}

/// Record a pipeline outcome (`saved`, `skipped`, `failed`)
pub fn record_pipeline_outcome(source: &str, outcome: &str) {
    if let Some(m) = WORKER_METRICS.get() {
        m.pipeline_items.with_label_values(&[source, outcome]).inc();
    }
}

/// Record a finished cycle
pub fn observe_cycle(source: &str, status: &str, secs: f64) {
    if let Some(m) = WORKER_METRICS.get() {
        m.cycle_duration
            .with_label_values(&[source, status])
            .observe(secs);
    }
}

/// Record a cycle that overran the poll interval
pub fn record_overrun(source: &str) {
    if let Some(m) = WORKER_METRICS.get() {
        m.cycle_overruns.with_label_values(&[source]).inc();
    }
}

// ============================================================================
// Tests
// ============================================================================
