//! Prometheus metrics for the categorization and allocation engine
//!
//! Tracks classification throughput, allocation outcomes, skipped scheduler
//! ticks, result-feed reconnects and bin populations.
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

struct EngineMetrics {
    classified: CounterVec,
    quarantined: CounterVec,
    allocations: CounterVec,
    allocation_duration: HistogramVec,
    ingested: CounterVec,
    ticks_skipped: CounterVec,
    job_runs: CounterVec,
    feed_reconnects: CounterVec,
    bin_size: GaugeVec,
}

static ENGINE_METRICS: OnceLock<EngineMetrics> = OnceLock::new();

static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Safe to call more than once. If registration fails the error is
/// returned and every recorder below stays a no-op.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let metrics = EngineMetrics {
        classified: register_counter_vec!(
            "roundsmith_candidates_classified_total",
            "Candidates filed into outcome bins",
            &["region"]
        )?,
        quarantined: register_counter_vec!(
            "roundsmith_candidates_quarantined_total",
            "Candidates moved to the WRONG_FORMAT bin",
            &["region", "stage"]
        )?,
        allocations: register_counter_vec!(
            "roundsmith_allocations_total",
            "Allocation attempts by outcome",
            &["region", "outcome"]
        )?,
        allocation_duration: register_histogram_vec!(
            "roundsmith_allocation_duration_seconds",
            "Time spent assembling one round",
            &["region"],
            vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
        )?,
        ingested: register_counter_vec!(
            "roundsmith_ingested_records_total",
            "Records written by ingestion workers",
            &["kind"]
        )?,
        ticks_skipped: register_counter_vec!(
            "roundsmith_scheduler_ticks_skipped_total",
            "Timer ticks skipped because the job was still running",
            &["job"]
        )?,
        job_runs: register_counter_vec!(
            "roundsmith_scheduler_job_runs_total",
            "Completed job runs by status",
            &["job", "status"]
        )?,
        feed_reconnects: register_counter_vec!(
            "roundsmith_feed_reconnects_total",
            "Result feed reconnect attempts",
            &["endpoint"]
        )?,
        bin_size: register_gauge_vec!(
            "roundsmith_bin_size",
            "Number of candidates in a bin",
            &["bin"]
        )?,
    };

    ENGINE_METRICS
        .set(metrics)
        .map_err(|_| "Engine metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    ENGINE_METRICS.get().is_some()
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

// ============================================================================
// Recorders
// ============================================================================

pub fn record_classified(region: &str, count: u64) {
    if count == 0 {
        return;
    }
    if let Some(m) = ENGINE_METRICS.get() {
        m.classified.with_label_values(&[region]).inc_by(count as f64);
    }
}

/// `stage` is `categorize` or `allocate`
pub fn record_quarantined(region: &str, stage: &str, count: u64) {
    if count == 0 {
        return;
    }
    if let Some(m) = ENGINE_METRICS.get() {
        m.quarantined
            .with_label_values(&[region, stage])
            .inc_by(count as f64);
    }
}

/// `outcome` is `ok` or an error category label
pub fn record_allocation(region: &str, outcome: &str, duration_secs: f64) {
    let Some(m) = ENGINE_METRICS.get() else {
        return;
    };
    m.allocations.with_label_values(&[region, outcome]).inc();
    m.allocation_duration
        .with_label_values(&[region])
        .observe(duration_secs);
}

pub fn record_ingested(kind: &str, count: u64) {
    if count == 0 {
        return;
    }
    if let Some(m) = ENGINE_METRICS.get() {
        m.ingested.with_label_values(&[kind]).inc_by(count as f64);
    }
}

pub fn record_tick_skipped(job: &str) {
    if let Some(m) = ENGINE_METRICS.get() {
        m.ticks_skipped.with_label_values(&[job]).inc();
    }
}

pub fn record_job_run(job: &str, success: bool) {
    if let Some(m) = ENGINE_METRICS.get() {
        let status = if success { "ok" } else { "error" };
        m.job_runs.with_label_values(&[job, status]).inc();
    }
}

pub fn record_feed_reconnect(endpoint: &str) {
    if let Some(m) = ENGINE_METRICS.get() {
        m.feed_reconnects.with_label_values(&[endpoint]).inc();
    }
}

pub fn set_bin_size(bin: &str, size: usize) {
    if let Some(m) = ENGINE_METRICS.get() {
        m.bin_size.with_label_values(&[bin]).set(size as f64);
    }
}

// ============================================================================
// Tests
// ============================================================================
