//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Patch runs (results, durations)
//! - Pipeline stages (transitions, failures)
//! - Downloads (files, bytes, retries)
//! - Version policy fetches

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Patch Runs
// =============================================================================

/// Patch runs total by result.
pub static PATCH_RUNS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("hotpatch_runs_total", "Total patch runs"),
        &["result"], // "succeeded", "failed", "cancelled"
    )
    .unwrap()
});

/// Patch run duration in seconds.
pub static PATCH_RUN_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "hotpatch_run_duration_seconds",
            "Duration of a patch run from start to terminal status",
        )
        .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0]),
        &["result"],
    )
    .unwrap()
});

// =============================================================================
// Pipeline Stages
// =============================================================================

/// Stage entries by stage name.
pub static STAGE_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "hotpatch_stage_transitions_total",
            "Total pipeline stage entries",
        ),
        &["stage"],
    )
    .unwrap()
});

/// Stage failures by stage name.
pub static STAGE_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("hotpatch_stage_failures_total", "Total pipeline stage failures"),
        &["stage"],
    )
    .unwrap()
});

// =============================================================================
// Downloads
// =============================================================================

/// Bundle files downloaded.
pub static FILES_DOWNLOADED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "hotpatch_files_downloaded_total",
        "Total bundle files downloaded",
    )
    .unwrap()
});

/// Bytes downloaded.
pub static BYTES_DOWNLOADED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "hotpatch_bytes_downloaded_total",
        "Total bundle bytes downloaded",
    )
    .unwrap()
});

/// File transfer retries.
pub static DOWNLOAD_RETRIES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "hotpatch_download_retries_total",
        "Total bundle file transfer retries",
    )
    .unwrap()
});

// =============================================================================
// Version Policy
// =============================================================================

/// Policy fetches by result.
pub static POLICY_FETCHES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("hotpatch_policy_fetches_total", "Total version policy fetches"),
        &["result"], // "success", "cached", "failed", "fallback"
    )
    .unwrap()
});

/// Returns all core metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(PATCH_RUNS.clone()),
        Box::new(PATCH_RUN_DURATION.clone()),
        Box::new(STAGE_TRANSITIONS.clone()),
        Box::new(STAGE_FAILURES.clone()),
        Box::new(FILES_DOWNLOADED.clone()),
        Box::new(BYTES_DOWNLOADED.clone()),
        Box::new(DOWNLOAD_RETRIES.clone()),
        Box::new(POLICY_FETCHES.clone()),
    ]
}
