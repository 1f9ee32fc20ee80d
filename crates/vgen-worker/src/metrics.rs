//! Prometheus metrics for the pipeline worker.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use vgen_models::{JobErrorKind, Stage};

/// Serve worker metrics on `addr` (`/metrics` scrape endpoint).
pub fn init_metrics(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    Ok(())
}

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_CLAIMED_TOTAL: &str = "vgen_jobs_claimed_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "vgen_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "vgen_jobs_failed_total";
    pub const JOBS_RUNNING: &str = "vgen_jobs_running";
    pub const QUEUE_LENGTH: &str = "vgen_queue_length";

    pub const STAGE_DURATION_SECONDS: &str = "vgen_stage_duration_seconds";
    pub const STAGE_RETRIES_TOTAL: &str = "vgen_stage_retries_total";
    pub const ADAPTER_FAILURES_TOTAL: &str = "vgen_adapter_failures_total";

    pub const JOBS_REQUEUED_TOTAL: &str = "vgen_jobs_requeued_total";
    pub const JOBS_LOST_TOTAL: &str = "vgen_jobs_lost_total";
    pub const JOBS_EVICTED_TOTAL: &str = "vgen_jobs_evicted_total";
}

pub fn record_job_claimed() {
    counter!(names::JOBS_CLAIMED_TOTAL).increment(1);
}

pub fn record_job_completed() {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
}

pub fn record_job_failed(kind: JobErrorKind) {
    let labels = [("kind", kind.as_str().to_string())];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

pub fn set_jobs_running(count: usize) {
    gauge!(names::JOBS_RUNNING).set(count as f64);
}

pub fn set_queue_length(length: u64) {
    gauge!(names::QUEUE_LENGTH).set(length as f64);
}

/// Duration of a successful stage run, retries included.
pub fn record_stage_duration(stage: Stage, duration_secs: f64) {
    let labels = [("stage", stage.as_str().to_string())];
    histogram!(names::STAGE_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_stage_retry(stage: Stage) {
    let labels = [("stage", stage.as_str().to_string())];
    counter!(names::STAGE_RETRIES_TOTAL, &labels).increment(1);
}

pub fn record_adapter_failure(adapter: &str, transient: bool) {
    let labels = [
        ("adapter", adapter.to_string()),
        ("class", if transient { "transient" } else { "fatal" }.to_string()),
    ];
    counter!(names::ADAPTER_FAILURES_TOTAL, &labels).increment(1);
}

pub fn record_sweep(requeued: usize, lost: usize, evicted: usize) {
    counter!(names::JOBS_REQUEUED_TOTAL).increment(requeued as u64);
    counter!(names::JOBS_LOST_TOTAL).increment(lost as u64);
    counter!(names::JOBS_EVICTED_TOTAL).increment(evicted as u64);
}
