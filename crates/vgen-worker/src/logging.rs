//! Structured job logging utilities.
//!
//! Provides consistent, structured logging for pipeline runs with
//! tracing spans and contextual information.

use std::time::Duration;

use tracing::{error, info, warn, Span};
use vgen_models::{AdapterError, JobId, Stage};

/// Job logger for structured logging with consistent formatting.
///
/// Every line carries the job id and the worker that owns the run.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    worker: String,
}

impl JobLogger {
    pub fn new(job_id: &JobId, worker: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            worker: worker.to_string(),
        }
    }

    /// Log the start of a pipeline run.
    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            worker = %self.worker,
            "Job started: {}", message
        );
    }

    pub fn log_stage_start(&self, stage: Stage, attempt: u32, max_attempts: u32) {
        info!(
            job_id = %self.job_id,
            worker = %self.worker,
            stage = %stage,
            attempt,
            max_attempts,
            "Stage started"
        );
    }

    pub fn log_stage_skipped(&self, stage: Stage) {
        info!(
            job_id = %self.job_id,
            worker = %self.worker,
            stage = %stage,
            "Stage output already recorded, skipping"
        );
    }

    pub fn log_stage_complete(&self, stage: Stage, adapter: &str, elapsed: Duration) {
        info!(
            job_id = %self.job_id,
            worker = %self.worker,
            stage = %stage,
            adapter,
            elapsed_ms = elapsed.as_millis() as u64,
            "Stage completed"
        );
    }

    /// One adapter in the fallback chain failed.
    pub fn log_adapter_failure(&self, stage: Stage, adapter: &str, err: &AdapterError) {
        warn!(
            job_id = %self.job_id,
            worker = %self.worker,
            stage = %stage,
            adapter,
            class = ?err.class,
            "Adapter failed: {}", err
        );
    }

    pub fn log_retry(&self, stage: Stage, attempt: u32, delay: Duration) {
        warn!(
            job_id = %self.job_id,
            worker = %self.worker,
            stage = %stage,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Transient stage failure, backing off"
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            worker = %self.worker,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            worker = %self.worker,
            "Job error: {}", message
        );
    }

    /// Log the completion of a pipeline run.
    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            worker = %self.worker,
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn worker(&self) -> &str {
        &self.worker
    }

    /// Create a tracing span for this job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            worker = %self.worker
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_creation() {
        let job_id = JobId::new();
        let logger = JobLogger::new(&job_id, "worker-1");

        assert_eq!(logger.job_id(), job_id.to_string());
        assert_eq!(logger.worker(), "worker-1");
    }
}
