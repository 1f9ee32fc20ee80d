//! Job store contract.

use std::time::Duration;

use async_trait::async_trait;

use vgen_models::{CancelEffect, JobId, JobRecord, JobUpdate, StaleReason};

use crate::error::QueueResult;

/// Result of a conditional update.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// Update persisted; carries the record as written.
    Applied(JobRecord),
    /// Update refused; the stored record is unchanged.
    Stale(StaleReason),
}

impl UpdateOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, UpdateOutcome::Applied(_))
    }
}

/// Jobs touched by one liveness sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub requeued: Vec<JobId>,
    pub failed: Vec<JobId>,
}

impl RecoveryReport {
    pub fn is_empty(&self) -> bool {
        self.requeued.is_empty() && self.failed.is_empty()
    }
}

/// Durable storage for job records.
///
/// Every mutation is atomic with respect to concurrent writers: two workers
/// can never both claim the same job, and updates to terminal records are
/// refused rather than overwriting the outcome.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new queued record.
    async fn create(&self, job: JobRecord) -> QueueResult<()>;

    /// Atomically take the oldest queued job for `owner`, if any.
    async fn claim_next(&self, owner: &str) -> QueueResult<Option<JobRecord>>;

    /// Apply `update` through [`JobRecord::apply`] and persist the result.
    async fn update(&self, id: &JobId, update: JobUpdate) -> QueueResult<UpdateOutcome>;

    async fn get(&self, id: &JobId) -> QueueResult<Option<JobRecord>>;

    /// Most recently created jobs first.
    async fn list_recent(&self, limit: usize) -> QueueResult<Vec<JobRecord>>;

    /// Record a cancellation request. `None` when the job does not exist.
    async fn request_cancel(&self, id: &JobId) -> QueueResult<Option<CancelEffect>>;

    /// Requeue or fail running jobs silent for longer than `liveness`.
    async fn recover_stale(
        &self,
        liveness: Duration,
        max_requeues: u32,
    ) -> QueueResult<RecoveryReport>;

    /// Delete terminal records last updated more than `age` ago. Returns the count removed.
    async fn evict_older_than(&self, age: Duration) -> QueueResult<usize>;

    /// Number of jobs waiting to be claimed.
    async fn queue_depth(&self) -> QueueResult<u64>;

    /// Connectivity check used by readiness probes.
    async fn ping(&self) -> QueueResult<()>;
}

pub(crate) fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(duration.as_millis().min(i64::MAX as u128) as i64)
}
