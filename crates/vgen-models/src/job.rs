//! Job record and its lifecycle rules.
//!
//! A job moves `queued -> running -> {completed | failed}`. The only path back
//! to `queued` is a liveness recovery of a job whose worker stopped
//! heartbeating. Every mutation goes through [`JobRecord::apply`] (or the
//! dedicated claim/cancel/recover helpers) so stores only have to persist the
//! result atomically.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::request::GenerationRequest;
use crate::stage::{Stage, StageOutput, StageOutputs};

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for a worker
    #[default]
    Queued,
    /// Claimed by a worker
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a job failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobErrorKind {
    /// An adapter reported a non-retryable failure or retries ran out
    FatalAdapterError,
    /// The job's worker disappeared too many times
    WorkerLost,
    Cancelled,
    /// Unexpected failure inside the executor itself
    Internal,
}

impl JobErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobErrorKind::FatalAdapterError => "FatalAdapterError",
            JobErrorKind::WorkerLost => "WorkerLost",
            JobErrorKind::Cancelled => "Cancelled",
            JobErrorKind::Internal => "Internal",
        }
    }
}

impl fmt::Display for JobErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal error stored on a failed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: JobErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    pub message: String,
}

impl JobError {
    pub fn new(kind: JobErrorKind, stage: Option<Stage>, message: impl Into<String>) -> Self {
        Self {
            kind,
            stage,
            message: message.into(),
        }
    }

    pub fn cancelled(stage: Option<Stage>) -> Self {
        Self::new(JobErrorKind::Cancelled, stage, "Job cancelled by request")
    }
}

/// Final artifact of a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub artifact_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

/// Why a store refused to apply an update.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StaleReason {
    #[error("job not found")]
    Missing,
    #[error("job already reached a terminal state")]
    Terminal,
    #[error("job is owned by another worker")]
    NotOwner,
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    #[error("concurrent modification, retries exhausted")]
    Conflict,
}

/// Partial update applied through [`JobRecord::apply`].
///
/// When `owner` is set the update only applies while that worker still owns
/// the job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub owner: Option<String>,
    pub state: Option<JobState>,
    pub current_stage: Option<Stage>,
    pub progress: Option<u8>,
    pub status_message: Option<String>,
    pub attempt: Option<(Stage, u32)>,
    pub output: Option<StageOutput>,
    pub result: Option<JobResult>,
    pub error: Option<JobError>,
}

impl JobUpdate {
    /// Empty update guarded by `owner`.
    pub fn guarded(owner: impl Into<String>) -> Self {
        Self {
            owner: Some(owner.into()),
            ..Default::default()
        }
    }

    /// Liveness signal: only refreshes `updated_at`.
    pub fn heartbeat(owner: impl Into<String>) -> Self {
        Self::guarded(owner)
    }

    pub fn complete(owner: impl Into<String>, result: JobResult) -> Self {
        Self {
            state: Some(JobState::Completed),
            progress: Some(100),
            status_message: Some("Video ready".to_string()),
            result: Some(result),
            ..Self::guarded(owner)
        }
    }

    /// Terminal failure. `owner` is `None` for failures decided outside a worker.
    pub fn fail(owner: Option<String>, error: JobError) -> Self {
        Self {
            owner,
            state: Some(JobState::Failed),
            status_message: Some(error.message.clone()),
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.current_stage = Some(stage);
        self
    }

    pub fn progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.status_message = Some(message.into());
        self
    }

    pub fn attempt(mut self, stage: Stage, attempt: u32) -> Self {
        self.attempt = Some((stage, attempt));
        self
    }

    pub fn output(mut self, output: StageOutput) -> Self {
        self.output = Some(output);
        self
    }
}

/// Outcome of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelEffect {
    /// Queued job failed immediately with `Cancelled`
    Cancelled,
    /// Running job flagged; the worker stops at the next stage boundary
    Flagged,
    AlreadyTerminal,
}

/// Outcome of recovering a job whose worker went silent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    Requeued,
    Failed,
}

/// Persisted state of one generation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub input: GenerationRequest,
    pub state: JobState,
    #[serde(default)]
    pub current_stage: Option<Stage>,
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub status_message: Option<String>,
    /// Attempts made at each stage, counted across requeues
    #[serde(default)]
    pub attempts: BTreeMap<Stage, u32>,
    /// Times the liveness sweep put this job back in the queue
    #[serde(default)]
    pub requeue_count: u32,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub cancel_requested: bool,
    #[serde(default)]
    pub outputs: StageOutputs,
    #[serde(default)]
    pub result: Option<JobResult>,
    #[serde(default)]
    pub error: Option<JobError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// New queued record for a validated request.
    pub fn new(input: GenerationRequest) -> Self {
        Self::with_id(JobId::new(), input, Utc::now())
    }

    pub fn with_id(id: JobId, input: GenerationRequest, now: DateTime<Utc>) -> Self {
        Self {
            id,
            input,
            state: JobState::Queued,
            current_stage: None,
            progress: 0,
            status_message: Some("Queued".to_string()),
            attempts: BTreeMap::new(),
            requeue_count: 0,
            owner: None,
            cancel_requested: false,
            outputs: StageOutputs::default(),
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn attempts_for(&self, stage: Stage) -> u32 {
        self.attempts.get(&stage).copied().unwrap_or(0)
    }

    /// Running and silent for longer than `threshold`.
    pub fn is_stale(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        self.state == JobState::Running && now - self.updated_at > threshold
    }

    /// Hand a queued job to `owner`.
    pub fn claim(&mut self, owner: &str, now: DateTime<Utc>) -> Result<(), StaleReason> {
        match self.state {
            JobState::Queued => {}
            JobState::Running => return Err(StaleReason::NotOwner),
            _ => return Err(StaleReason::Terminal),
        }

        self.state = JobState::Running;
        self.owner = Some(owner.to_string());
        self.current_stage = None;
        self.status_message = Some("Starting".to_string());
        self.started_at.get_or_insert(now);
        self.updated_at = now;
        Ok(())
    }

    /// Apply a partial update, enforcing the lifecycle invariants.
    ///
    /// Progress never decreases and stays at or below 99 until the job
    /// completes. `current_stage` only moves forward.
    pub fn apply(&mut self, update: JobUpdate, now: DateTime<Utc>) -> Result<(), StaleReason> {
        if self.state.is_terminal() {
            return Err(StaleReason::Terminal);
        }
        if let Some(owner) = &update.owner {
            if self.owner.as_deref() != Some(owner.as_str()) {
                return Err(StaleReason::NotOwner);
            }
        }

        let target = update.state.unwrap_or(self.state);
        match (self.state, target) {
            (JobState::Queued, JobState::Queued) | (JobState::Running, JobState::Running) => {}
            (JobState::Running, JobState::Completed) => {
                if update.result.is_none() {
                    return Err(StaleReason::InvalidTransition(
                        "completion requires a result".to_string(),
                    ));
                }
            }
            (JobState::Queued | JobState::Running, JobState::Failed) => {
                if update.error.is_none() {
                    return Err(StaleReason::InvalidTransition(
                        "failure requires an error".to_string(),
                    ));
                }
            }
            (from, to) => {
                return Err(StaleReason::InvalidTransition(format!("{} -> {}", from, to)));
            }
        }

        if let (Some(next), Some(current)) = (update.current_stage, self.current_stage) {
            if next < current {
                return Err(StaleReason::InvalidTransition(format!(
                    "stage {} cannot follow {}",
                    next, current
                )));
            }
        }

        if let Some(stage) = update.current_stage {
            self.current_stage = Some(stage);
        }
        if let Some(progress) = update.progress {
            self.progress = self.progress.max(progress);
        }
        self.progress = if target == JobState::Completed {
            100
        } else {
            self.progress.min(99)
        };
        if let Some(message) = update.status_message {
            self.status_message = Some(message);
        }
        if let Some((stage, attempt)) = update.attempt {
            let entry = self.attempts.entry(stage).or_insert(0);
            *entry = (*entry).max(attempt);
        }
        if let Some(output) = update.output {
            self.outputs.record(output);
        }
        if let Some(result) = update.result {
            self.result = Some(result);
        }
        if let Some(error) = update.error {
            self.error = Some(error);
        }

        self.state = target;
        if target.is_terminal() {
            self.current_stage = None;
            self.finished_at = Some(now);
        }
        self.updated_at = now;
        Ok(())
    }

    /// Record a cancellation request.
    pub fn request_cancel(&mut self, now: DateTime<Utc>) -> CancelEffect {
        match self.state {
            JobState::Completed | JobState::Failed => CancelEffect::AlreadyTerminal,
            JobState::Queued => {
                let error = JobError::cancelled(None);
                self.status_message = Some(error.message.clone());
                self.error = Some(error);
                self.state = JobState::Failed;
                self.cancel_requested = true;
                self.finished_at = Some(now);
                self.updated_at = now;
                CancelEffect::Cancelled
            }
            JobState::Running => {
                // Only the first request touches updated_at; it is also the liveness signal.
                if !self.cancel_requested {
                    self.cancel_requested = true;
                    self.status_message = Some("Cancellation requested".to_string());
                    self.updated_at = now;
                }
                CancelEffect::Flagged
            }
        }
    }

    /// Put a job with a silent worker back in the queue, or fail it once
    /// `max_requeues` is spent.
    ///
    /// Recorded stage outputs and progress are kept so the next claim resumes
    /// where the lost worker stopped.
    pub fn recover(&mut self, max_requeues: u32, now: DateTime<Utc>) -> Recovery {
        let lost_stage = self.current_stage;
        self.owner = None;
        self.current_stage = None;
        self.updated_at = now;

        if self.requeue_count >= max_requeues || self.cancel_requested {
            let error = if self.cancel_requested {
                JobError::cancelled(lost_stage)
            } else {
                JobError::new(
                    JobErrorKind::WorkerLost,
                    lost_stage,
                    format!(
                        "Worker stopped responding; gave up after {} requeues",
                        self.requeue_count
                    ),
                )
            };
            self.status_message = Some(error.message.clone());
            self.error = Some(error);
            self.state = JobState::Failed;
            self.finished_at = Some(now);
            return Recovery::Failed;
        }

        self.requeue_count += 1;
        self.state = JobState::Queued;
        self.status_message = Some(format!(
            "Worker lost; requeued ({}/{})",
            self.requeue_count, max_requeues
        ));
        Recovery::Requeued
    }
}
