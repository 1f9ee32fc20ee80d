//! In-process job store for tests and single-node development.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;

use vgen_models::{CancelEffect, JobId, JobRecord, JobState, JobUpdate, Recovery, StaleReason};

use crate::error::QueueResult;
use crate::store::{chrono_duration, JobStore, RecoveryReport, UpdateOutcome};

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, JobRecord>,
    /// Creation sequence per job, used for FIFO claiming
    seq: HashMap<JobId, u64>,
    /// Queued jobs keyed by creation sequence
    queued: BTreeMap<u64, JobId>,
    next_seq: u64,
}

impl Inner {
    fn enqueue(&mut self, id: &JobId) {
        if let Some(seq) = self.seq.get(id) {
            self.queued.insert(*seq, id.clone());
        }
    }

    fn dequeue(&mut self, id: &JobId) {
        if let Some(seq) = self.seq.get(id) {
            self.queued.remove(seq);
        }
    }
}

/// Job store held entirely in memory. Records do not survive a restart.
#[derive(Default)]
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: JobRecord) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.seq.insert(job.id.clone(), seq);
        if job.state == JobState::Queued {
            inner.queued.insert(seq, job.id.clone());
        }
        inner.jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn claim_next(&self, owner: &str) -> QueueResult<Option<JobRecord>> {
        let mut inner = self.inner.lock().await;
        while let Some((_, id)) = inner.queued.pop_first() {
            let Some(job) = inner.jobs.get_mut(&id) else {
                continue;
            };
            if job.claim(owner, Utc::now()).is_ok() {
                debug!(job_id = %id, owner, "Claimed job");
                return Ok(Some(job.clone()));
            }
        }
        Ok(None)
    }

    async fn update(&self, id: &JobId, update: JobUpdate) -> QueueResult<UpdateOutcome> {
        let mut inner = self.inner.lock().await;
        let Some(job) = inner.jobs.get_mut(id) else {
            return Ok(UpdateOutcome::Stale(StaleReason::Missing));
        };

        let mut next = job.clone();
        if let Err(reason) = next.apply(update, Utc::now()) {
            return Ok(UpdateOutcome::Stale(reason));
        }
        *job = next.clone();
        if next.state != JobState::Queued {
            inner.dequeue(id);
        }
        Ok(UpdateOutcome::Applied(next))
    }

    async fn get(&self, id: &JobId) -> QueueResult<Option<JobRecord>> {
        Ok(self.inner.lock().await.jobs.get(id).cloned())
    }

    async fn list_recent(&self, limit: usize) -> QueueResult<Vec<JobRecord>> {
        let inner = self.inner.lock().await;
        let mut ordered: Vec<(&u64, &JobId)> = inner.seq.iter().map(|(id, seq)| (seq, id)).collect();
        ordered.sort_unstable_by(|a, b| b.0.cmp(a.0));
        Ok(ordered
            .into_iter()
            .filter_map(|(_, id)| inner.jobs.get(id).cloned())
            .take(limit)
            .collect())
    }

    async fn request_cancel(&self, id: &JobId) -> QueueResult<Option<CancelEffect>> {
        let mut inner = self.inner.lock().await;
        let Some(job) = inner.jobs.get_mut(id) else {
            return Ok(None);
        };
        let effect = job.request_cancel(Utc::now());
        if effect == CancelEffect::Cancelled {
            inner.dequeue(id);
        }
        Ok(Some(effect))
    }

    async fn recover_stale(
        &self,
        liveness: Duration,
        max_requeues: u32,
    ) -> QueueResult<RecoveryReport> {
        let threshold = chrono_duration(liveness);
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        let mut report = RecoveryReport::default();

        let stale: Vec<JobId> = inner
            .jobs
            .values()
            .filter(|job| job.is_stale(threshold, now))
            .map(|job| job.id.clone())
            .collect();

        for id in stale {
            let Some(job) = inner.jobs.get_mut(&id) else {
                continue;
            };
            match job.recover(max_requeues, now) {
                Recovery::Requeued => {
                    inner.enqueue(&id);
                    report.requeued.push(id);
                }
                Recovery::Failed => report.failed.push(id),
            }
        }

        Ok(report)
    }

    async fn evict_older_than(&self, age: Duration) -> QueueResult<usize> {
        let cutoff = Utc::now() - chrono_duration(age);
        let mut inner = self.inner.lock().await;

        let expired: Vec<JobId> = inner
            .jobs
            .values()
            .filter(|job| job.state.is_terminal() && job.updated_at < cutoff)
            .map(|job| job.id.clone())
            .collect();

        for id in &expired {
            inner.jobs.remove(id);
            if let Some(seq) = inner.seq.remove(id) {
                inner.queued.remove(&seq);
            }
        }
        Ok(expired.len())
    }

    async fn queue_depth(&self) -> QueueResult<u64> {
        Ok(self.inner.lock().await.queued.len() as u64)
    }

    async fn ping(&self) -> QueueResult<()> {
        Ok(())
    }
}
