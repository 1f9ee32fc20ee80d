//! Background liveness sweep.
//!
//! This service runs periodically to:
//! - Requeue running jobs whose worker stopped sending heartbeats
//! - Fail jobs that were requeued too many times (`WorkerLost`)
//! - Evict terminal records past the retention TTL

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::interval;
use tracing::{error, info, warn};

use vgen_queue::JobQueue;

use crate::config::WorkerConfig;
use crate::metrics;
use crate::retry::FailureTracker;

/// Counts from one sweep cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub requeued: usize,
    pub failed: usize,
    pub evicted: usize,
}

/// Liveness sweep service.
pub struct LivenessSweep {
    queue: JobQueue,
    every: Duration,
    liveness: Duration,
    max_requeues: u32,
    ttl: Duration,
}

impl LivenessSweep {
    pub fn new(queue: JobQueue, config: &WorkerConfig) -> Self {
        Self {
            queue,
            every: config.sweep_interval,
            liveness: config.liveness_threshold,
            max_requeues: config.max_requeues,
            ttl: config.job_ttl,
        }
    }

    /// Run until `shutdown` flips to `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting liveness sweep (interval: {:?}, liveness: {:?}, ttl: {:?})",
            self.every, self.liveness, self.ttl
        );

        let mut ticker = interval(self.every);
        let mut failures = FailureTracker::new(3);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(_) => failures.record_success(),
                        Err(e) => {
                            if failures.record_failure() {
                                error!("Liveness sweep error: {:#}", e);
                            }
                        }
                    }
                }
            }
        }

        info!("Liveness sweep stopped");
    }

    /// Run a single recovery and eviction cycle.
    pub async fn run_once(&self) -> anyhow::Result<SweepReport> {
        let store = self.queue.store();

        let recovered = store.recover_stale(self.liveness, self.max_requeues).await?;
        for id in &recovered.requeued {
            warn!(job_id = %id, "Requeued job whose worker went silent");
        }
        for id in &recovered.failed {
            warn!(job_id = %id, "Gave up on job after repeated worker loss");
        }
        if !recovered.requeued.is_empty() {
            self.queue.notify_work();
        }

        let evicted = store.evict_older_than(self.ttl).await?;
        if evicted > 0 {
            info!(evicted, "Evicted expired job records");
        }

        metrics::set_queue_length(store.queue_depth().await?);

        let report = SweepReport {
            requeued: recovered.requeued.len(),
            failed: recovered.failed.len(),
            evicted,
        };
        metrics::record_sweep(report.requeued, report.failed, report.evicted);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_config;
    use vgen_models::{GenerationRequest, JobErrorKind, JobState};

    #[tokio::test]
    async fn test_silent_job_is_requeued_then_failed() {
        let work = tempfile::tempdir().unwrap();
        let mut config = test_config(work.path());
        config.liveness_threshold = Duration::from_millis(20);
        config.max_requeues = 1;

        let queue = JobQueue::in_memory();
        let sweep = LivenessSweep::new(queue.clone(), &config);
        let job = queue.submit(GenerationRequest::new("How gearboxes shift")).await.unwrap();

        queue.store().claim_next("crashed-worker").await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let report = sweep.run_once().await.unwrap();
        assert_eq!(report.requeued, 1);
        let requeued = queue.status(&job.id).await.unwrap();
        assert_eq!(requeued.state, JobState::Queued);
        assert_eq!(requeued.requeue_count, 1);
        assert!(requeued.owner.is_none());

        queue.store().claim_next("crashed-again").await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let report = sweep.run_once().await.unwrap();
        assert_eq!(report.failed, 1);
        let lost = queue.status(&job.id).await.unwrap();
        assert_eq!(lost.state, JobState::Failed);
        assert_eq!(lost.error.unwrap().kind, JobErrorKind::WorkerLost);
    }

    #[tokio::test]
    async fn test_fresh_running_job_is_left_alone() {
        let work = tempfile::tempdir().unwrap();
        let mut config = test_config(work.path());
        config.liveness_threshold = Duration::from_secs(60);

        let queue = JobQueue::in_memory();
        let sweep = LivenessSweep::new(queue.clone(), &config);
        let job = queue.submit(GenerationRequest::new("How gearboxes shift")).await.unwrap();
        queue.store().claim_next("busy-worker").await.unwrap().unwrap();

        assert_eq!(sweep.run_once().await.unwrap(), SweepReport::default());
        assert_eq!(queue.status(&job.id).await.unwrap().state, JobState::Running);
    }

    #[tokio::test]
    async fn test_expired_terminal_records_are_evicted() {
        let work = tempfile::tempdir().unwrap();
        let mut config = test_config(work.path());
        config.job_ttl = Duration::from_millis(10);

        let queue = JobQueue::in_memory();
        let sweep = LivenessSweep::new(queue.clone(), &config);
        let done = queue.submit(GenerationRequest::new("Why tires squeal")).await.unwrap();
        let waiting = queue.submit(GenerationRequest::new("Why rotors warp")).await.unwrap();
        queue.cancel(&done.id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let report = sweep.run_once().await.unwrap();
        assert_eq!(report.evicted, 1);
        assert!(queue.status(&done.id).await.is_err());
        assert_eq!(queue.status(&waiting.id).await.unwrap().state, JobState::Queued);
    }
}
