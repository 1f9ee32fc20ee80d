//! Worker pool.
//!
//! A fixed number of worker loops claim queued jobs and hand each one to the
//! [`PipelineExecutor`] in its own task, so a panicking run is recorded as an
//! `Internal` failure instead of taking the loop down.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use vgen_models::{JobError, JobErrorKind, JobRecord, JobUpdate};
use vgen_queue::JobQueue;

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::metrics;
use crate::pipeline::{Pipeline, PipelineExecutor, RunOutcome};

/// Claims jobs from the queue and runs them with bounded concurrency.
pub struct Dispatcher {
    config: Arc<WorkerConfig>,
    queue: JobQueue,
    executor: Arc<PipelineExecutor>,
    shutdown: watch::Sender<bool>,
    worker_name: String,
    running: Arc<AtomicUsize>,
}

impl Dispatcher {
    pub fn new(config: WorkerConfig, queue: JobQueue, pipeline: Pipeline) -> Self {
        let config = Arc::new(config);
        let executor = Arc::new(PipelineExecutor::new(
            Arc::clone(queue.store()),
            Arc::new(pipeline),
            Arc::clone(&config),
        ));
        let (shutdown, _) = watch::channel(false);
        let worker_name = format!("worker-{}", &Uuid::new_v4().simple().to_string()[..8]);

        Self {
            config,
            queue,
            executor,
            shutdown,
            worker_name,
            running: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn worker_name(&self) -> &str {
        &self.worker_name
    }

    /// Receiver that flips to `true` once shutdown is requested.
    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Run the pool until shutdown, then wait for in-flight jobs.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting dispatcher '{}' with {} worker loops",
            self.worker_name, self.config.max_concurrent_jobs
        );

        let mut loops = Vec::with_capacity(self.config.max_concurrent_jobs);
        for index in 0..self.config.max_concurrent_jobs {
            let worker = WorkerLoop {
                owner: format!("{}-{}", self.worker_name, index),
                queue: self.queue.clone(),
                executor: Arc::clone(&self.executor),
                poll_interval: self.config.poll_interval,
                running: Arc::clone(&self.running),
            };
            loops.push(tokio::spawn(worker.run(self.shutdown.subscribe())));
        }

        let mut shutdown_rx = self.shutdown.subscribe();
        while !*shutdown_rx.borrow() {
            if shutdown_rx.changed().await.is_err() {
                break;
            }
        }

        info!("Waiting for in-flight jobs to complete...");
        let drained = tokio::time::timeout(self.config.shutdown_timeout, async {
            for handle in loops.iter_mut() {
                let _ = handle.await;
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "Shutdown timeout elapsed with {} jobs still running; the liveness sweep will requeue them",
                self.running.load(Ordering::SeqCst)
            );
            for handle in &loops {
                handle.abort();
            }
        }

        info!("Dispatcher stopped");
        Ok(())
    }
}

struct WorkerLoop {
    owner: String,
    queue: JobQueue,
    executor: Arc<PipelineExecutor>,
    poll_interval: Duration,
    running: Arc<AtomicUsize>,
}

impl WorkerLoop {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.queue.store().claim_next(&self.owner).await {
                Ok(Some(job)) => self.execute(job).await,
                Ok(None) => {
                    tokio::select! {
                        _ = shutdown.changed() => {}
                        _ = self.queue.wait_for_work(self.poll_interval) => {}
                    }
                }
                Err(e) => {
                    warn!(worker = %self.owner, "Failed to claim job: {}", e);
                    tokio::select! {
                        _ = shutdown.changed() => {}
                        _ = tokio::time::sleep(self.poll_interval.max(Duration::from_secs(1))) => {}
                    }
                }
            }
        }
    }

    async fn execute(&self, job: JobRecord) {
        let job_id = job.id.clone();
        metrics::record_job_claimed();
        metrics::set_jobs_running(self.running.fetch_add(1, Ordering::SeqCst) + 1);
        info!(job_id = %job_id, worker = %self.owner, "Claimed job");

        let executor = Arc::clone(&self.executor);
        let owner = self.owner.clone();
        let handle = tokio::spawn(async move { executor.run(job, &owner).await });

        let internal = match handle.await {
            Ok(Ok(RunOutcome::Completed(result))) => {
                info!(job_id = %job_id, uri = %result.artifact_uri, "Job completed");
                None
            }
            Ok(Ok(RunOutcome::Failed(err))) => {
                info!(job_id = %job_id, kind = %err.kind, "Job failed: {}", err.message);
                None
            }
            Ok(Ok(RunOutcome::Abandoned(_))) => None,
            Ok(Err(e)) if e.is_retryable() => {
                warn!(job_id = %job_id, "Job store unavailable, leaving job for the liveness sweep: {}", e);
                None
            }
            Ok(Err(e)) => Some(e.to_string()),
            Err(join) if join.is_panic() => Some("worker task panicked".to_string()),
            Err(_) => Some("worker task was cancelled".to_string()),
        };

        if let Some(message) = internal {
            error!(job_id = %job_id, "Job crashed: {}", message);
            let error = JobError::new(JobErrorKind::Internal, None, message);
            match self
                .queue
                .store()
                .update(&job_id, JobUpdate::fail(Some(self.owner.clone()), error))
                .await
            {
                Ok(outcome) if outcome.is_applied() => {
                    metrics::record_job_failed(JobErrorKind::Internal)
                }
                Ok(_) => {}
                Err(e) => error!(job_id = %job_id, "Failed to record crash: {}", e),
            }
        }

        metrics::set_jobs_running(self.running.fetch_sub(1, Ordering::SeqCst) - 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_config, FakeAdapter, StoreHook};
    use vgen_models::{GenerationRequest, JobId, JobState, Stage};

    fn pipeline(overrides: Vec<FakeAdapter>) -> Pipeline {
        let mut builder = Pipeline::builder();
        let mut overrides = overrides;
        for stage in Stage::ALL {
            let adapter = match overrides.iter().position(|a| vgen_models::StageAdapter::stage(a) == stage) {
                Some(i) => overrides.remove(i),
                None => FakeAdapter::ok(stage),
            };
            builder = builder.adapter(Arc::new(adapter));
        }
        builder.build().unwrap()
    }

    async fn wait_terminal(queue: &JobQueue, id: &JobId) -> JobRecord {
        for _ in 0..500 {
            let job = queue.status(id).await.unwrap();
            if job.state.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never reached a terminal state", id);
    }

    #[tokio::test]
    async fn test_pool_of_one_runs_jobs_in_order() {
        let work = tempfile::tempdir().unwrap();
        let queue = JobQueue::in_memory();
        let slow_visuals = FakeAdapter::ok(Stage::Visuals).delayed(Duration::from_millis(80));
        let dispatcher = Arc::new(Dispatcher::new(
            test_config(work.path()),
            queue.clone(),
            pipeline(vec![slow_visuals]),
        ));

        let first = queue.submit(GenerationRequest::new("How turbochargers work")).await.unwrap();
        let second = queue.submit(GenerationRequest::new("How ABS works")).await.unwrap();

        let runner = {
            let d = Arc::clone(&dispatcher);
            tokio::spawn(async move { d.run().await })
        };

        // While the first job runs, the second stays queued.
        for _ in 0..100 {
            if queue.status(&first.id).await.unwrap().state == JobState::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(queue.status(&second.id).await.unwrap().state, JobState::Queued);

        let first_done = wait_terminal(&queue, &first.id).await;
        let second_done = wait_terminal(&queue, &second.id).await;
        assert_eq!(first_done.state, JobState::Completed);
        assert_eq!(second_done.state, JobState::Completed);
        assert!(second_done.started_at.unwrap() >= first_done.finished_at.unwrap());

        dispatcher.shutdown();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_loop_survives_panic_and_serves_next_job() {
        let work = tempfile::tempdir().unwrap();
        let queue = JobQueue::in_memory();
        let audio = FakeAdapter::ok(Stage::Audio).with_hook(StoreHook::Panic);
        let dispatcher = Arc::new(Dispatcher::new(
            test_config(work.path()),
            queue.clone(),
            pipeline(vec![audio]),
        ));

        let first = queue.submit(GenerationRequest::new("Why engines knock")).await.unwrap();
        let second = queue.submit(GenerationRequest::new("How clutches slip")).await.unwrap();

        let runner = {
            let d = Arc::clone(&dispatcher);
            tokio::spawn(async move { d.run().await })
        };

        let crashed = wait_terminal(&queue, &first.id).await;
        assert_eq!(crashed.state, JobState::Failed);
        assert_eq!(crashed.error.unwrap().kind, JobErrorKind::Internal);
        assert!(crashed.result.is_none());
        assert_eq!(wait_terminal(&queue, &second.id).await.state, JobState::Completed);

        dispatcher.shutdown();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_with_idle_pool_returns_promptly() {
        let work = tempfile::tempdir().unwrap();
        let dispatcher = Arc::new(Dispatcher::new(
            test_config(work.path()),
            JobQueue::in_memory(),
            pipeline(vec![]),
        ));

        let runner = {
            let d = Arc::clone(&dispatcher);
            tokio::spawn(async move { d.run().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        dispatcher.shutdown();

        tokio::time::timeout(Duration::from_secs(1), runner)
            .await
            .expect("dispatcher did not stop")
            .unwrap()
            .unwrap();
    }
}
