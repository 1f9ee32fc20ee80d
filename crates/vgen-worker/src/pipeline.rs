//! Pipeline executor.
//!
//! Drives one claimed job through `script → audio → visuals → assembly →
//! publish`. Every write goes through the job store's owner-guarded update,
//! so a run that lost its job (eviction, requeue, external termination) sees a
//! `Stale` outcome and stops without touching the record again.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, warn, Instrument};

use vgen_models::{
    AdapterError, AdapterErrorKind, JobError, JobErrorKind, JobId, JobRecord, JobResult,
    JobUpdate, Stage, StageAdapter, StageInput, StageOutput, StageRequest, StaleReason,
};
use vgen_queue::{JobStore, QueueError, UpdateOutcome};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::retry::{retry_async, FailureTracker, RetryPolicy};

/// Ordered adapter chains, one per stage.
#[derive(Default)]
pub struct Pipeline {
    chains: HashMap<Stage, Vec<Arc<dyn StageAdapter>>>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Adapters for `stage`, in fallback order.
    pub fn chain(&self, stage: Stage) -> &[Arc<dyn StageAdapter>] {
        self.chains.get(&stage).map(Vec::as_slice).unwrap_or(&[])
    }

    /// `stage: a -> b` summary for startup logs.
    pub fn describe(&self) -> String {
        Stage::ALL
            .iter()
            .map(|stage| {
                let names: Vec<&str> = self.chain(*stage).iter().map(|a| a.name()).collect();
                format!("{}: {}", stage, names.join(" -> "))
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Default)]
pub struct PipelineBuilder {
    chains: HashMap<Stage, Vec<Arc<dyn StageAdapter>>>,
}

impl PipelineBuilder {
    /// Append an adapter to the chain of the stage it serves.
    pub fn adapter(mut self, adapter: Arc<dyn StageAdapter>) -> Self {
        self.chains.entry(adapter.stage()).or_default().push(adapter);
        self
    }

    /// Every stage needs at least one adapter.
    pub fn build(self) -> WorkerResult<Pipeline> {
        if let Some(stage) = Stage::ALL
            .iter()
            .find(|s| self.chains.get(s).map_or(true, Vec::is_empty))
        {
            return Err(WorkerError::MissingAdapter(*stage));
        }
        Ok(Pipeline {
            chains: self.chains,
        })
    }
}

/// How a run ended, from the executor's point of view.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(JobResult),
    /// Terminal failure written by this run, cancellation included.
    Failed(JobError),
    /// The record was no longer ours to write; nothing was persisted.
    Abandoned(StaleReason),
}

enum StageRun {
    Done(StageOutput),
    Failed(AdapterError),
    Stale(StaleReason),
}

enum Boundary {
    Continue,
    Cancel,
    Stop(StaleReason),
}

/// Aborts the heartbeat task when the run ends, however it ends.
struct HeartbeatGuard(JoinHandle<()>);

impl Drop for HeartbeatGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Runs claimed jobs through the pipeline.
pub struct PipelineExecutor {
    store: Arc<dyn JobStore>,
    pipeline: Arc<Pipeline>,
    config: Arc<WorkerConfig>,
    store_retry: RetryPolicy,
}

impl PipelineExecutor {
    pub fn new(store: Arc<dyn JobStore>, pipeline: Arc<Pipeline>, config: Arc<WorkerConfig>) -> Self {
        Self {
            store,
            pipeline,
            config,
            store_retry: RetryPolicy::new(3)
                .with_base_delay(Duration::from_millis(200))
                .with_max_delay(Duration::from_secs(2)),
        }
    }

    /// Drive a job claimed by `owner` to a terminal state.
    ///
    /// Store outages surface as `Err`; the job is then left `running` for the
    /// liveness sweep to requeue.
    pub async fn run(&self, job: JobRecord, owner: &str) -> WorkerResult<RunOutcome> {
        let logger = JobLogger::new(&job.id, owner);
        let span = logger.create_span();
        let job_id = job.id.clone();

        let outcome = self.run_inner(job, owner, &logger).instrument(span).await;

        match &outcome {
            Ok(RunOutcome::Completed(_)) => metrics::record_job_completed(),
            Ok(RunOutcome::Failed(error)) => metrics::record_job_failed(error.kind),
            Ok(RunOutcome::Abandoned(reason)) => {
                logger.log_warning(&format!("run abandoned: {:?}", reason));
            }
            Err(_) => {}
        }

        let finished = matches!(
            outcome,
            Ok(RunOutcome::Completed(_)) | Ok(RunOutcome::Failed(_))
        );
        if finished {
            if let Err(e) = vgen_media::remove_workspace(&self.config.work_dir, &job_id).await {
                logger.log_warning(&format!("failed to remove workspace: {}", e));
            }
        }

        outcome
    }

    async fn run_inner(
        &self,
        mut job: JobRecord,
        owner: &str,
        logger: &JobLogger,
    ) -> WorkerResult<RunOutcome> {
        logger.log_start(&format!("topic '{}'", job.input.topic));
        let _heartbeat = self.start_heartbeat(job.id.clone(), owner.to_string());

        let mut published = None;
        for stage in Stage::ALL {
            match self.check_boundary(&job.id, owner).await? {
                Boundary::Continue => {}
                Boundary::Cancel => return self.cancel(&job.id, owner, Some(stage), logger).await,
                Boundary::Stop(reason) => return Ok(RunOutcome::Abandoned(reason)),
            }

            if job.outputs.contains(stage) {
                logger.log_stage_skipped(stage);
                continue;
            }

            let output = match self.run_stage(&job, stage, owner, logger).await? {
                StageRun::Done(output) => output,
                StageRun::Stale(reason) => return Ok(RunOutcome::Abandoned(reason)),
                StageRun::Failed(err) => {
                    let error = JobError::new(JobErrorKind::FatalAdapterError, Some(stage), err.message);
                    logger.log_error(&format!("{} stage failed: {}", stage, error.message));
                    return self.fail(&job.id, owner, error).await;
                }
            };

            // The last stage's output goes straight into the terminal write.
            if stage.is_last() {
                published = Some(output);
                break;
            }

            let (_, band_end) = stage.progress_band();
            let update = JobUpdate::guarded(owner)
                .stage(stage)
                .progress(band_end)
                .message(output.summary())
                .output(output);
            match self.write(&job.id, update).await? {
                UpdateOutcome::Applied(record) => job = record,
                UpdateOutcome::Stale(reason) => return Ok(RunOutcome::Abandoned(reason)),
            }
        }

        match self.check_boundary(&job.id, owner).await? {
            Boundary::Continue => {}
            Boundary::Cancel => return self.cancel(&job.id, owner, Some(Stage::Publish), logger).await,
            Boundary::Stop(reason) => return Ok(RunOutcome::Abandoned(reason)),
        }

        let artifact_uri = match published {
            Some(StageOutput::Publish(output)) => output.artifact_uri,
            _ => {
                let error = JobError::new(
                    JobErrorKind::Internal,
                    Some(Stage::Publish),
                    "pipeline finished without a published artifact",
                );
                return self.fail(&job.id, owner, error).await;
            }
        };

        let result = JobResult {
            artifact_uri,
            duration_seconds: job.outputs.assembly.as_ref().map(|a| a.duration_seconds),
            size_bytes: job.outputs.assembly.as_ref().map(|a| a.size_bytes),
        };

        match self
            .write(&job.id, JobUpdate::complete(owner, result.clone()))
            .await?
        {
            UpdateOutcome::Applied(_) => {
                logger.log_completion(&result.artifact_uri);
                Ok(RunOutcome::Completed(result))
            }
            UpdateOutcome::Stale(reason) => Ok(RunOutcome::Abandoned(reason)),
        }
    }

    /// Run one stage with retries, persisting each attempt before it starts.
    async fn run_stage(
        &self,
        job: &JobRecord,
        stage: Stage,
        owner: &str,
        logger: &JobLogger,
    ) -> WorkerResult<StageRun> {
        let input = match StageInput::build(stage, &job.input, &job.outputs) {
            Ok(input) => input,
            Err(err) => return Ok(StageRun::Failed(err)),
        };
        let request = StageRequest {
            job_id: job.id.clone(),
            input,
        };

        let policy = &self.config.retry;
        let prior_attempts = job.attempts_for(stage);
        let (band_start, _) = stage.progress_band();
        let started = Instant::now();
        let mut excluded = HashSet::new();
        let mut attempt = 1;

        loop {
            let message = if attempt == 1 {
                stage.activity().to_string()
            } else {
                format!("{} (attempt {}/{})", stage.activity(), attempt, policy.max_attempts)
            };
            let update = JobUpdate::guarded(owner)
                .stage(stage)
                .progress(band_start)
                .message(message)
                .attempt(stage, prior_attempts + attempt);
            if let UpdateOutcome::Stale(reason) = self.write(&job.id, update).await? {
                return Ok(StageRun::Stale(reason));
            }
            logger.log_stage_start(stage, attempt, policy.max_attempts);

            let err = match self.attempt_chain(stage, &request, &mut excluded, logger).await {
                Ok((output, adapter)) => {
                    let elapsed = started.elapsed();
                    metrics::record_stage_duration(stage, elapsed.as_secs_f64());
                    logger.log_stage_complete(stage, &adapter, elapsed);
                    return Ok(StageRun::Done(output));
                }
                Err(err) => err,
            };

            if !err.is_transient() || !policy.has_attempts_left(attempt) {
                return Ok(StageRun::Failed(err));
            }

            let delay = policy.delay_after(attempt);
            metrics::record_stage_retry(stage);
            logger.log_retry(stage, attempt, delay);

            let update = JobUpdate::guarded(owner).message(format!(
                "Retrying {} after transient error (attempt {}/{})",
                stage,
                attempt + 1,
                policy.max_attempts
            ));
            if let UpdateOutcome::Stale(reason) = self.write(&job.id, update).await? {
                return Ok(StageRun::Stale(reason));
            }

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Try the stage's adapters in order.
    ///
    /// The attempt fails transiently if any adapter failed transiently.
    /// Adapters that fail fatally are added to `excluded` and not tried again.
    async fn attempt_chain(
        &self,
        stage: Stage,
        request: &StageRequest,
        excluded: &mut HashSet<usize>,
        logger: &JobLogger,
    ) -> Result<(StageOutput, String), AdapterError> {
        let timeout = self.config.stage_timeout(stage);
        let mut last_transient = None;
        let mut last_fatal = None;

        for (index, adapter) in self.pipeline.chain(stage).iter().enumerate() {
            if excluded.contains(&index) {
                continue;
            }

            let result = match tokio::time::timeout(timeout, adapter.execute(request)).await {
                Ok(Ok(output)) if output.stage() == stage => Ok(output),
                Ok(Ok(output)) => Err(AdapterError::fatal(
                    AdapterErrorKind::for_stage(stage),
                    format!("{} returned {} output", adapter.name(), output.stage()),
                )),
                Ok(Err(err)) => Err(err),
                Err(_) => Err(AdapterError::timeout(stage, timeout)),
            };

            match result {
                Ok(output) => return Ok((output, adapter.name().to_string())),
                Err(err) => {
                    logger.log_adapter_failure(stage, adapter.name(), &err);
                    metrics::record_adapter_failure(adapter.name(), err.is_transient());
                    if err.is_transient() {
                        last_transient = Some(err);
                    } else {
                        excluded.insert(index);
                        last_fatal = Some(err);
                    }
                }
            }
        }

        Err(last_transient.or(last_fatal).unwrap_or_else(|| {
            AdapterError::fatal(
                AdapterErrorKind::for_stage(stage),
                format!("no usable adapter left for the {} stage", stage),
            )
        }))
    }

    /// Cooperative cancellation and ownership check between stages.
    async fn check_boundary(&self, id: &JobId, owner: &str) -> WorkerResult<Boundary> {
        let store = &self.store;
        let record = retry_async(&self.store_retry, "job_read", QueueError::is_unavailable, move || {
            store.get(id)
        })
        .await?;

        Ok(match record {
            None => Boundary::Stop(StaleReason::Missing),
            Some(job) if job.state.is_terminal() => Boundary::Stop(StaleReason::Terminal),
            Some(job) if job.owner.as_deref() != Some(owner) => Boundary::Stop(StaleReason::NotOwner),
            Some(job) if job.cancel_requested => Boundary::Cancel,
            Some(_) => Boundary::Continue,
        })
    }

    async fn cancel(
        &self,
        id: &JobId,
        owner: &str,
        stage: Option<Stage>,
        logger: &JobLogger,
    ) -> WorkerResult<RunOutcome> {
        logger.log_warning("cancellation requested, stopping at stage boundary");
        self.fail(id, owner, JobError::cancelled(stage)).await
    }

    async fn fail(&self, id: &JobId, owner: &str, error: JobError) -> WorkerResult<RunOutcome> {
        match self
            .write(id, JobUpdate::fail(Some(owner.to_string()), error.clone()))
            .await?
        {
            UpdateOutcome::Applied(_) => Ok(RunOutcome::Failed(error)),
            UpdateOutcome::Stale(reason) => Ok(RunOutcome::Abandoned(reason)),
        }
    }

    async fn write(&self, id: &JobId, update: JobUpdate) -> WorkerResult<UpdateOutcome> {
        let store = &self.store;
        let update = &update;
        let outcome = retry_async(&self.store_retry, "job_update", QueueError::is_unavailable, move || {
            store.update(id, update.clone())
        })
        .await?;
        Ok(outcome)
    }

    fn start_heartbeat(&self, id: JobId, owner: String) -> HeartbeatGuard {
        let store = Arc::clone(&self.store);
        let every = self.config.job_heartbeat_interval;

        HeartbeatGuard(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            let mut failures = FailureTracker::new(3);

            loop {
                ticker.tick().await;
                match store.update(&id, JobUpdate::heartbeat(owner.clone())).await {
                    Ok(UpdateOutcome::Applied(_)) => failures.record_success(),
                    Ok(UpdateOutcome::Stale(reason)) => {
                        debug!(job_id = %id, ?reason, "Heartbeat stopped");
                        break;
                    }
                    Err(e) => {
                        if failures.record_failure() {
                            warn!(job_id = %id, "Heartbeat failed: {}", e);
                        }
                    }
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_config, FakeAdapter, StoreHook};
    use vgen_models::{FailureClass, GenerationRequest, JobState};
    use vgen_queue::MemoryJobStore;

    struct Harness {
        store: Arc<MemoryJobStore>,
        _work: tempfile::TempDir,
        config: Arc<WorkerConfig>,
    }

    impl Harness {
        fn new() -> Self {
            let work = tempfile::tempdir().unwrap();
            let config = Arc::new(test_config(work.path()));
            Self {
                store: Arc::new(MemoryJobStore::new()),
                _work: work,
                config,
            }
        }

        fn executor(&self, pipeline: Pipeline) -> PipelineExecutor {
            PipelineExecutor::new(self.store.clone(), Arc::new(pipeline), self.config.clone())
        }

        async fn claimed_job(&self) -> JobRecord {
            let job = JobRecord::new(GenerationRequest::new("How disc brakes work"));
            self.store.create(job).await.unwrap();
            self.store.claim_next("worker-test").await.unwrap().unwrap()
        }

        async fn get(&self, id: &JobId) -> JobRecord {
            self.store.get(id).await.unwrap().unwrap()
        }
    }

    fn pipeline_with(overrides: Vec<Arc<FakeAdapter>>) -> (Pipeline, HashMap<Stage, Arc<FakeAdapter>>) {
        let mut adapters: HashMap<Stage, Arc<FakeAdapter>> = HashMap::new();
        for adapter in overrides {
            adapters.insert(adapter.stage(), adapter);
        }
        let mut builder = Pipeline::builder();
        for stage in Stage::ALL {
            let adapter = adapters
                .entry(stage)
                .or_insert_with(|| Arc::new(FakeAdapter::ok(stage)))
                .clone();
            builder = builder.adapter(adapter);
        }
        (builder.build().unwrap(), adapters)
    }

    #[test]
    fn test_builder_requires_every_stage() {
        let result = Pipeline::builder()
            .adapter(Arc::new(FakeAdapter::ok(Stage::Script)))
            .build();
        assert!(matches!(result, Err(WorkerError::MissingAdapter(Stage::Audio))));
    }

    #[tokio::test]
    async fn test_all_stages_succeed() {
        let h = Harness::new();
        let (pipeline, adapters) = pipeline_with(vec![]);
        let job = h.claimed_job().await;

        let outcome = h.executor(pipeline).run(job.clone(), "worker-test").await.unwrap();

        let RunOutcome::Completed(result) = outcome else {
            panic!("expected completion, got {:?}", outcome);
        };
        let stored = h.get(&job.id).await;
        assert_eq!(stored.state, JobState::Completed);
        assert_eq!(stored.progress, 100);
        assert_eq!(stored.result.as_ref(), Some(&result));
        assert!(!result.artifact_uri.is_empty());
        assert_eq!(result.size_bytes, Some(4096));
        assert!(stored.error.is_none());
        for stage in Stage::ALL {
            assert_eq!(stored.attempts_for(stage), 1, "{}", stage);
            assert_eq!(adapters[&stage].calls(), 1);
        }
    }

    #[tokio::test]
    async fn test_transient_audio_failures_are_retried() {
        let h = Harness::new();
        let audio = Arc::new(FakeAdapter::ok(Stage::Audio).failing_first(2, FailureClass::Transient));
        let (pipeline, _) = pipeline_with(vec![audio.clone()]);
        let job = h.claimed_job().await;

        let outcome = h.executor(pipeline).run(job.clone(), "worker-test").await.unwrap();

        assert!(matches!(outcome, RunOutcome::Completed(_)));
        let stored = h.get(&job.id).await;
        assert_eq!(stored.state, JobState::Completed);
        assert_eq!(stored.attempts_for(Stage::Audio), 3);
        assert_eq!(stored.attempts_for(Stage::Script), 1);
        assert_eq!(audio.calls(), 3);
    }

    #[tokio::test]
    async fn test_transient_failures_escalate_after_max_attempts() {
        let h = Harness::new();
        let audio = Arc::new(FakeAdapter::ok(Stage::Audio).failing_first(10, FailureClass::Transient));
        let (pipeline, adapters) = pipeline_with(vec![audio.clone()]);
        let job = h.claimed_job().await;

        let outcome = h.executor(pipeline).run(job.clone(), "worker-test").await.unwrap();

        let RunOutcome::Failed(error) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(error.kind, JobErrorKind::FatalAdapterError);
        assert_eq!(error.stage, Some(Stage::Audio));
        assert_eq!(audio.calls(), 3);
        assert_eq!(adapters[&Stage::Visuals].calls(), 0);
        assert_eq!(h.get(&job.id).await.attempts_for(Stage::Audio), 3);
    }

    #[tokio::test]
    async fn test_fatal_visuals_error_fails_job() {
        let h = Harness::new();
        let visuals = Arc::new(FakeAdapter::ok(Stage::Visuals).failing_first(1, FailureClass::Fatal));
        let (pipeline, adapters) = pipeline_with(vec![visuals.clone()]);
        let job = h.claimed_job().await;

        h.executor(pipeline).run(job.clone(), "worker-test").await.unwrap();

        let stored = h.get(&job.id).await;
        assert_eq!(stored.state, JobState::Failed);
        let error = stored.error.expect("error recorded");
        assert_eq!(error.kind, JobErrorKind::FatalAdapterError);
        assert_eq!(error.stage, Some(Stage::Visuals));
        assert!(stored.result.is_none());
        assert!(stored.progress < 60);
        assert_eq!(visuals.calls(), 1);
        assert_eq!(adapters[&Stage::Assembly].calls(), 0);
        assert_eq!(adapters[&Stage::Publish].calls(), 0);
    }

    #[tokio::test]
    async fn test_fallback_adapter_serves_same_attempt() {
        let h = Harness::new();
        let premium = Arc::new(
            FakeAdapter::ok(Stage::Audio)
                .named("premium")
                .failing_first(10, FailureClass::Transient),
        );
        let free = Arc::new(FakeAdapter::ok(Stage::Audio).named("free"));
        let (_, adapters) = pipeline_with(vec![]);
        let mut builder = Pipeline::builder()
            .adapter(premium.clone())
            .adapter(free.clone());
        for stage in [Stage::Script, Stage::Visuals, Stage::Assembly, Stage::Publish] {
            builder = builder.adapter(adapters[&stage].clone());
        }
        let job = h.claimed_job().await;

        let outcome = h.executor(builder.build().unwrap()).run(job.clone(), "worker-test").await.unwrap();

        assert!(matches!(outcome, RunOutcome::Completed(_)));
        assert_eq!(premium.calls(), 1);
        assert_eq!(free.calls(), 1);
        assert_eq!(h.get(&job.id).await.attempts_for(Stage::Audio), 1);
    }

    #[tokio::test]
    async fn test_fatally_failed_adapter_is_skipped_on_retry() {
        let h = Harness::new();
        let premium = Arc::new(
            FakeAdapter::ok(Stage::Audio)
                .named("premium")
                .failing_first(10, FailureClass::Fatal),
        );
        let free = Arc::new(
            FakeAdapter::ok(Stage::Audio)
                .named("free")
                .failing_first(1, FailureClass::Transient),
        );
        let (_, adapters) = pipeline_with(vec![]);
        let mut builder = Pipeline::builder()
            .adapter(premium.clone())
            .adapter(free.clone());
        for stage in [Stage::Script, Stage::Visuals, Stage::Assembly, Stage::Publish] {
            builder = builder.adapter(adapters[&stage].clone());
        }
        let job = h.claimed_job().await;

        let outcome = h.executor(builder.build().unwrap()).run(job.clone(), "worker-test").await.unwrap();

        assert!(matches!(outcome, RunOutcome::Completed(_)));
        assert_eq!(premium.calls(), 1);
        assert_eq!(free.calls(), 2);
        assert_eq!(h.get(&job.id).await.attempts_for(Stage::Audio), 2);
    }

    #[tokio::test]
    async fn test_stage_timeout_is_transient() {
        let h = Harness::new();
        let script = Arc::new(FakeAdapter::ok(Stage::Script).slow_first(1, Duration::from_secs(5)));
        let (pipeline, _) = pipeline_with(vec![script.clone()]);
        let job = h.claimed_job().await;

        let outcome = h.executor(pipeline).run(job.clone(), "worker-test").await.unwrap();

        assert!(matches!(outcome, RunOutcome::Completed(_)));
        assert_eq!(script.calls(), 2);
        assert_eq!(h.get(&job.id).await.attempts_for(Stage::Script), 2);
    }

    #[tokio::test]
    async fn test_cancel_lands_at_next_stage_boundary() {
        let h = Harness::new();
        let audio = Arc::new(FakeAdapter::ok(Stage::Audio).with_hook(StoreHook::Cancel(h.store.clone())));
        let (pipeline, adapters) = pipeline_with(vec![audio.clone()]);
        let job = h.claimed_job().await;

        let outcome = h.executor(pipeline).run(job.clone(), "worker-test").await.unwrap();

        let RunOutcome::Failed(error) = outcome else {
            panic!("expected cancellation");
        };
        assert_eq!(error.kind, JobErrorKind::Cancelled);
        assert_eq!(error.stage, Some(Stage::Visuals));

        let stored = h.get(&job.id).await;
        assert_eq!(stored.state, JobState::Failed);
        assert!(stored.result.is_none());
        // The in-flight audio call finished and its output was kept.
        assert!(stored.outputs.audio.is_some());
        assert_eq!(adapters[&Stage::Visuals].calls(), 0);
    }

    #[tokio::test]
    async fn test_cancel_checked_before_terminal_write() {
        let h = Harness::new();
        let publish = Arc::new(FakeAdapter::ok(Stage::Publish).with_hook(StoreHook::Cancel(h.store.clone())));
        let (pipeline, _) = pipeline_with(vec![publish]);
        let job = h.claimed_job().await;

        h.executor(pipeline).run(job.clone(), "worker-test").await.unwrap();

        let stored = h.get(&job.id).await;
        assert_eq!(stored.state, JobState::Failed);
        assert_eq!(stored.error.unwrap().kind, JobErrorKind::Cancelled);
        assert!(stored.result.is_none());
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_follows_bands() {
        let h = Harness::new();
        let probes: Vec<Arc<FakeAdapter>> = Stage::ALL
            .iter()
            .map(|s| Arc::new(FakeAdapter::ok(*s).with_hook(StoreHook::Observe(h.store.clone()))))
            .collect();
        let (pipeline, _) = pipeline_with(probes.clone());
        let job = h.claimed_job().await;

        h.executor(pipeline).run(job.clone(), "worker-test").await.unwrap();

        let mut seen = Vec::new();
        for probe in &probes {
            let observed = probe.observed();
            let (progress, stage) = observed[0];
            assert_eq!(progress, probe.stage().progress_band().0);
            assert_eq!(stage, Some(probe.stage()));
            seen.push(progress);
        }
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{:?}", seen);
        assert_eq!(h.get(&job.id).await.progress, 100);
    }

    #[tokio::test]
    async fn test_resumed_job_skips_recorded_stages() {
        let h = Harness::new();
        let (pipeline, adapters) = pipeline_with(vec![]);
        let job = h.claimed_job().await;
        let script_output = adapters[&Stage::Script].output();
        h.store
            .update(
                &job.id,
                JobUpdate::guarded("worker-test")
                    .stage(Stage::Script)
                    .progress(20)
                    .output(script_output),
            )
            .await
            .unwrap();
        let job = h.get(&job.id).await;

        let outcome = h.executor(pipeline).run(job.clone(), "worker-test").await.unwrap();

        assert!(matches!(outcome, RunOutcome::Completed(_)));
        assert_eq!(adapters[&Stage::Script].calls(), 0);
        assert_eq!(adapters[&Stage::Audio].calls(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_quietly_when_job_terminated_externally() {
        let h = Harness::new();
        let audio = Arc::new(FakeAdapter::ok(Stage::Audio).with_hook(StoreHook::Terminate(h.store.clone())));
        let (pipeline, adapters) = pipeline_with(vec![audio]);
        let job = h.claimed_job().await;

        let outcome = h.executor(pipeline).run(job.clone(), "worker-test").await.unwrap();

        assert_eq!(outcome, RunOutcome::Abandoned(StaleReason::Terminal));
        let stored = h.get(&job.id).await;
        assert_eq!(stored.error.unwrap().kind, JobErrorKind::Internal);
        assert_eq!(adapters[&Stage::Visuals].calls(), 0);
    }

    #[tokio::test]
    async fn test_heartbeat_refreshes_updated_at() {
        let h = Harness::new();
        let slow_audio = Arc::new(FakeAdapter::ok(Stage::Audio).delayed(Duration::from_millis(120)));
        let (pipeline, _) = pipeline_with(vec![slow_audio]);
        let job = h.claimed_job().await;
        let executor = h.executor(pipeline);

        let store = h.store.clone();
        let id = job.id.clone();
        let watcher = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            let first = store.get(&id).await.unwrap().unwrap().updated_at;
            tokio::time::sleep(Duration::from_millis(60)).await;
            let second = store.get(&id).await.unwrap().unwrap().updated_at;
            (first, second)
        });

        executor.run(job, "worker-test").await.unwrap();
        let (first, second) = watcher.await.unwrap();
        assert!(second > first, "heartbeat did not refresh updated_at");
    }
}
