//! Scripted stage adapters and config for executor and dispatcher tests.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use vgen_models::{
    AdapterError, AdapterErrorKind, AdapterResult, AssemblyOutput, AudioOutput, FailureClass,
    JobError, JobErrorKind, JobUpdate, PublishOutput, Scene, ScriptOutput, Stage, StageAdapter,
    StageOutput, StageRequest, VisualsOutput,
};
use vgen_queue::{JobStore, MemoryJobStore};

use crate::config::WorkerConfig;
use crate::retry::RetryPolicy;

pub(crate) fn test_config(work_dir: &Path) -> WorkerConfig {
    WorkerConfig {
        max_concurrent_jobs: 1,
        poll_interval: Duration::from_millis(10),
        retry: RetryPolicy::new(3)
            .with_base_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(5)),
        stage_timeouts: Stage::ALL
            .iter()
            .map(|s| (*s, Duration::from_millis(500)))
            .collect(),
        job_heartbeat_interval: Duration::from_millis(10),
        sweep_interval: Duration::from_millis(20),
        liveness_threshold: Duration::from_millis(200),
        max_requeues: 2,
        job_ttl: Duration::from_secs(24 * 3600),
        shutdown_timeout: Duration::from_secs(2),
        work_dir: work_dir.to_path_buf(),
        scene_font_file: None,
    }
}

/// Side effect an adapter performs against the store while it runs.
pub(crate) enum StoreHook {
    /// Request cancellation of the job being processed
    Cancel(Arc<MemoryJobStore>),
    /// Fail the job from outside the worker
    Terminate(Arc<MemoryJobStore>),
    /// Record the job's progress and stage as seen mid-stage
    Observe(Arc<MemoryJobStore>),
    /// Panic on the first call
    Panic,
}

pub(crate) struct FakeAdapter {
    name: String,
    stage: Stage,
    fail_first: u32,
    fail_class: FailureClass,
    slow_first: u32,
    slow_for: Duration,
    delay: Duration,
    hook: Option<StoreHook>,
    calls: AtomicU32,
    observed: Mutex<Vec<(u8, Option<Stage>)>>,
}

impl FakeAdapter {
    pub fn ok(stage: Stage) -> Self {
        Self {
            name: format!("fake-{}", stage),
            stage,
            fail_first: 0,
            fail_class: FailureClass::Transient,
            slow_first: 0,
            slow_for: Duration::ZERO,
            delay: Duration::ZERO,
            hook: None,
            calls: AtomicU32::new(0),
            observed: Mutex::new(Vec::new()),
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Fail the first `count` calls with `class`.
    pub fn failing_first(mut self, count: u32, class: FailureClass) -> Self {
        self.fail_first = count;
        self.fail_class = class;
        self
    }

    /// Stall the first `count` calls for `duration`.
    pub fn slow_first(mut self, count: u32, duration: Duration) -> Self {
        self.slow_first = count;
        self.slow_for = duration;
        self
    }

    /// Sleep on every call.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_hook(mut self, hook: StoreHook) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn observed(&self) -> Vec<(u8, Option<Stage>)> {
        self.observed.lock().unwrap().clone()
    }

    pub fn output(&self) -> StageOutput {
        match self.stage {
            Stage::Script => StageOutput::Script(ScriptOutput {
                script_text: "Disc brakes turn motion into heat.".into(),
                scenes: vec![Scene {
                    number: 1,
                    title: "Hook".into(),
                    narration: "Disc brakes turn motion into heat.".into(),
                    visual_prompt: String::new(),
                    duration_seconds: 3.0,
                }],
            }),
            Stage::Audio => StageOutput::Audio(AudioOutput {
                audio_file: "/tmp/vgen-test/narration.mp3".into(),
                duration_seconds: 3.0,
            }),
            Stage::Visuals => StageOutput::Visuals(VisualsOutput {
                clips: vec!["/tmp/vgen-test/scene_01.mp4".into()],
            }),
            Stage::Assembly => StageOutput::Assembly(AssemblyOutput {
                video_file: "/tmp/vgen-test/final.mp4".into(),
                duration_seconds: 3.0,
                size_bytes: 4096,
            }),
            Stage::Publish => StageOutput::Publish(PublishOutput {
                artifact_uri: "file:///tmp/published/final.mp4".into(),
            }),
        }
    }
}

#[async_trait]
impl StageAdapter for FakeAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn stage(&self) -> Stage {
        self.stage
    }

    async fn execute(&self, request: &StageRequest) -> AdapterResult<StageOutput> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        if call <= self.slow_first {
            tokio::time::sleep(self.slow_for).await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match &self.hook {
            Some(StoreHook::Cancel(store)) => {
                store.request_cancel(&request.job_id).await.unwrap();
            }
            Some(StoreHook::Terminate(store)) => {
                let error = JobError::new(JobErrorKind::Internal, None, "terminated by operator");
                store
                    .update(&request.job_id, JobUpdate::fail(None, error))
                    .await
                    .unwrap();
            }
            Some(StoreHook::Observe(store)) => {
                let job = store.get(&request.job_id).await.unwrap().unwrap();
                self.observed
                    .lock()
                    .unwrap()
                    .push((job.progress, job.current_stage));
            }
            Some(StoreHook::Panic) if call == 1 => panic!("adapter exploded"),
            Some(StoreHook::Panic) | None => {}
        }

        if call <= self.fail_first {
            return Err(AdapterError::new(
                AdapterErrorKind::for_stage(self.stage),
                self.fail_class,
                format!("injected failure {}", call),
            ));
        }

        Ok(self.output())
    }
}
