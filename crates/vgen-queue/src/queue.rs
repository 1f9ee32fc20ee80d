//! Submission front door over a [`JobStore`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::info;
use validator::Validate;

use vgen_models::{CancelEffect, GenerationRequest, JobId, JobRecord};

use crate::error::{QueueError, QueueResult};
use crate::memory::MemoryJobStore;
use crate::redis_store::RedisJobStore;
use crate::store::JobStore;

/// Which store implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    Memory,
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub backend: StoreBackend,
    /// Redis URL
    pub redis_url: String,
    /// Key namespace for all job keys
    pub key_prefix: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Redis,
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "vgen".to_string(),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let backend = match std::env::var("JOB_STORE").as_deref() {
            Ok("memory") => StoreBackend::Memory,
            _ => StoreBackend::Redis,
        };

        Self {
            backend,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            key_prefix: std::env::var("JOB_KEY_PREFIX").unwrap_or_else(|_| "vgen".to_string()),
        }
    }
}

/// Job queue client.
///
/// Cheap to clone. Wakes in-process workers on submission; workers in other
/// processes fall back to polling the store.
#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    notify: Arc<Notify>,
}

impl JobQueue {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Queue over a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryJobStore::new()))
    }

    /// Build the configured store and verify it is reachable.
    pub async fn connect(config: &QueueConfig) -> QueueResult<Self> {
        let store: Arc<dyn JobStore> = match config.backend {
            StoreBackend::Memory => Arc::new(MemoryJobStore::new()),
            StoreBackend::Redis => {
                Arc::new(RedisJobStore::new(&config.redis_url, config.key_prefix.clone())?)
            }
        };
        store.ping().await?;
        info!(backend = ?config.backend, "Job store connected");
        Ok(Self::new(store))
    }

    /// Create from environment variables.
    pub async fn from_env() -> QueueResult<Self> {
        Self::connect(&QueueConfig::from_env()).await
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Validate a request and persist it as a queued job.
    pub async fn submit(&self, request: GenerationRequest) -> QueueResult<JobRecord> {
        request
            .validate()
            .map_err(|e| QueueError::Validation(e.to_string()))?;

        let job = JobRecord::new(request);
        self.store.create(job.clone()).await?;
        self.notify.notify_one();

        info!(
            job_id = %job.id,
            style = %job.input.style,
            platform = %job.input.platform,
            duration = job.input.duration,
            "Job queued"
        );
        Ok(job)
    }

    /// Fetch a job, failing with [`QueueError::JobNotFound`] for unknown ids.
    pub async fn status(&self, id: &JobId) -> QueueResult<JobRecord> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| QueueError::JobNotFound(id.clone()))
    }

    pub async fn cancel(&self, id: &JobId) -> QueueResult<CancelEffect> {
        let effect = self
            .store
            .request_cancel(id)
            .await?
            .ok_or_else(|| QueueError::JobNotFound(id.clone()))?;
        info!(job_id = %id, ?effect, "Cancellation requested");
        Ok(effect)
    }

    pub async fn list_recent(&self, limit: usize) -> QueueResult<Vec<JobRecord>> {
        self.store.list_recent(limit).await
    }

    /// Wake one idle worker, e.g. after jobs were requeued.
    pub fn notify_work(&self) {
        self.notify.notify_one();
    }

    /// Sleep until work may be available or `poll_interval` elapses.
    pub async fn wait_for_work(&self, poll_interval: Duration) {
        let _ = tokio::time::timeout(poll_interval, self.notify.notified()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vgen_models::JobState;

    #[tokio::test]
    async fn test_submit_persists_queued_job() {
        let queue = JobQueue::in_memory();
        let job = queue
            .submit(GenerationRequest::new("How ABS brakes work"))
            .await
            .unwrap();

        let stored = queue.status(&job.id).await.unwrap();
        assert_eq!(stored.state, JobState::Queued);
        assert_eq!(stored.progress, 0);
        assert_eq!(queue.store().queue_depth().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_request() {
        let queue = JobQueue::in_memory();
        let mut request = GenerationRequest::new("Tides");
        request.duration = 5;

        let err = queue.submit(request).await.unwrap_err();
        assert!(matches!(err, QueueError::Validation(_)));
        assert_eq!(queue.store().queue_depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let queue = JobQueue::in_memory();
        let id = JobId::from_string("missing");
        assert!(matches!(
            queue.status(&id).await,
            Err(QueueError::JobNotFound(_))
        ));
        assert!(matches!(
            queue.cancel(&id).await,
            Err(QueueError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_submit_wakes_waiting_worker() {
        let queue = JobQueue::in_memory();
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move {
                let start = std::time::Instant::now();
                queue.wait_for_work(Duration::from_secs(5)).await;
                start.elapsed()
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.submit(GenerationRequest::new("Tides")).await.unwrap();
        let waited = waiter.await.unwrap();
        assert!(waited < Duration::from_secs(5));
    }
}
