//! Publish-stage adapters.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;
use url::Url;

use vgen_models::{
    AdapterError, AdapterErrorKind, AdapterResult, JobId, PublishInput, PublishOutput, Stage,
    StageAdapter, StageInput, StageOutput, StageRequest,
};

use crate::client::{R2Client, R2Config};
use crate::error::{StorageError, StorageResult};

const VIDEO_CONTENT_TYPE: &str = "video/mp4";

/// Object key for a job's final video.
pub fn artifact_key(prefix: &str, job_id: &JobId) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("{}.mp4", job_id)
    } else {
        format!("{}/{}.mp4", prefix, job_id)
    }
}

fn publish_input(request: &StageRequest) -> AdapterResult<&PublishInput> {
    match &request.input {
        StageInput::Publish(input) => Ok(input),
        other => Err(AdapterError::fatal(
            AdapterErrorKind::StorageError,
            format!("unexpected {} input", other.stage()),
        )),
    }
}

/// Uploads the final video to R2 and returns a client-reachable URL.
pub struct R2Publisher {
    client: R2Client,
    key_prefix: String,
}

impl R2Publisher {
    pub fn new(client: R2Client, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
        }
    }
}

#[async_trait]
impl StageAdapter for R2Publisher {
    fn name(&self) -> &str {
        "r2"
    }

    fn stage(&self) -> Stage {
        Stage::Publish
    }

    async fn execute(&self, request: &StageRequest) -> AdapterResult<StageOutput> {
        let input = publish_input(request)?;
        let key = artifact_key(&self.key_prefix, &request.job_id);

        self.client
            .upload_file(&input.video_file, &key, VIDEO_CONTENT_TYPE)
            .await?;
        let artifact_uri = self.client.artifact_url(&key).await?;

        info!(job_id = %request.job_id, key = %key, "Published video to R2");
        Ok(StageOutput::Publish(PublishOutput { artifact_uri }))
    }
}

/// Copies the final video into a local directory and returns a `file://` URI.
pub struct LocalPublisher {
    dir: PathBuf,
}

impl LocalPublisher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn publish(&self, job_id: &JobId, video: &Path) -> StorageResult<String> {
        if !video.exists() {
            return Err(StorageError::not_found(video.display().to_string()));
        }
        tokio::fs::create_dir_all(&self.dir).await?;

        let target = self.dir.join(format!("{}.mp4", job_id));
        tokio::fs::copy(video, &target).await?;

        let absolute = tokio::fs::canonicalize(&target).await?;
        Url::from_file_path(&absolute)
            .map(|u| u.to_string())
            .map_err(|_| StorageError::config_error(format!("not an absolute path: {}", absolute.display())))
    }
}

#[async_trait]
impl StageAdapter for LocalPublisher {
    fn name(&self) -> &str {
        "local"
    }

    fn stage(&self) -> Stage {
        Stage::Publish
    }

    async fn execute(&self, request: &StageRequest) -> AdapterResult<StageOutput> {
        let input = publish_input(request)?;
        let artifact_uri = self
            .publish(&request.job_id, Path::new(&input.video_file))
            .await?;

        info!(job_id = %request.job_id, uri = %artifact_uri, "Published video locally");
        Ok(StageOutput::Publish(PublishOutput { artifact_uri }))
    }
}

/// Where finished videos go.
#[derive(Debug, Clone)]
pub enum PublishConfig {
    R2 { config: R2Config, key_prefix: String },
    Local { dir: PathBuf },
}

impl PublishConfig {
    /// R2 when its variables are set, otherwise `PUBLISH_LOCAL_DIR`
    /// (default `./published`).
    pub fn from_env() -> StorageResult<Self> {
        if R2Config::is_configured() {
            return Ok(Self::R2 {
                config: R2Config::from_env()?,
                key_prefix: std::env::var("R2_KEY_PREFIX").unwrap_or_else(|_| "videos".to_string()),
            });
        }
        Ok(Self::Local {
            dir: std::env::var("PUBLISH_LOCAL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./published")),
        })
    }

    /// Build the publish adapter. An R2 bucket must be reachable.
    pub async fn build(self) -> StorageResult<Arc<dyn StageAdapter>> {
        match self {
            Self::R2 { config, key_prefix } => {
                let bucket = config.bucket_name.clone();
                let client = R2Client::new(config).await?;
                client.check_connectivity().await?;
                info!(bucket = %bucket, "R2 bucket reachable");
                Ok(Arc::new(R2Publisher::new(client, key_prefix)))
            }
            Self::Local { dir } => Ok(Arc::new(LocalPublisher::new(dir))),
        }
    }
}
