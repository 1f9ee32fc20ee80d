//! Concrete stage adapters and the production pipeline.

pub mod gemini;
pub mod tts;

use std::sync::Arc;

use tracing::info;

use vgen_media::{SceneRenderer, VideoAssembler};
use vgen_storage::PublishConfig;

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::pipeline::Pipeline;

pub use gemini::GeminiScriptAdapter;
pub use tts::{ElevenLabsConfig, HttpTtsAdapter, OpenAiTtsConfig, TtsProvider};

/// Build the pipeline from environment credentials.
///
/// Audio prefers ElevenLabs and falls back to OpenAI speech; either may be
/// absent, but not both.
pub async fn build_pipeline(config: &WorkerConfig) -> WorkerResult<Pipeline> {
    let mut builder = Pipeline::builder().adapter(Arc::new(GeminiScriptAdapter::from_env()?));

    if let Some(elevenlabs) = ElevenLabsConfig::from_env() {
        builder = builder.adapter(Arc::new(HttpTtsAdapter::new(
            TtsProvider::ElevenLabs(elevenlabs),
            &config.work_dir,
        )?));
    }
    if let Some(openai) = OpenAiTtsConfig::from_env() {
        builder = builder.adapter(Arc::new(HttpTtsAdapter::new(
            TtsProvider::OpenAi(openai),
            &config.work_dir,
        )?));
    }

    let publisher = PublishConfig::from_env()?.build().await?;

    let pipeline = builder
        .adapter(Arc::new(
            SceneRenderer::new(&config.work_dir).with_font(config.scene_font_file.clone()),
        ))
        .adapter(Arc::new(VideoAssembler::new(&config.work_dir)))
        .adapter(publisher)
        .build()?;

    info!("Pipeline: {}", pipeline.describe());
    Ok(pipeline)
}
