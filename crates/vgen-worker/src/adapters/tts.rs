//! Narration synthesis over HTTP text-to-speech APIs.
//!
//! Long scripts are split at sentence boundaries to stay under each
//! provider's request limit; the returned MP3 parts are joined with FFmpeg's
//! concat demuxer.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, info};

use vgen_media::fs_utils::concat_entry;
use vgen_media::{job_workspace, probe_media, FfmpegCommand, FfmpegRunner, MediaError};
use vgen_models::{
    AdapterError, AdapterErrorKind, AdapterResult, AudioInput, AudioOutput, Stage, StageAdapter,
    StageInput, StageOutput, StageRequest, VoiceConfig,
};

use crate::error::WorkerResult;

const KIND: AdapterErrorKind = AdapterErrorKind::SynthesisError;

/// Voices accepted by the OpenAI speech endpoint.
const OPENAI_VOICES: [&str; 11] = [
    "alloy", "ash", "ballad", "coral", "echo", "fable", "nova", "onyx", "sage", "shimmer", "verse",
];

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// ElevenLabs voice settings.
#[derive(Debug, Clone)]
pub struct ElevenLabsConfig {
    pub api_key: String,
    pub voice_id: String,
    pub model_id: String,
    pub stability: f32,
    pub similarity_boost: f32,
    pub style: f32,
}

impl ElevenLabsConfig {
    /// `None` when `ELEVENLABS_API_KEY` is not set.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("ELEVENLABS_API_KEY").ok().filter(|k| !k.is_empty())?;
        Some(Self {
            api_key,
            voice_id: env_or("ELEVENLABS_VOICE_ID", "21m00Tcm4TlvDq8ikWAM"),
            model_id: env_or("ELEVENLABS_MODEL_ID", "eleven_multilingual_v2"),
            stability: env_f32("ELEVENLABS_STABILITY", 0.2),
            similarity_boost: env_f32("ELEVENLABS_SIMILARITY", 0.75),
            style: env_f32("ELEVENLABS_STYLE", 0.9),
        })
    }
}

/// OpenAI speech settings.
#[derive(Debug, Clone)]
pub struct OpenAiTtsConfig {
    pub api_key: String,
    pub model: String,
    pub voice: String,
}

impl OpenAiTtsConfig {
    /// `None` when `OPENAI_API_KEY` is not set.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty())?;
        Some(Self {
            api_key,
            model: env_or("OPENAI_TTS_MODEL", "gpt-4o-mini-tts"),
            voice: env_or("OPENAI_TTS_VOICE", "alloy"),
        })
    }
}

#[derive(Debug, Clone)]
pub enum TtsProvider {
    ElevenLabs(ElevenLabsConfig),
    OpenAi(OpenAiTtsConfig),
}

impl TtsProvider {
    pub fn name(&self) -> &'static str {
        match self {
            TtsProvider::ElevenLabs(_) => "elevenlabs",
            TtsProvider::OpenAi(_) => "openai-tts",
        }
    }

    fn default_base_url(&self) -> &'static str {
        match self {
            TtsProvider::ElevenLabs(_) => "https://api.elevenlabs.io",
            TtsProvider::OpenAi(_) => "https://api.openai.com",
        }
    }

    /// Characters per request, kept below the documented limits.
    fn max_chars(&self) -> usize {
        match self {
            TtsProvider::ElevenLabs(_) => 5000,
            TtsProvider::OpenAi(_) => 4000,
        }
    }

    /// Requested voice when the provider understands it, else the configured one.
    fn voice_for(&self, voice: &VoiceConfig) -> String {
        let requested = voice.voice_id.as_deref().map(str::trim).filter(|v| !v.is_empty());
        match self {
            TtsProvider::ElevenLabs(config) => requested
                .filter(|v| !OPENAI_VOICES.contains(v))
                .unwrap_or(&config.voice_id)
                .to_string(),
            TtsProvider::OpenAi(config) => requested
                .filter(|v| OPENAI_VOICES.contains(v))
                .unwrap_or(&config.voice)
                .to_string(),
        }
    }
}

/// Audio-stage adapter for one TTS provider.
pub struct HttpTtsAdapter {
    provider: TtsProvider,
    client: Client,
    base_url: String,
    work_dir: PathBuf,
}

impl HttpTtsAdapter {
    pub fn new(provider: TtsProvider, work_dir: impl Into<PathBuf>) -> WorkerResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        let base_url = provider.default_base_url().to_string();

        Ok(Self {
            provider,
            client,
            base_url,
            work_dir: work_dir.into(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// One provider call returning MP3 bytes.
    async fn request_speech(&self, text: &str, voice: &str) -> AdapterResult<Vec<u8>> {
        let request = match &self.provider {
            TtsProvider::ElevenLabs(config) => self
                .client
                .post(format!("{}/v1/text-to-speech/{}", self.base_url, voice))
                .query(&[("output_format", "mp3_44100_128")])
                .header("xi-api-key", &config.api_key)
                .header("accept", "audio/mpeg")
                .json(&json!({
                    "text": text,
                    "model_id": config.model_id,
                    "voice_settings": {
                        "stability": config.stability,
                        "similarity_boost": config.similarity_boost,
                        "style": config.style,
                        "use_speaker_boost": true,
                    },
                })),
            TtsProvider::OpenAi(config) => self
                .client
                .post(format!("{}/v1/audio/speech", self.base_url))
                .bearer_auth(&config.api_key)
                .json(&json!({
                    "model": config.model,
                    "input": text,
                    "voice": voice,
                    "response_format": "mp3",
                })),
        };

        let response = request.send().await.map_err(|e| {
            AdapterError::transient(KIND, format!("{} request failed: {}", self.provider.name(), e))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::from_http_status(KIND, status.as_u16(), &body));
        }

        let bytes = response.bytes().await.map_err(|e| {
            AdapterError::transient(KIND, format!("{} response interrupted: {}", self.provider.name(), e))
        })?;
        if bytes.is_empty() {
            return Err(AdapterError::transient(
                KIND,
                format!("{} returned empty audio", self.provider.name()),
            ));
        }
        Ok(bytes.to_vec())
    }

    /// Synthesize the full script into `dir/narration.mp3`.
    async fn synthesize(&self, dir: &Path, input: &AudioInput) -> AdapterResult<AudioOutput> {
        let chunks = split_for_tts(&input.script_text, self.provider.max_chars());
        if chunks.is_empty() {
            return Err(AdapterError::fatal(KIND, "script text is empty"));
        }
        let voice = self.provider.voice_for(&input.voice);
        let to_adapter = |e: MediaError| e.into_adapter_error(KIND);

        let mut parts = Vec::with_capacity(chunks.len());
        for (index, chunk) in chunks.iter().enumerate() {
            let audio = self.request_speech(chunk, &voice).await?;
            let part = dir.join(format!("narration_{}_{:02}.mp3", self.provider.name(), index));
            tokio::fs::write(&part, audio)
                .await
                .map_err(|e| to_adapter(MediaError::Io(e)))?;
            debug!(part = %part.display(), chars = chunk.len(), "Synthesized narration part");
            parts.push(part);
        }

        let narration = dir.join("narration.mp3");
        if parts.len() == 1 {
            tokio::fs::rename(&parts[0], &narration)
                .await
                .map_err(|e| to_adapter(MediaError::Io(e)))?;
        } else {
            let list_path = dir.join("narration_parts.txt");
            let list: Vec<String> = parts.iter().map(|p| concat_entry(p)).collect();
            tokio::fs::write(&list_path, list.join("\n"))
                .await
                .map_err(|e| to_adapter(MediaError::Io(e)))?;

            let cmd = FfmpegCommand::new(&narration)
                .input_with(["-f", "concat", "-safe", "0"], list_path.to_string_lossy())
                .output_args(["-c", "copy"]);
            FfmpegRunner::new().run(&cmd).await.map_err(to_adapter)?;
        }

        let info = probe_media(&narration).await.map_err(to_adapter)?;
        if !info.has_audio || info.duration <= 0.0 {
            return Err(AdapterError::transient(KIND, "synthesized narration has no audio"));
        }

        Ok(AudioOutput {
            audio_file: narration.to_string_lossy().to_string(),
            duration_seconds: info.duration,
        })
    }
}

#[async_trait]
impl StageAdapter for HttpTtsAdapter {
    fn name(&self) -> &str {
        self.provider.name()
    }

    fn stage(&self) -> Stage {
        Stage::Audio
    }

    async fn execute(&self, request: &StageRequest) -> AdapterResult<StageOutput> {
        let StageInput::Audio(input) = &request.input else {
            return Err(AdapterError::fatal(
                KIND,
                format!("unexpected {} input", request.input.stage()),
            ));
        };
        if input.script_text.trim().is_empty() {
            return Err(AdapterError::fatal(KIND, "script text is empty"));
        }

        let dir = job_workspace(&self.work_dir, &request.job_id)
            .await
            .map_err(|e| e.into_adapter_error(KIND))?;
        let output = self.synthesize(&dir, input).await?;

        info!(
            job_id = %request.job_id,
            provider = self.provider.name(),
            duration = output.duration_seconds,
            "Synthesized narration"
        );
        Ok(StageOutput::Audio(output))
    }
}

/// Split `text` into chunks of at most `max_chars` bytes, breaking between
/// sentences where possible. A single word longer than the limit is kept whole.
pub fn split_for_tts(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for sentence in sentences(text) {
        for piece in fit_sentence(sentence, max_chars) {
            if !current.is_empty() && current.len() + 1 + piece.len() > max_chars {
                chunks.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(&piece);
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// Sentences end at `.`, `!` or `?` followed by whitespace, or at a newline.
fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let next_is_space = chars.peek().map_or(true, |(_, n)| n.is_whitespace());
        let boundary = c == '\n' || (matches!(c, '.' | '!' | '?') && next_is_space);
        if boundary {
            let end = i + c.len_utf8();
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                out.push(sentence);
            }
            start = end;
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }

    out
}

fn fit_sentence(sentence: &str, max_chars: usize) -> Vec<String> {
    if sentence.len() <= max_chars {
        return vec![sentence.to_string()];
    }

    let mut pieces = Vec::new();
    let mut current = String::new();
    for word in sentence.split_whitespace() {
        if !current.is_empty() && current.len() + 1 + word.len() > max_chars {
            pieces.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}
