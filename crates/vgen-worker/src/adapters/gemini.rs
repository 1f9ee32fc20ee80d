//! Gemini client for narration scripts.
//!
//! The topic research step is part of the prompt: the model is asked to
//! ground the narration in concrete technical facts before writing scenes.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use vgen_models::{
    AdapterError, AdapterErrorKind, AdapterResult, Scene, ScriptInput, ScriptOutput, Stage,
    StageAdapter, StageInput, StageOutput, StageRequest,
};

use crate::error::{WorkerError, WorkerResult};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_MODELS: [&str; 2] = ["gemini-2.5-flash", "gemini-2.5-flash-lite"];

/// Narration pace used to size scripts and scenes (150 words per minute).
pub const WORDS_PER_SECOND: f64 = 2.5;
const MIN_SCENE_SECS: f64 = 2.0;
const MIN_SCENES: usize = 3;
const MAX_SCENES: usize = 5;

const KIND: AdapterErrorKind = AdapterErrorKind::GenerationError;

/// Gemini API request.
#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(rename = "responseMimeType")]
    response_mime_type: String,
    temperature: f32,
}

/// Gemini API response.
#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: ResponseContent,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

/// Script as returned by the model.
#[derive(Debug, Deserialize)]
struct ScriptDraft {
    #[serde(default)]
    scenes: Vec<DraftScene>,
}

#[derive(Debug, Deserialize)]
struct DraftScene {
    #[serde(default)]
    title: String,
    narration: String,
    #[serde(default)]
    visual_prompt: String,
}

/// Script-stage adapter backed by the Gemini `generateContent` API.
pub struct GeminiScriptAdapter {
    api_key: String,
    client: Client,
    base_url: String,
    models: Vec<String>,
}

impl GeminiScriptAdapter {
    pub fn new(api_key: impl Into<String>) -> WorkerResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self {
            api_key: api_key.into(),
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            models: DEFAULT_MODELS.iter().map(|m| m.to_string()).collect(),
        })
    }

    /// `GEMINI_API_KEY`, with `GEMINI_MODELS` as an optional comma-separated
    /// fallback list.
    pub fn from_env() -> WorkerResult<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| WorkerError::config_error("GEMINI_API_KEY not set"))?;
        let adapter = Self::new(api_key)?;

        match std::env::var("GEMINI_MODELS") {
            Ok(models) if !models.trim().is_empty() => {
                Ok(adapter.with_models(models.split(',').map(str::trim).filter(|m| !m.is_empty())))
            }
            _ => Ok(adapter),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.models = models.into_iter().map(Into::into).collect();
        self
    }

    /// Generate a script, falling back through the configured models.
    pub async fn generate(&self, input: &ScriptInput) -> AdapterResult<ScriptOutput> {
        let prompt = build_prompt(input);
        let mut last_transient = None;
        let mut last_fatal = None;

        for model in &self.models {
            info!("Attempting Gemini API with model: {}", model);
            match self.call_gemini_api(model, &prompt).await {
                Ok(output) => {
                    info!(model = %model, scenes = output.scenes.len(), "Generated script");
                    return Ok(output);
                }
                Err(e) => {
                    warn!("Failed with model {}: {}", model, e);
                    if e.is_transient() {
                        last_transient = Some(e);
                    } else {
                        last_fatal = Some(e);
                    }
                }
            }
        }

        Err(last_transient
            .or(last_fatal)
            .unwrap_or_else(|| AdapterError::fatal(KIND, "no Gemini models configured")))
    }

    async fn call_gemini_api(&self, model: &str, prompt: &str) -> AdapterResult<ScriptOutput> {
        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, model);

        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json".to_string(),
                temperature: 0.7,
            },
        };

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AdapterError::transient(KIND, format!("Gemini API request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::from_http_status(KIND, status.as_u16(), &body));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            AdapterError::transient(KIND, format!("Failed to parse Gemini response: {}", e))
        })?;

        let text = gemini_response
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.as_str())
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| AdapterError::transient(KIND, "No content in Gemini response"))?;

        parse_script(text, MIN_SCENES)
    }
}

#[async_trait]
impl StageAdapter for GeminiScriptAdapter {
    fn name(&self) -> &str {
        "gemini"
    }

    fn stage(&self) -> Stage {
        Stage::Script
    }

    async fn execute(&self, request: &StageRequest) -> AdapterResult<StageOutput> {
        let StageInput::Script(input) = &request.input else {
            return Err(AdapterError::fatal(
                KIND,
                format!("unexpected {} input", request.input.stage()),
            ));
        };
        self.generate(input).await.map(StageOutput::Script)
    }
}

fn build_prompt(input: &ScriptInput) -> String {
    let max_words = (input.target_duration as f64 * WORDS_PER_SECOND).round() as u32;
    let audience = input
        .audience
        .as_deref()
        .filter(|a| !a.trim().is_empty())
        .unwrap_or("technically curious professionals");

    format!(
        r#"You write narration for short technical explainer videos.

TOPIC: {topic}
AUDIENCE: {audience}
TONE: {tone}
LENGTH: about {duration} seconds of narration, at most {max_words} words in total.

Before writing, identify the three to five most important verified technical facts about the
topic (mechanisms, numbers, trade-offs). Base the narration on those facts and do not invent
statistics.

Structure the script as {min} to {max} scenes:
- Scene 1 is a hook that states the problem or the surprising fact.
- Middle scenes explain the mechanism step by step.
- The last scene is a concise takeaway.

Return ONLY a single JSON object with this schema:
{{
  "title": "Short video title",
  "scenes": [
    {{
      "title": "Two to five word on-screen title",
      "narration": "What the narrator says in this scene",
      "visual_prompt": "What should be on screen"
    }}
  ]
}}
"#,
        topic = input.topic,
        audience = audience,
        tone = input.style.tone(),
        duration = input.target_duration,
        max_words = max_words,
        min = MIN_SCENES,
        max = MAX_SCENES,
    )
}

/// Parse model output, tolerating a surrounding markdown code fence.
///
/// Too few usable scenes is reported as transient: another sample from the
/// model usually fixes it.
fn parse_script(text: &str, min_scenes: usize) -> AdapterResult<ScriptOutput> {
    let text = text.trim();
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    let text = text.strip_suffix("```").unwrap_or(text);

    let draft: ScriptDraft = serde_json::from_str(text.trim())
        .map_err(|e| AdapterError::transient(KIND, format!("Failed to parse script JSON: {}", e)))?;

    let scenes: Vec<Scene> = draft
        .scenes
        .into_iter()
        .filter(|s| !s.narration.trim().is_empty())
        .take(MAX_SCENES)
        .enumerate()
        .map(|(i, s)| Scene {
            number: i as u32 + 1,
            title: s.title.trim().to_string(),
            duration_seconds: scene_duration(&s.narration),
            narration: s.narration.trim().to_string(),
            visual_prompt: s.visual_prompt.trim().to_string(),
        })
        .collect();

    if scenes.len() < min_scenes {
        return Err(AdapterError::transient(
            KIND,
            format!("script has {} scenes, need at least {}", scenes.len(), min_scenes),
        ));
    }

    let script_text = scenes
        .iter()
        .map(|s| s.narration.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    Ok(ScriptOutput {
        script_text,
        scenes,
    })
}

/// Seconds needed to narrate `narration` at [`WORDS_PER_SECOND`].
pub fn scene_duration(narration: &str) -> f64 {
    let words = narration.split_whitespace().count() as f64;
    (words / WORDS_PER_SECOND).max(MIN_SCENE_SECS)
}
