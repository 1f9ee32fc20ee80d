//! Pipeline stages and the data that flows between them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::adapter::{AdapterError, AdapterErrorKind};
use crate::job::JobId;
use crate::request::{GenerationRequest, PlatformSpec, StyleArchetype};

/// One ordered step of the generation pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Script,
    Audio,
    Visuals,
    Assembly,
    Publish,
}

impl Stage {
    /// Fixed execution order.
    pub const ALL: [Stage; 5] = [
        Stage::Script,
        Stage::Audio,
        Stage::Visuals,
        Stage::Assembly,
        Stage::Publish,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Script => "script",
            Stage::Audio => "audio",
            Stage::Visuals => "visuals",
            Stage::Assembly => "assembly",
            Stage::Publish => "publish",
        }
    }

    /// Zero-based position in [`Stage::ALL`].
    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn is_last(&self) -> bool {
        self.index() == Self::ALL.len() - 1
    }

    /// Half-open progress band `[start, end)` owned by this stage.
    ///
    /// Stage 2 of 5 (audio) owns `[20, 40)`. The last band ends at 100, which
    /// is only ever written together with the terminal `completed` state.
    pub fn progress_band(&self) -> (u8, u8) {
        let count = Self::ALL.len();
        let start = self.index() * 100 / count;
        let end = (self.index() + 1) * 100 / count;
        (start as u8, end as u8)
    }

    /// Human-readable activity shown while the stage runs.
    pub fn activity(&self) -> &'static str {
        match self {
            Stage::Script => "Generating script",
            Stage::Audio => "Synthesizing narration",
            Stage::Visuals => "Rendering visuals",
            Stage::Assembly => "Assembling final video",
            Stage::Publish => "Uploading to storage",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown stage: {}", s))
    }
}

/// One scene of the generated script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub number: u32,
    pub title: String,
    pub narration: String,
    #[serde(default)]
    pub visual_prompt: String,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptOutput {
    pub script_text: String,
    pub scenes: Vec<Scene>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioOutput {
    /// Reference to the narration file (local path or object key).
    pub audio_file: String,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualsOutput {
    /// Rendered clips, in scene order.
    pub clips: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssemblyOutput {
    pub video_file: String,
    pub duration_seconds: f64,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishOutput {
    pub artifact_uri: String,
}

/// Output produced by a stage adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageOutput {
    Script(ScriptOutput),
    Audio(AudioOutput),
    Visuals(VisualsOutput),
    Assembly(AssemblyOutput),
    Publish(PublishOutput),
}

impl StageOutput {
    pub fn stage(&self) -> Stage {
        match self {
            StageOutput::Script(_) => Stage::Script,
            StageOutput::Audio(_) => Stage::Audio,
            StageOutput::Visuals(_) => Stage::Visuals,
            StageOutput::Assembly(_) => Stage::Assembly,
            StageOutput::Publish(_) => Stage::Publish,
        }
    }

    /// Short summary used as the status message after the stage completes.
    pub fn summary(&self) -> String {
        match self {
            StageOutput::Script(s) => format!("Script ready ({} scenes)", s.scenes.len()),
            StageOutput::Audio(a) => format!("Narration ready ({:.1}s)", a.duration_seconds),
            StageOutput::Visuals(v) => format!("Rendered {} scene clips", v.clips.len()),
            StageOutput::Assembly(a) => format!(
                "Video assembled ({:.1}s, {:.1} MB)",
                a.duration_seconds,
                a.size_bytes as f64 / (1024.0 * 1024.0)
            ),
            StageOutput::Publish(_) => "Video published".to_string(),
        }
    }
}

/// Intermediate artifacts accumulated across completed stages.
///
/// Persisted on the job record so a job recovered after a worker crash
/// resumes at the first stage without an output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageOutputs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<ScriptOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visuals: Option<VisualsOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assembly: Option<AssemblyOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish: Option<PublishOutput>,
}

impl StageOutputs {
    pub fn contains(&self, stage: Stage) -> bool {
        match stage {
            Stage::Script => self.script.is_some(),
            Stage::Audio => self.audio.is_some(),
            Stage::Visuals => self.visuals.is_some(),
            Stage::Assembly => self.assembly.is_some(),
            Stage::Publish => self.publish.is_some(),
        }
    }

    pub fn record(&mut self, output: StageOutput) {
        match output {
            StageOutput::Script(o) => self.script = Some(o),
            StageOutput::Audio(o) => self.audio = Some(o),
            StageOutput::Visuals(o) => self.visuals = Some(o),
            StageOutput::Assembly(o) => self.assembly = Some(o),
            StageOutput::Publish(o) => self.publish = Some(o),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptInput {
    pub topic: String,
    pub style: StyleArchetype,
    pub target_duration: u32,
    pub audience: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceConfig {
    pub voice_id: Option<String>,
    pub style: StyleArchetype,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioInput {
    pub script_text: String,
    pub voice: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualsInput {
    pub scenes: Vec<Scene>,
    pub style: StyleArchetype,
    pub platform: PlatformSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssemblyInput {
    pub audio_file: String,
    pub clips: Vec<String>,
    pub platform: PlatformSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishInput {
    pub video_file: String,
}

/// Input handed to a stage adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageInput {
    Script(ScriptInput),
    Audio(AudioInput),
    Visuals(VisualsInput),
    Assembly(AssemblyInput),
    Publish(PublishInput),
}

impl StageInput {
    /// Build the input for `stage` from the request and the outputs of earlier stages.
    pub fn build(
        stage: Stage,
        request: &GenerationRequest,
        outputs: &StageOutputs,
    ) -> Result<Self, AdapterError> {
        let kind = AdapterErrorKind::for_stage(stage);
        let missing = |prior: Stage| {
            AdapterError::fatal(kind, format!("missing {} output required by {}", prior, stage))
        };

        let input = match stage {
            Stage::Script => StageInput::Script(ScriptInput {
                topic: request.topic.trim().to_string(),
                style: request.style,
                target_duration: request.duration,
                audience: request.audience.clone(),
            }),
            Stage::Audio => {
                let script = outputs.script.as_ref().ok_or_else(|| missing(Stage::Script))?;
                StageInput::Audio(AudioInput {
                    script_text: script.script_text.clone(),
                    voice: VoiceConfig {
                        voice_id: request.voice_id.clone(),
                        style: request.style,
                    },
                })
            }
            Stage::Visuals => {
                let script = outputs.script.as_ref().ok_or_else(|| missing(Stage::Script))?;
                StageInput::Visuals(VisualsInput {
                    scenes: script.scenes.clone(),
                    style: request.style,
                    platform: request.platform.spec(),
                })
            }
            Stage::Assembly => {
                let audio = outputs.audio.as_ref().ok_or_else(|| missing(Stage::Audio))?;
                let visuals = outputs.visuals.as_ref().ok_or_else(|| missing(Stage::Visuals))?;
                StageInput::Assembly(AssemblyInput {
                    audio_file: audio.audio_file.clone(),
                    clips: visuals.clips.clone(),
                    platform: request.platform.spec(),
                })
            }
            Stage::Publish => {
                let assembly = outputs.assembly.as_ref().ok_or_else(|| missing(Stage::Assembly))?;
                StageInput::Publish(PublishInput {
                    video_file: assembly.video_file.clone(),
                })
            }
        };

        Ok(input)
    }

    pub fn stage(&self) -> Stage {
        match self {
            StageInput::Script(_) => Stage::Script,
            StageInput::Audio(_) => Stage::Audio,
            StageInput::Visuals(_) => Stage::Visuals,
            StageInput::Assembly(_) => Stage::Assembly,
            StageInput::Publish(_) => Stage::Publish,
        }
    }
}

/// Envelope passed to [`crate::StageAdapter::execute`].
#[derive(Debug, Clone)]
pub struct StageRequest {
    pub job_id: JobId,
    pub input: StageInput,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Platform;

    fn request() -> GenerationRequest {
        GenerationRequest::new("How ABS brakes work")
    }

    #[test]
    fn test_progress_bands_are_contiguous() {
        assert_eq!(Stage::Script.progress_band(), (0, 20));
        assert_eq!(Stage::Audio.progress_band(), (20, 40));
        assert_eq!(Stage::Publish.progress_band(), (80, 100));

        for pair in Stage::ALL.windows(2) {
            assert_eq!(pair[0].progress_band().1, pair[1].progress_band().0);
        }
    }

    #[test]
    fn test_stage_order_and_parse() {
        assert!(Stage::Script < Stage::Visuals);
        assert!(Stage::Publish.is_last());
        assert_eq!("VISUALS".parse::<Stage>().unwrap(), Stage::Visuals);
        assert!("research".parse::<Stage>().is_err());
    }

    #[test]
    fn test_build_input_requires_prior_outputs() {
        let outputs = StageOutputs::default();
        let err = StageInput::build(Stage::Assembly, &request(), &outputs).unwrap_err();
        assert!(!err.is_transient());
        assert!(err.message.contains("audio"));

        let script = StageInput::build(Stage::Script, &request(), &outputs).unwrap();
        assert_eq!(script.stage(), Stage::Script);
    }

    #[test]
    fn test_assembly_input_uses_platform_spec() {
        let mut req = request();
        req.platform = Platform::Tiktok;

        let mut outputs = StageOutputs::default();
        outputs.record(StageOutput::Audio(AudioOutput {
            audio_file: "narration.mp3".into(),
            duration_seconds: 42.0,
        }));
        outputs.record(StageOutput::Visuals(VisualsOutput {
            clips: vec!["scene_1.mp4".into(), "scene_2.mp4".into()],
        }));

        match StageInput::build(Stage::Assembly, &req, &outputs).unwrap() {
            StageInput::Assembly(input) => {
                assert_eq!(input.platform.width, 1080);
                assert_eq!(input.platform.height, 1920);
                assert_eq!(input.clips.len(), 2);
            }
            other => panic!("unexpected input: {:?}", other),
        }
    }
}
