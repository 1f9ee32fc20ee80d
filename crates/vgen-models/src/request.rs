//! Generation request submitted by clients.

use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize};
use validator::{Validate, ValidationError};

/// Default target video length in seconds.
pub const DEFAULT_DURATION_SECS: u32 = 60;

/// Narrative style of the generated video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StyleArchetype {
    /// Precise, explanatory, diagram-friendly
    #[default]
    #[serde(alias = "TECHNICAL")]
    Technical,
    /// Measured narration over real-world context
    #[serde(alias = "DOCUMENTARY")]
    Documentary,
    /// Character or situation driven arc
    #[serde(alias = "STORYTELLING")]
    Storytelling,
    /// Sparse text and calm pacing
    #[serde(alias = "MINIMALIST")]
    Minimalist,
}

impl StyleArchetype {
    pub fn as_str(&self) -> &'static str {
        match self {
            StyleArchetype::Technical => "technical",
            StyleArchetype::Documentary => "documentary",
            StyleArchetype::Storytelling => "storytelling",
            StyleArchetype::Minimalist => "minimalist",
        }
    }

    /// Tone instruction passed to the script generator.
    pub fn tone(&self) -> &'static str {
        match self {
            StyleArchetype::Technical => {
                "clear and precise, explaining mechanisms step by step with concrete numbers"
            }
            StyleArchetype::Documentary => {
                "measured and authoritative, grounding each point in real-world context"
            }
            StyleArchetype::Storytelling => {
                "narrative and engaging, following a character or situation through an arc"
            }
            StyleArchetype::Minimalist => "calm and sparse, one idea per scene with short sentences",
        }
    }

    /// Background and text colors used by the scene renderer.
    pub fn palette(&self) -> (&'static str, &'static str) {
        match self {
            StyleArchetype::Technical => ("0x0f172a", "white"),
            StyleArchetype::Documentary => ("0x1c1917", "0xf5f5f4"),
            StyleArchetype::Storytelling => ("0x3b0764", "0xfef3c7"),
            StyleArchetype::Minimalist => ("white", "black"),
        }
    }
}

impl fmt::Display for StyleArchetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target publishing platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    #[serde(alias = "LINKEDIN")]
    Linkedin,
    #[serde(alias = "YOUTUBE")]
    Youtube,
    #[serde(alias = "TIKTOK")]
    Tiktok,
    #[serde(alias = "INSTAGRAM")]
    Instagram,
}

/// Output format constraints of a platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformSpec {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub max_duration_secs: u32,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Linkedin => "linkedin",
            Platform::Youtube => "youtube",
            Platform::Tiktok => "tiktok",
            Platform::Instagram => "instagram",
        }
    }

    pub fn spec(&self) -> PlatformSpec {
        match self {
            Platform::Linkedin => PlatformSpec {
                width: 1920,
                height: 1080,
                fps: 30,
                max_duration_secs: 600,
            },
            Platform::Youtube => PlatformSpec {
                width: 1920,
                height: 1080,
                fps: 30,
                max_duration_secs: 600,
            },
            Platform::Tiktok => PlatformSpec {
                width: 1080,
                height: 1920,
                fps: 30,
                max_duration_secs: 600,
            },
            Platform::Instagram => PlatformSpec {
                width: 1080,
                height: 1920,
                fps: 30,
                max_duration_secs: 90,
            },
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_duration() -> u32 {
    DEFAULT_DURATION_SECS
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("must not be blank".into());
        return Err(err);
    }
    Ok(())
}

/// Accepts `"linkedin"` or a one-element list `["linkedin"]`.
fn one_platform<'de, D>(deserializer: D) -> Result<Platform, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrList {
        One(Platform),
        List(Vec<Platform>),
    }

    match OneOrList::deserialize(deserializer)? {
        OneOrList::One(platform) => Ok(platform),
        OneOrList::List(list) => match list.as_slice() {
            [platform] => Ok(*platform),
            _ => Err(de::Error::invalid_length(
                list.len(),
                &"exactly one platform per job",
            )),
        },
    }
}

fn fits_platform(request: &GenerationRequest) -> Result<(), ValidationError> {
    let limit = request.platform.spec().max_duration_secs;
    if request.duration > limit {
        let mut err = ValidationError::new("duration_exceeds_platform");
        err.message = Some(
            format!(
                "duration {}s exceeds the {}s limit for {}",
                request.duration, limit, request.platform
            )
            .into(),
        );
        return Err(err);
    }
    Ok(())
}

/// Validated client request for one video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "fits_platform", skip_on_field_errors = true))]
pub struct GenerationRequest {
    /// Subject of the video
    #[validate(
        length(min = 3, max = 500, message = "topic must be 3 to 500 characters"),
        custom(function = "not_blank")
    )]
    pub topic: String,

    #[serde(default, alias = "style_archetype")]
    pub style: StyleArchetype,

    /// Target length in seconds
    #[serde(default = "default_duration")]
    #[validate(range(min = 15, max = 600, message = "duration must be 15 to 600 seconds"))]
    pub duration: u32,

    #[serde(default, alias = "platforms", deserialize_with = "one_platform")]
    pub platform: Platform,

    /// Provider-specific voice, falls back to the provider default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 128))]
    pub voice_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 200))]
    pub audience: Option<String>,
}

impl GenerationRequest {
    /// Request with defaults for everything except the topic.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            style: StyleArchetype::default(),
            duration: DEFAULT_DURATION_SECS,
            platform: Platform::default(),
            voice_id: None,
            audience: None,
        }
    }
}
