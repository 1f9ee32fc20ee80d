//! Scene clip rendering.
//!
//! Each scene becomes a short clip: a solid background in the style's
//! palette with the scene title and narration drawn on top. Text is written
//! to a side file and loaded with `drawtext=textfile=` so no escaping of user
//! content is needed inside the filter graph.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use vgen_models::{
    AdapterError, AdapterErrorKind, AdapterResult, PlatformSpec, Scene, Stage, StageAdapter,
    StageInput, StageOutput, StageRequest, StyleArchetype, VisualsOutput,
};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;
use crate::fs_utils::{escape_filter_path, job_workspace};

/// Shortest clip rendered for a scene.
const MIN_SCENE_SECS: f64 = 1.0;
/// Characters per line when wrapping narration.
const WRAP_WIDTH: usize = 42;

/// Renders one clip per scene with FFmpeg's lavfi color source.
pub struct SceneRenderer {
    work_dir: PathBuf,
    font_file: Option<PathBuf>,
    runner: FfmpegRunner,
}

impl SceneRenderer {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            font_file: None,
            runner: FfmpegRunner::new(),
        }
    }

    /// Use a specific font instead of the fontconfig default.
    pub fn with_font(mut self, font_file: Option<PathBuf>) -> Self {
        self.font_file = font_file;
        self
    }

    /// Render a single scene into `dir`.
    pub async fn render_scene(
        &self,
        dir: &Path,
        scene: &Scene,
        style: StyleArchetype,
        platform: &PlatformSpec,
    ) -> MediaResult<PathBuf> {
        let text_path = dir.join(format!("scene_{:02}.txt", scene.number));
        tokio::fs::write(&text_path, scene_text(scene)).await?;

        let output = dir.join(format!("scene_{:02}.mp4", scene.number));
        let duration = scene.duration_seconds.max(MIN_SCENE_SECS);
        let (background, _) = style.palette();

        let source = format!(
            "color=c={}:s={}x{}:r={}:d={:.3}",
            background, platform.width, platform.height, platform.fps, duration
        );

        let cmd = FfmpegCommand::new(&output)
            .input_with(["-f", "lavfi"], source)
            .video_filter(drawtext_filter(
                &text_path,
                style,
                platform,
                self.font_file.as_deref(),
            ))
            .video_codec("libx264")
            .preset("veryfast")
            .output_args(["-pix_fmt", "yuv420p"])
            .duration(duration);

        self.runner.run(&cmd).await?;
        debug!(scene = scene.number, path = %output.display(), "Rendered scene");
        Ok(output)
    }
}

#[async_trait]
impl StageAdapter for SceneRenderer {
    fn name(&self) -> &str {
        "ffmpeg-scenes"
    }

    fn stage(&self) -> Stage {
        Stage::Visuals
    }

    async fn execute(&self, request: &StageRequest) -> AdapterResult<StageOutput> {
        let StageInput::Visuals(input) = &request.input else {
            return Err(AdapterError::fatal(
                AdapterErrorKind::RenderError,
                format!("unexpected {} input", request.input.stage()),
            ));
        };
        if input.scenes.is_empty() {
            return Err(AdapterError::fatal(
                AdapterErrorKind::RenderError,
                "script has no scenes to render",
            ));
        }

        let to_adapter = |e: crate::MediaError| e.into_adapter_error(AdapterErrorKind::RenderError);
        let dir = job_workspace(&self.work_dir, &request.job_id)
            .await
            .map_err(to_adapter)?;

        let mut clips = Vec::with_capacity(input.scenes.len());
        for scene in &input.scenes {
            let clip = self
                .render_scene(&dir, scene, input.style, &input.platform)
                .await
                .map_err(to_adapter)?;
            clips.push(clip.to_string_lossy().to_string());
        }

        info!(job_id = %request.job_id, clips = clips.len(), "Rendered scene clips");
        Ok(StageOutput::Visuals(VisualsOutput { clips }))
    }
}

/// Title plus wrapped narration.
fn scene_text(scene: &Scene) -> String {
    let body = wrap_text(&scene.narration, WRAP_WIDTH);
    if scene.title.trim().is_empty() {
        body
    } else {
        format!("{}\n\n{}", scene.title.trim(), body)
    }
}

fn drawtext_filter(
    text_path: &Path,
    style: StyleArchetype,
    platform: &PlatformSpec,
    font_file: Option<&Path>,
) -> String {
    let (_, foreground) = style.palette();
    let font_size = platform.width.min(platform.height) / 22;

    let mut filter = format!(
        "drawtext=textfile='{}':fontcolor={}:fontsize={}:line_spacing={}:x=(w-text_w)/2:y=(h-text_h)/2",
        escape_filter_path(text_path),
        foreground,
        font_size,
        font_size / 3
    );
    if let Some(font) = font_file {
        filter.push_str(&format!(":fontfile='{}'", escape_filter_path(font)));
    }
    filter
}

/// Greedy word wrap. Words longer than `width` get a line of their own.
pub fn wrap_text(text: &str, width: usize) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if !current.is_empty() && current.chars().count() + 1 + word.chars().count() > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use vgen_models::{JobId, Platform};

    #[test]
    fn test_wrap_text() {
        let wrapped = wrap_text("the quick brown fox jumps over the lazy dog", 15);
        for line in wrapped.lines() {
            assert!(line.len() <= 15, "line too long: {}", line);
        }
        assert_eq!(wrapped.lines().count(), 3);
        assert_eq!(wrap_text("", 10), "");
        assert_eq!(wrap_text("supercalifragilistic", 5), "supercalifragilistic");
    }

    #[test]
    fn test_scene_text_includes_title() {
        let scene = Scene {
            number: 1,
            title: "Intro".into(),
            narration: "Brakes convert motion into heat.".into(),
            visual_prompt: String::new(),
            duration_seconds: 8.0,
        };
        assert!(scene_text(&scene).starts_with("Intro\n\n"));
    }

    #[test]
    fn test_drawtext_filter() {
        let spec = Platform::Tiktok.spec();
        let filter = drawtext_filter(
            Path::new("/w/scene_01.txt"),
            StyleArchetype::Minimalist,
            &spec,
            Some(Path::new("/fonts/Inter.ttf")),
        );
        assert!(filter.starts_with("drawtext=textfile='/w/scene_01.txt'"));
        assert!(filter.contains("fontcolor=black"));
        assert!(filter.contains("fontsize=49"));
        assert!(filter.ends_with(":fontfile='/fonts/Inter.ttf'"));
    }

    #[tokio::test]
    async fn test_rejects_empty_scene_list() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = SceneRenderer::new(dir.path());
        let request = StageRequest {
            job_id: JobId::new(),
            input: StageInput::Visuals(vgen_models::VisualsInput {
                scenes: vec![],
                style: StyleArchetype::Technical,
                platform: Platform::Youtube.spec(),
            }),
        };

        let err = renderer.execute(&request).await.unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(err.kind, AdapterErrorKind::RenderError);
    }
}
