//! Final video assembly: concatenate scene clips, fit them to the platform
//! frame, and mux the narration track.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use vgen_models::{
    AdapterError, AdapterErrorKind, AdapterResult, AssemblyInput, AssemblyOutput, PlatformSpec,
    Stage, StageAdapter, StageInput, StageOutput, StageRequest,
};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::fs_utils::{concat_entry, job_workspace};
use crate::probe::probe_media;

/// Muxes scene clips and narration into the deliverable MP4.
pub struct VideoAssembler {
    work_dir: PathBuf,
    runner: FfmpegRunner,
}

impl VideoAssembler {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            runner: FfmpegRunner::new(),
        }
    }

    /// Assemble into `dir/final.mp4`.
    pub async fn assemble(&self, dir: &Path, input: &AssemblyInput) -> MediaResult<AssemblyOutput> {
        if input.clips.is_empty() {
            return Err(MediaError::invalid_input("no scene clips to assemble"));
        }
        let audio = Path::new(&input.audio_file);
        if !audio.exists() {
            return Err(MediaError::FileNotFound(audio.to_path_buf()));
        }
        for clip in &input.clips {
            if !Path::new(clip).exists() {
                return Err(MediaError::FileNotFound(PathBuf::from(clip)));
            }
        }

        let list_path = dir.join("clips.txt");
        let list: Vec<String> = input
            .clips
            .iter()
            .map(|clip| concat_entry(Path::new(clip)))
            .collect();
        tokio::fs::write(&list_path, list.join("\n")).await?;

        let output = dir.join("final.mp4");
        let cmd = FfmpegCommand::new(&output)
            .input_with(["-f", "concat", "-safe", "0"], list_path.to_string_lossy())
            .input(audio)
            .video_filter(frame_filter(&input.platform))
            .output_args(["-map", "0:v:0", "-map", "1:a:0"])
            .video_codec("libx264")
            .preset("medium")
            .crf(20)
            .audio_codec("aac")
            .audio_bitrate("192k")
            .output_args(["-shortest", "-movflags", "+faststart"]);

        self.runner.run(&cmd).await?;

        let info = probe_media(&output).await?;
        let size_bytes = tokio::fs::metadata(&output).await?.len();

        Ok(AssemblyOutput {
            video_file: output.to_string_lossy().to_string(),
            duration_seconds: info.duration,
            size_bytes,
        })
    }
}

/// Hold the last frame while narration continues, then letterbox to the
/// platform frame.
fn frame_filter(platform: &PlatformSpec) -> String {
    format!(
        "tpad=stop_mode=clone:stop=-1,scale={w}:{h}:force_original_aspect_ratio=decrease,\
         pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,fps={fps},format=yuv420p",
        w = platform.width,
        h = platform.height,
        fps = platform.fps
    )
}

#[async_trait]
impl StageAdapter for VideoAssembler {
    fn name(&self) -> &str {
        "ffmpeg-assembly"
    }

    fn stage(&self) -> Stage {
        Stage::Assembly
    }

    async fn execute(&self, request: &StageRequest) -> AdapterResult<StageOutput> {
        let StageInput::Assembly(input) = &request.input else {
            return Err(AdapterError::fatal(
                AdapterErrorKind::AssemblyError,
                format!("unexpected {} input", request.input.stage()),
            ));
        };

        let to_adapter = |e: MediaError| e.into_adapter_error(AdapterErrorKind::AssemblyError);
        let dir = job_workspace(&self.work_dir, &request.job_id)
            .await
            .map_err(to_adapter)?;
        let output = self.assemble(&dir, input).await.map_err(to_adapter)?;

        info!(
            job_id = %request.job_id,
            duration = output.duration_seconds,
            size_bytes = output.size_bytes,
            "Assembled final video"
        );
        Ok(StageOutput::Assembly(output))
    }
}
