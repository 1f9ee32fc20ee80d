//! FFmpeg CLI wrapper for video generation.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building with multiple inputs
//! - Timeout and stderr capture for child processes
//! - Scene clip rendering from script text
//! - Final assembly of clips and narration into a platform-sized MP4

pub mod assembly;
pub mod command;
pub mod error;
pub mod fs_utils;
pub mod probe;
pub mod scenes;

pub use assembly::VideoAssembler;
pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use fs_utils::{job_workspace, remove_workspace};
pub use probe::{probe_media, MediaInfo};
pub use scenes::SceneRenderer;
