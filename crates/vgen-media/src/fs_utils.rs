//! Per-job working directories.

use std::path::{Path, PathBuf};
use tokio::fs;

use vgen_models::JobId;

use crate::error::MediaResult;

/// Directory holding a job's intermediate files, created on demand.
pub async fn job_workspace(root: impl AsRef<Path>, job_id: &JobId) -> MediaResult<PathBuf> {
    let dir = root.as_ref().join(job_id.as_str());
    fs::create_dir_all(&dir).await?;
    Ok(dir)
}

/// Remove a job's working directory. Missing directories are not an error.
pub async fn remove_workspace(root: impl AsRef<Path>, job_id: &JobId) -> MediaResult<()> {
    let dir = root.as_ref().join(job_id.as_str());
    match fs::remove_dir_all(&dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Escape a path for use inside an FFmpeg filter argument.
pub fn escape_filter_path(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "\\\\")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}

/// Quote a path for an FFmpeg concat demuxer list.
pub fn concat_entry(path: &Path) -> String {
    format!("file '{}'", path.to_string_lossy().replace('\'', "'\\''"))
}
