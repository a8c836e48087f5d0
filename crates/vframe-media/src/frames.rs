//! Frame extraction.
//!
//! Frames are sampled at one per second into `<temp_dir>/<working_id>/`,
//! named `frame_0001.png`, `frame_0002.png`, ...

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// Sampling filter passed to FFmpeg.
pub const FRAME_FILTER: &str = "fps=1";

/// Output pattern for extracted frames.
pub const FRAME_PATTERN: &str = "frame_%04d.png";

/// Extension of extracted frames.
const FRAME_EXTENSION: &str = "png";

/// Extracts still frames from a video with the FFmpeg CLI.
#[derive(Debug, Clone)]
pub struct FrameExtractor {
    temp_dir: PathBuf,
    timeout_secs: Option<u64>,
}

impl FrameExtractor {
    pub fn new(temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            timeout_secs: None,
        }
    }

    /// Kill FFmpeg if a single extraction runs longer than `secs`.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Directory that receives the frames of `working_id`.
    pub fn output_dir(&self, working_id: &str) -> PathBuf {
        self.temp_dir.join(working_id)
    }

    /// Build the FFmpeg invocation for a source video.
    pub fn command(&self, video_path: &Path, working_id: &str) -> FfmpegCommand {
        FfmpegCommand::new(video_path, self.output_dir(working_id).join(FRAME_PATTERN))
            .video_filter(FRAME_FILTER)
    }

    /// Extract frames and return their paths in frame order.
    ///
    /// Fails with [`MediaError::NoFramesExtracted`] if FFmpeg succeeds but
    /// writes nothing.
    pub async fn extract_frames(
        &self,
        video_path: impl AsRef<Path>,
        working_id: &str,
    ) -> MediaResult<Vec<PathBuf>> {
        let video_path = video_path.as_ref();
        if !fs::try_exists(video_path).await.unwrap_or(false) {
            return Err(MediaError::FileNotFound(video_path.to_path_buf()));
        }

        let output_dir = self.output_dir(working_id);
        fs::create_dir_all(&output_dir).await?;

        info!(
            source = %video_path.display(),
            output = %output_dir.display(),
            "Extracting frames"
        );

        let mut runner = FfmpegRunner::new();
        if let Some(secs) = self.timeout_secs {
            runner = runner.with_timeout(secs);
        }
        runner.run(&self.command(video_path, working_id)).await?;

        let frames = list_frames(&output_dir).await?;
        if frames.is_empty() {
            return Err(MediaError::NoFramesExtracted);
        }

        debug!("Extracted {} frames into {}", frames.len(), output_dir.display());
        Ok(frames)
    }
}

/// List extracted frames in `dir`, sorted by name.
pub async fn list_frames(dir: &Path) -> MediaResult<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir).await?;
    let mut frames = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_frame = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case(FRAME_EXTENSION))
            .unwrap_or(false);
        if is_frame && entry.file_type().await?.is_file() {
            frames.push(path);
        }
    }

    frames.sort();
    Ok(frames)
}
