//! FFmpeg CLI wrapper for frame extraction.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building
//! - Timeout support via tokio
//! - One-frame-per-second extraction into a job-scoped directory

pub mod command;
pub mod error;
pub mod frames;

pub use command::{check_ffmpeg, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use frames::{list_frames, FrameExtractor};
