//! Local filesystem storage.
//!
//! This crate provides:
//! - Upload and output path resolution
//! - Zip packaging of extracted frames
//! - File and directory deletion for cleanup

pub mod error;
pub mod fs;

pub use error::{StorageError, StorageResult};
pub use fs::{FsStorage, StorageConfig};
