//! Filesystem storage for uploads, frame archives and temporary files.

use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Component, Path, PathBuf};

use tokio::fs;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{StorageError, StorageResult};

/// Storage directories.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Where uploaded videos land
    pub upload_dir: PathBuf,
    /// Where finished archives are written
    pub output_dir: PathBuf,
    /// Scratch space for extracted frames
    pub temp_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("/app/uploads"),
            output_dir: PathBuf::from("/app/outputs"),
            temp_dir: PathBuf::from("/app/temp"),
        }
    }
}

impl StorageConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            upload_dir: std::env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            output_dir: std::env::var("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            temp_dir: std::env::var("TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.temp_dir),
        }
    }

    /// All directories under the same root (handy for tests).
    pub fn rooted(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            upload_dir: root.join("uploads"),
            output_dir: root.join("outputs"),
            temp_dir: root.join("temp"),
        }
    }
}

/// Local filesystem storage.
#[derive(Debug, Clone)]
pub struct FsStorage {
    config: StorageConfig,
}

impl FsStorage {
    /// Create the storage and make sure its directories exist.
    pub async fn new(config: StorageConfig) -> StorageResult<Self> {
        for dir in [&config.upload_dir, &config.output_dir, &config.temp_dir] {
            fs::create_dir_all(dir).await?;
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Path of an uploaded video.
    pub fn upload_path(&self, filename: &str) -> PathBuf {
        self.config.upload_dir.join(filename)
    }

    /// Path of a finished archive.
    pub fn output_path(&self, filename: &str) -> PathBuf {
        self.config.output_dir.join(filename)
    }

    /// Package `files` into `<output_dir>/<zip_name>`.
    ///
    /// Entries are deflated and named by their basename. The archive is
    /// written next to its final location and renamed into place, so a failed
    /// run never leaves a truncated archive behind.
    pub async fn save_zip(&self, zip_name: &str, files: &[PathBuf]) -> StorageResult<PathBuf> {
        validate_name(zip_name)?;

        let final_path = self.output_path(zip_name);
        let partial_path = self.output_path(&format!("{}.partial", zip_name));
        let files = files.to_vec();

        let partial = partial_path.clone();
        let written = tokio::task::spawn_blocking(move || write_zip(&partial, &files))
            .await
            .map_err(|e| StorageError::archive_failed(e.to_string()))?;

        if let Err(e) = written {
            let _ = fs::remove_file(&partial_path).await;
            return Err(e);
        }

        fs::rename(&partial_path, &final_path).await?;
        info!("Saved archive {}", final_path.display());
        Ok(final_path)
    }

    /// Delete a single file.
    pub async fn delete_file(&self, path: impl AsRef<Path>) -> StorageResult<()> {
        let path = path.as_ref();
        fs::remove_file(path)
            .await
            .map_err(|e| StorageError::delete_failed(format!("{}: {}", path.display(), e)))?;
        debug!("Deleted file {}", path.display());
        Ok(())
    }

    /// Delete a directory and everything in it. Missing directories are fine.
    pub async fn delete_dir(&self, path: impl AsRef<Path>) -> StorageResult<()> {
        let path = path.as_ref();
        match fs::remove_dir_all(path).await {
            Ok(()) => {
                debug!("Deleted directory {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::delete_failed(format!(
                "{}: {}",
                path.display(),
                e
            ))),
        }
    }
}

/// Reject names that would escape the output directory.
fn validate_name(name: &str) -> StorageResult<()> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(StorageError::invalid_name(name)),
    }
}

fn write_zip(path: &Path, files: &[PathBuf]) -> StorageResult<()> {
    let out = File::create(path)?;
    let mut zip = ZipWriter::new(BufWriter::new(out));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for file in files {
        let entry_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| StorageError::invalid_name(file.display().to_string()))?;

        let mut input = File::open(file)?;
        zip.start_file(entry_name, options)?;
        io::copy(&mut input, &mut zip)?;
    }

    zip.finish()?;
    Ok(())
}
