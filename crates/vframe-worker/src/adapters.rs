//! Port implementations for the concrete collaborator crates.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use vframe_db::{PgJobRepository, PgUserRepository};
use vframe_media::FrameExtractor as FfmpegFrameExtractor;
use vframe_models::{Job, JobId, User};
use vframe_queue::{Delivery, UploadStream};
use vframe_storage::FsStorage;

use crate::error::{WorkerError, WorkerResult};
use crate::ports::{Archiver, FrameExtractor, JobStore, MessageSource, UserDirectory};

#[async_trait]
impl JobStore for PgJobRepository {
    async fn create(&self, user_id: i64, filename: &str) -> WorkerResult<Job> {
        Ok(PgJobRepository::create(self, user_id, filename).await?)
    }

    async fn get_by_id(&self, id: JobId) -> WorkerResult<Option<Job>> {
        Ok(PgJobRepository::get_by_id(self, id).await?)
    }

    async fn get_pending(&self) -> WorkerResult<Vec<Job>> {
        Ok(PgJobRepository::get_pending(self).await?)
    }

    async fn get_stale_processing(&self, older_than: DateTime<Utc>) -> WorkerResult<Vec<Job>> {
        Ok(PgJobRepository::get_stale_processing(self, older_than).await?)
    }

    async fn claim(&self, id: JobId, message: &str) -> WorkerResult<bool> {
        Ok(PgJobRepository::claim(self, id, message).await?)
    }

    async fn update(&self, job: &Job) -> WorkerResult<()> {
        PgJobRepository::update(self, job).await?;
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for PgUserRepository {
    async fn get_by_id(&self, user_id: i64) -> WorkerResult<Option<User>> {
        Ok(PgUserRepository::get_by_id(self, user_id).await?)
    }
}

#[async_trait]
impl FrameExtractor for FfmpegFrameExtractor {
    async fn extract_frames(&self, source: &Path, working_id: &str) -> WorkerResult<Vec<PathBuf>> {
        Ok(FfmpegFrameExtractor::extract_frames(self, source, working_id).await?)
    }
}

#[async_trait]
impl Archiver for FsStorage {
    fn upload_path(&self, filename: &str) -> PathBuf {
        FsStorage::upload_path(self, filename)
    }

    async fn save_zip(&self, name: &str, files: &[PathBuf]) -> WorkerResult<PathBuf> {
        Ok(FsStorage::save_zip(self, name, files).await?)
    }

    async fn delete_file(&self, path: &Path) -> WorkerResult<()> {
        Ok(FsStorage::delete_file(self, path).await?)
    }

    async fn delete_dir(&self, path: &Path) -> WorkerResult<()> {
        Ok(FsStorage::delete_dir(self, path).await?)
    }
}

#[async_trait]
impl MessageSource for UploadStream {
    async fn subscribe(&self) -> WorkerResult<()> {
        self.init()
            .await
            .map_err(|e| WorkerError::subscription_failed(e.to_string()))
    }

    async fn fetch(&self, in_flight: &HashSet<String>) -> WorkerResult<Vec<Delivery>> {
        Ok(UploadStream::fetch(self, in_flight).await?)
    }

    async fn ack(&self, id: &str) -> WorkerResult<()> {
        Ok(UploadStream::ack(self, id).await?)
    }

    async fn nak(&self, id: &str) -> WorkerResult<()> {
        Ok(UploadStream::nak(self, id).await?)
    }
}
