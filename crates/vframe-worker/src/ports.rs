//! Collaborator interfaces used by the worker core.
//!
//! The orchestrator, consumer and poller only see these traits. Concrete
//! adapters live in [`crate::adapters`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use vframe_models::{Job, JobId, User};
use vframe_queue::Delivery;

use crate::error::WorkerResult;

/// Persisted job records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, user_id: i64, filename: &str) -> WorkerResult<Job>;

    /// `None` when the job does not exist.
    async fn get_by_id(&self, id: JobId) -> WorkerResult<Option<Job>>;

    /// PENDING jobs, oldest first.
    async fn get_pending(&self) -> WorkerResult<Vec<Job>>;

    /// PROCESSING jobs last updated before `older_than`, oldest first.
    async fn get_stale_processing(&self, older_than: DateTime<Utc>) -> WorkerResult<Vec<Job>>;

    /// Atomically move a PENDING job to PROCESSING.
    ///
    /// Returns `false` if the job was no longer PENDING.
    async fn claim(&self, id: JobId, message: &str) -> WorkerResult<bool>;

    async fn update(&self, job: &Job) -> WorkerResult<()>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FrameExtractor: Send + Sync {
    /// Extract frames from `source` into a directory scoped by `working_id`.
    ///
    /// Returns frame paths in order. Never returns an empty list.
    async fn extract_frames(&self, source: &Path, working_id: &str) -> WorkerResult<Vec<PathBuf>>;
}

/// Upload and archive files.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Archiver: Send + Sync {
    fn upload_path(&self, filename: &str) -> PathBuf;

    async fn save_zip(&self, name: &str, files: &[PathBuf]) -> WorkerResult<PathBuf>;

    async fn delete_file(&self, path: &Path) -> WorkerResult<()>;

    async fn delete_dir(&self, path: &Path) -> WorkerResult<()>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> WorkerResult<()>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_by_id(&self, user_id: i64) -> WorkerResult<Option<User>>;
}

/// Observability sink.
pub trait Metrics: Send + Sync {
    fn observe_duration(&self, name: &'static str, status: &'static str, seconds: f64);

    fn increment_counter(&self, name: &'static str, status: &'static str);
}

/// Durable, manually acknowledged source of upload events.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Establish the durable subscription.
    async fn subscribe(&self) -> WorkerResult<()>;

    /// Next batch of deliveries, skipping the IDs still being handled.
    async fn fetch(&self, in_flight: &HashSet<String>) -> WorkerResult<Vec<Delivery>>;

    async fn ack(&self, id: &str) -> WorkerResult<()>;

    async fn nak(&self, id: &str) -> WorkerResult<()>;
}

/// Entry point shared by the event consumer and the polling fallback.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobProcessor: Send + Sync {
    /// Drive a PENDING job to COMPLETED or FAILED. Idempotent.
    async fn process(&self, job_id: JobId) -> WorkerResult<()>;

    /// Fail a job stuck in PROCESSING. Returns whether it was changed.
    async fn reconcile_stale(&self, job_id: JobId) -> WorkerResult<bool>;
}
