//! Worker error types.

use thiserror::Error;
use vframe_models::{JobId, TransitionError};

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job {0} not found")]
    JobNotFound(JobId),

    #[error("Processing failed: {0}")]
    ProcessingFailed(String),

    #[error("Notification failed: {0}")]
    NotificationFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),

    #[error("Invalid transition: {0}")]
    Transition(#[from] TransitionError),

    #[error("Database error: {0}")]
    Db(#[from] vframe_db::DbError),

    #[error("Storage error: {0}")]
    Storage(#[from] vframe_storage::StorageError),

    #[error("Media error: {0}")]
    Media(#[from] vframe_media::MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] vframe_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn processing_failed(msg: impl Into<String>) -> Self {
        Self::ProcessingFailed(msg.into())
    }

    pub fn notification_failed(msg: impl Into<String>) -> Self {
        Self::NotificationFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn subscription_failed(msg: impl Into<String>) -> Self {
        Self::SubscriptionFailed(msg.into())
    }

    /// The job does not exist. Retrying will not help.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            WorkerError::JobNotFound(_) | WorkerError::Db(vframe_db::DbError::JobNotFound(_))
        )
    }
}
