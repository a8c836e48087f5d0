//! Database error types.

use thiserror::Error;
use vframe_models::JobId;

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Job {0} not found")]
    JobNotFound(JobId),

    #[error("Invalid row: {0}")]
    InvalidRow(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl DbError {
    pub fn invalid_row(msg: impl Into<String>) -> Self {
        Self::InvalidRow(msg.into())
    }
}
