//! Row types for the `videos` and `users` tables.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use vframe_models::{Job, JobId, JobStatus, User};

use crate::error::{DbError, DbResult};

/// A row from the `videos` table.
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: i64,
    pub user_id: i64,
    pub filename: String,
    pub status: String,
    pub zip_path: Option<String>,
    pub frame_count: Option<i32>,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = DbError;

    fn try_from(row: JobRow) -> DbResult<Self> {
        let status: JobStatus = row
            .status
            .parse()
            .map_err(|e: vframe_models::job::UnknownStatus| DbError::invalid_row(e.to_string()))?;

        let frame_count = row
            .frame_count
            .map(u32::try_from)
            .transpose()
            .map_err(|_| DbError::invalid_row(format!("negative frame_count for video {}", row.id)))?;

        Ok(Job {
            id: JobId(row.id),
            user_id: row.user_id,
            filename: row.filename,
            status,
            zip_path: row.zip_path.filter(|p| !p.is_empty()),
            frame_count,
            message: row.message.unwrap_or_default(),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Column value for a job's frame count. Counts beyond `INTEGER` are rejected.
pub(crate) fn frame_count_column(job: &Job) -> DbResult<Option<i32>> {
    job.frame_count
        .map(i32::try_from)
        .transpose()
        .map_err(|_| DbError::invalid_row(format!("frame_count out of range for video {}", job.id)))
}

/// A row from the `users` table. The password hash is never selected.
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            email: row.email,
            name: row.name,
            created_at: row.created_at,
        }
    }
}
