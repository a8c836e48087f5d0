//! Repository for the `videos` table.
//!
//! Status values are written through [`JobStatus::as_str`]; no status literal
//! appears in a query string.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use vframe_models::{Job, JobId, JobStatus};

use crate::error::{DbError, DbResult};
use crate::models::{frame_count_column, JobRow};

/// Column list for `videos` queries.
const COLUMNS: &str = "\
    id, user_id, filename, status, zip_path, frame_count, message, \
    created_at, updated_at";

/// Jobs backed by Postgres.
#[derive(Debug, Clone)]
pub struct PgJobRepository {
    pool: PgPool,
}

impl PgJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new pending job.
    pub async fn create(&self, user_id: i64, filename: &str) -> DbResult<Job> {
        let query = format!(
            "INSERT INTO videos (user_id, filename, status) \
             VALUES ($1, $2, $3) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(user_id)
            .bind(filename)
            .bind(JobStatus::Pending.as_str())
            .fetch_one(&self.pool)
            .await?;
        row.try_into()
    }

    /// Find a job by ID. `None` when no row exists.
    pub async fn get_by_id(&self, id: JobId) -> DbResult<Option<Job>> {
        let query = format!("SELECT {COLUMNS} FROM videos WHERE id = $1");
        sqlx::query_as::<_, JobRow>(&query)
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?
            .map(Job::try_from)
            .transpose()
    }

    /// All pending jobs, oldest first.
    pub async fn get_pending(&self) -> DbResult<Vec<Job>> {
        self.list_by_status(JobStatus::Pending, None).await
    }

    /// Processing jobs whose last update is older than `older_than`.
    pub async fn get_stale_processing(&self, older_than: DateTime<Utc>) -> DbResult<Vec<Job>> {
        self.list_by_status(JobStatus::Processing, Some(older_than))
            .await
    }

    async fn list_by_status(
        &self,
        status: JobStatus,
        updated_before: Option<DateTime<Utc>>,
    ) -> DbResult<Vec<Job>> {
        let query = format!(
            "SELECT {COLUMNS} FROM videos \
             WHERE status = $1 AND ($2::timestamptz IS NULL OR updated_at < $2) \
             ORDER BY created_at ASC, id ASC"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(status.as_str())
            .bind(updated_before)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Job::try_from)
            .collect()
    }

    /// Atomically move a job from `PENDING` to `PROCESSING`.
    ///
    /// Returns `false` when the job was not pending any more, meaning another
    /// caller already claimed it.
    pub async fn claim(&self, id: JobId, message: &str) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE videos SET status = $2, message = $3, updated_at = NOW() \
             WHERE id = $1 AND status = $4",
        )
        .bind(id.as_i64())
        .bind(JobStatus::Processing.as_str())
        .bind(message)
        .bind(JobStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Persist status, archive fields and message. Returns the new `updated_at`.
    pub async fn update(&self, job: &Job) -> DbResult<DateTime<Utc>> {
        let frame_count = frame_count_column(job)?;
        let updated_at: Option<(DateTime<Utc>,)> = sqlx::query_as(
            "UPDATE videos \
             SET status = $2, zip_path = $3, frame_count = $4, message = $5, updated_at = NOW() \
             WHERE id = $1 \
             RETURNING updated_at",
        )
        .bind(job.id.as_i64())
        .bind(job.status.as_str())
        .bind(job.zip_path.as_deref())
        .bind(frame_count)
        .bind(&job.message)
        .fetch_optional(&self.pool)
        .await?;

        updated_at
            .map(|(ts,)| ts)
            .ok_or(DbError::JobNotFound(job.id))
    }
}
