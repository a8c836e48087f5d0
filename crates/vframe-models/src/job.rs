//! Job definitions and the status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Unique identifier for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl JobId {
    /// Get the inner integer.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl From<i64> for JobId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job processing status.
///
/// Transitions form a total order: `Pending -> Processing -> {Completed, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Uploaded, waiting for a worker
    #[default]
    Pending,
    /// Claimed by a worker
    Processing,
    /// Archive produced
    Completed,
    /// Extraction or archiving failed
    Failed,
}

impl JobStatus {
    /// Get the persisted representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "PROCESSING" => Ok(JobStatus::Processing),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A persisted status string that is not one of the known states.
#[derive(Debug, Clone, Error)]
#[error("Unknown job status: {0}")]
pub struct UnknownStatus(pub String);

/// An attempted status change that would break the state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid transition for job {job_id}: {from} -> {to}")]
pub struct TransitionError {
    pub job_id: JobId,
    pub from: JobStatus,
    pub to: JobStatus,
}

/// A video-to-frames conversion request and its persisted state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Job ID (the upload's video id)
    pub id: JobId,
    /// Owning user
    pub user_id: i64,
    /// Uploaded filename
    pub filename: String,
    /// Current status
    pub status: JobStatus,
    /// Archive name, set only when completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zip_path: Option<String>,
    /// Number of extracted frames, set only when completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_count: Option<u32>,
    /// Progress or error text
    #[serde(default)]
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new pending job.
    pub fn new(id: impl Into<JobId>, user_id: i64, filename: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            user_id,
            filename: filename.into(),
            status: JobStatus::Pending,
            zip_path: None,
            frame_count: None,
            message: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Filename with its extension stripped.
    ///
    /// Scopes temporary artifacts and the archive name to this job.
    pub fn working_id(&self) -> String {
        working_id(&self.filename)
    }

    /// Deterministic archive name for this job.
    pub fn archive_name(&self) -> String {
        format!("frames_{}.zip", self.working_id())
    }

    /// Move to `Processing`.
    pub fn start(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(JobStatus::Processing)?;
        self.message = message.into();
        Ok(())
    }

    /// Move to `Completed` and record the archive.
    pub fn complete(
        &mut self,
        zip_path: impl Into<String>,
        frame_count: u32,
    ) -> Result<(), TransitionError> {
        self.transition(JobStatus::Completed)?;
        self.zip_path = Some(zip_path.into());
        self.frame_count = Some(frame_count);
        self.message = format!("Processing complete! {} frames extracted.", frame_count);
        Ok(())
    }

    /// Move to `Failed` with an error message.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(JobStatus::Failed)?;
        self.zip_path = None;
        self.frame_count = None;
        self.message = message.into();
        Ok(())
    }

    fn transition(&mut self, next: JobStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                job_id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Strip the final extension from a filename.
pub fn working_id(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string())
}
