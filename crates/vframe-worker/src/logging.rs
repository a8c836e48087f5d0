//! Structured job logging.

use tracing::{error, info, warn};
use vframe_models::JobId;

/// Logs job lifecycle events with the job ID and trigger attached.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: JobId,
    operation: &'static str,
}

impl JobLogger {
    /// `operation` names the pipeline step, e.g. `"frame_extraction"`.
    pub fn new(job_id: JobId, operation: &'static str) -> Self {
        Self { job_id, operation }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = self.operation,
            "Job started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = self.operation,
            "Job progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            operation = self.operation,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            operation = self.operation,
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = self.operation,
            "Job completed: {}", message
        );
    }
}
