//! Job orchestrator.
//!
//! Drives a single job from PENDING to COMPLETED or FAILED. Both the event
//! consumer and the polling fallback call [`JobProcessor::process`]; the
//! conditional claim in the job store guarantees only one of them wins a
//! given job.
//!
//! Side effects that must never change the outcome (deleting the upload and
//! the extracted frames, emailing the owner) are collected as [`BestEffort`]
//! actions and run after the job's status has been decided and persisted.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use vframe_media::MediaError;
use vframe_models::{Job, JobId, JobStatus};

use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics::{names, status, NoopMetrics};
use crate::notify::failure_email;
use crate::ports::{Archiver, FrameExtractor, JobProcessor, JobStore, Metrics, Notifier, UserDirectory};

/// Message stored when a job is claimed.
pub const PROCESSING_MESSAGE: &str = "Processing started...";

/// Message stored when a stuck PROCESSING job is reconciled.
pub const INTERRUPTED_MESSAGE: &str =
    "Processing interrupted: the worker stopped before the job finished";

/// A side effect whose failure is logged and otherwise ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BestEffort {
    DeleteFile(PathBuf),
    DeleteDir(PathBuf),
    NotifyFailure {
        user_id: i64,
        filename: String,
        message: String,
    },
}

impl BestEffort {
    fn describe(&self) -> String {
        match self {
            BestEffort::DeleteFile(path) => format!("delete file {}", path.display()),
            BestEffort::DeleteDir(path) => format!("delete directory {}", path.display()),
            BestEffort::NotifyFailure { user_id, .. } => format!("notify user {}", user_id),
        }
    }
}

/// Frame count as stored on the job. Counts that do not fit are an error.
fn frame_count(extracted: usize) -> WorkerResult<u32> {
    u32::try_from(extracted).map_err(|_| {
        WorkerError::processing_failed(format!("{} frames exceed the supported maximum", extracted))
    })
}

/// Removes a job from the in-flight set when dropped.
struct InFlight<'a> {
    registry: &'a Mutex<HashSet<JobId>>,
    job_id: JobId,
}

impl<'a> InFlight<'a> {
    fn register(registry: &'a Mutex<HashSet<JobId>>, job_id: JobId) -> Self {
        registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id);
        Self { registry, job_id }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.job_id);
    }
}

/// The job state machine.
pub struct JobOrchestrator {
    store: Arc<dyn JobStore>,
    extractor: Arc<dyn FrameExtractor>,
    archiver: Arc<dyn Archiver>,
    notifier: Arc<dyn Notifier>,
    users: Arc<dyn UserDirectory>,
    metrics: Arc<dyn Metrics>,
    in_flight: Mutex<HashSet<JobId>>,
}

impl JobOrchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        extractor: Arc<dyn FrameExtractor>,
        archiver: Arc<dyn Archiver>,
        notifier: Arc<dyn Notifier>,
        users: Arc<dyn UserDirectory>,
    ) -> Self {
        Self {
            store,
            extractor,
            archiver,
            notifier,
            users,
            metrics: Arc::new(NoopMetrics),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Whether this instance is currently processing `job_id`.
    pub fn is_in_flight(&self, job_id: JobId) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&job_id)
    }

    /// Extract, archive and finalize a claimed job.
    ///
    /// Returns the outcome and the best-effort actions to run afterwards.
    async fn run(&self, job: &mut Job, logger: &JobLogger) -> (WorkerResult<()>, Vec<BestEffort>) {
        let source = self.archiver.upload_path(&job.filename);

        let frames = match self.extractor.extract_frames(&source, &job.working_id()).await {
            Ok(frames) if frames.is_empty() => {
                let err = WorkerError::from(MediaError::NoFramesExtracted);
                let message = format!("Error processing video: {}", err);
                return self.fail(job, source, message, err, logger).await;
            }
            Ok(frames) => frames,
            Err(err) => {
                let message = format!("Error processing video: {}", err);
                return self.fail(job, source, message, err, logger).await;
            }
        };
        let frame_count = match frame_count(frames.len()) {
            Ok(count) => count,
            Err(err) => {
                let message = format!("Error processing video: {}", err);
                return self.fail(job, source, message, err, logger).await;
            }
        };
        logger.log_progress(&format!("{} frames extracted", frame_count));

        let archive_name = job.archive_name();
        if let Err(err) = self.archiver.save_zip(&archive_name, &frames).await {
            let message = format!("Error creating ZIP: {}", err);
            return self.fail(job, source, message, err, logger).await;
        }

        let mut cleanup = vec![BestEffort::DeleteFile(source)];
        if let Some(frames_dir) = frames.first().and_then(|frame| frame.parent()) {
            cleanup.push(BestEffort::DeleteDir(frames_dir.to_path_buf()));
        }

        if let Err(err) = job.complete(archive_name, frame_count) {
            return (Err(err.into()), cleanup);
        }

        match self.store.update(job).await {
            Ok(()) => {
                logger.log_completion(&job.message);
                (Ok(()), cleanup)
            }
            Err(err) => {
                logger.log_error(&format!("Failed to persist completion: {}", err));
                (Err(err), cleanup)
            }
        }
    }

    /// Mark the job FAILED and schedule source deletion and owner notification.
    ///
    /// A failed status write is logged only; `error` is still returned.
    async fn fail(
        &self,
        job: &mut Job,
        source: PathBuf,
        message: String,
        error: WorkerError,
        logger: &JobLogger,
    ) -> (WorkerResult<()>, Vec<BestEffort>) {
        logger.log_error(&message);

        match job.fail(message.as_str()) {
            Ok(()) => {
                if let Err(e) = self.store.update(job).await {
                    logger.log_error(&format!("Failed to persist failure: {}", e));
                }
            }
            Err(e) => logger.log_error(&e.to_string()),
        }

        let actions = vec![
            BestEffort::DeleteFile(source),
            BestEffort::NotifyFailure {
                user_id: job.user_id,
                filename: job.filename.clone(),
                message,
            },
        ];
        (Err(error), actions)
    }

    async fn run_best_effort(&self, logger: &JobLogger, actions: Vec<BestEffort>) {
        for action in actions {
            let outcome = match &action {
                BestEffort::DeleteFile(path) => self.archiver.delete_file(path).await,
                BestEffort::DeleteDir(path) => self.archiver.delete_dir(path).await,
                BestEffort::NotifyFailure {
                    user_id,
                    filename,
                    message,
                } => self.notify_failure(*user_id, filename, message).await,
            };

            if let Err(e) = outcome {
                logger.log_warning(&format!("Could not {}: {}", action.describe(), e));
            }
        }
    }

    async fn notify_failure(&self, user_id: i64, filename: &str, message: &str) -> WorkerResult<()> {
        let user = match self.users.get_by_id(user_id).await? {
            Some(user) if user.has_email() => user,
            _ => {
                warn!(user_id, "User not found or has no email, skipping notification");
                return Ok(());
            }
        };

        let (subject, body) = failure_email(&user, filename, message);
        self.notifier.send_email(&user.email, &subject, &body).await
    }

    fn record_metrics(&self, started: Instant, outcome: &WorkerResult<()>) {
        let label = if outcome.is_ok() {
            status::SUCCESS
        } else {
            status::ERROR
        };
        self.metrics.observe_duration(
            names::PROCESSING_DURATION_SECONDS,
            label,
            started.elapsed().as_secs_f64(),
        );
        self.metrics
            .increment_counter(names::VIDEOS_PROCESSED_TOTAL, label);
    }
}

#[async_trait]
impl JobProcessor for JobOrchestrator {
    async fn process(&self, job_id: JobId) -> WorkerResult<()> {
        let Some(job) = self.store.get_by_id(job_id).await? else {
            warn!(job_id = %job_id, "Job not found");
            return Err(WorkerError::JobNotFound(job_id));
        };

        if job.status != JobStatus::Pending {
            debug!(job_id = %job_id, status = %job.status, "Job already handled, skipping");
            return Ok(());
        }

        if !self.store.claim(job_id, PROCESSING_MESSAGE).await? {
            info!(job_id = %job_id, "Job claimed by another trigger, skipping");
            return Ok(());
        }
        let _in_flight = InFlight::register(&self.in_flight, job_id);

        let mut job = job;
        job.start(PROCESSING_MESSAGE)?;

        let logger = JobLogger::new(job_id, "frame_extraction");
        logger.log_start(&job.filename);
        let started = Instant::now();

        let (outcome, actions) = self.run(&mut job, &logger).await;
        self.run_best_effort(&logger, actions).await;
        self.record_metrics(started, &outcome);

        outcome
    }

    async fn reconcile_stale(&self, job_id: JobId) -> WorkerResult<bool> {
        if self.is_in_flight(job_id) {
            debug!(job_id = %job_id, "Job still in flight, not reconciling");
            return Ok(false);
        }

        let Some(mut job) = self.store.get_by_id(job_id).await? else {
            return Err(WorkerError::JobNotFound(job_id));
        };
        if job.status != JobStatus::Processing {
            return Ok(false);
        }

        job.fail(INTERRUPTED_MESSAGE)?;
        self.store.update(&job).await?;

        let logger = JobLogger::new(job_id, "stale_reconciliation");
        logger.log_warning("Marked stuck job as failed");
        self.run_best_effort(
            &logger,
            vec![BestEffort::NotifyFailure {
                user_id: job.user_id,
                filename: job.filename.clone(),
                message: job.message.clone(),
            }],
        )
        .await;

        Ok(true)
    }
}
