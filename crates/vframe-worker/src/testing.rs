//! In-memory collaborators for unit tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use vframe_models::{Job, JobId, JobStatus, User};
use vframe_queue::Delivery;
use vframe_storage::StorageError;

use crate::error::{WorkerError, WorkerResult};
use crate::orchestrator::JobOrchestrator;
use crate::ports::{
    Archiver, FrameExtractor, JobStore, MessageSource, Metrics, Notifier, UserDirectory,
};

/// Job store that records every status it persists.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<BTreeMap<JobId, Job>>,
    history: Mutex<Vec<(JobId, JobStatus)>>,
    writes: AtomicUsize,
    failing_status: Mutex<Option<JobStatus>>,
    failing_reads: AtomicBool,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_jobs(jobs: impl IntoIterator<Item = Job>) -> Self {
        let store = Self::new();
        for job in jobs {
            store.insert(job);
        }
        store
    }

    pub fn insert(&self, job: Job) {
        self.history.lock().unwrap().push((job.id, job.status));
        self.jobs.lock().unwrap().insert(job.id, job);
    }

    pub fn job(&self, id: JobId) -> Option<Job> {
        self.jobs.lock().unwrap().get(&id).cloned()
    }

    /// Every status the job has had, starting with its inserted one.
    pub fn statuses(&self, id: JobId) -> Vec<JobStatus> {
        self.history
            .lock()
            .unwrap()
            .iter()
            .filter(|(job_id, _)| *job_id == id)
            .map(|(_, status)| *status)
            .collect()
    }

    /// Status changes of all jobs in the order they were persisted.
    pub fn history(&self) -> Vec<(JobId, JobStatus)> {
        self.history.lock().unwrap().clone()
    }

    /// Number of successful claims and updates.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make updates that would persist `status` fail.
    pub fn fail_updates_to(&self, status: JobStatus) {
        *self.failing_status.lock().unwrap() = Some(status);
    }

    /// Make list queries fail.
    pub fn fail_reads(&self, fail: bool) {
        self.failing_reads.store(fail, Ordering::SeqCst);
    }

    fn check_reads(&self) -> WorkerResult<()> {
        if self.failing_reads.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(())
    }
}

fn unavailable() -> WorkerError {
    WorkerError::Io(std::io::Error::other("database unavailable"))
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, user_id: i64, filename: &str) -> WorkerResult<Job> {
        let id = self
            .jobs
            .lock()
            .unwrap()
            .keys()
            .next_back()
            .map(|id| id.as_i64() + 1)
            .unwrap_or(1);
        let job = Job::new(id, user_id, filename);
        self.insert(job.clone());
        Ok(job)
    }

    async fn get_by_id(&self, id: JobId) -> WorkerResult<Option<Job>> {
        Ok(self.job(id))
    }

    async fn get_pending(&self) -> WorkerResult<Vec<Job>> {
        self.check_reads()?;
        let mut jobs: Vec<Job> = self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|job| job.status == JobStatus::Pending)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| (job.created_at, job.id));
        Ok(jobs)
    }

    async fn get_stale_processing(&self, older_than: DateTime<Utc>) -> WorkerResult<Vec<Job>> {
        self.check_reads()?;
        let mut jobs: Vec<Job> = self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|job| job.status == JobStatus::Processing && job.updated_at < older_than)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| (job.updated_at, job.id));
        Ok(jobs)
    }

    async fn claim(&self, id: JobId, message: &str) -> WorkerResult<bool> {
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Pending => {
                job.start(message)?;
                self.history.lock().unwrap().push((id, job.status));
                self.writes.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update(&self, job: &Job) -> WorkerResult<()> {
        if *self.failing_status.lock().unwrap() == Some(job.status) {
            return Err(unavailable());
        }

        let mut jobs = self.jobs.lock().unwrap();
        let stored = jobs
            .get_mut(&job.id)
            .ok_or(WorkerError::JobNotFound(job.id))?;
        if stored.status != job.status {
            self.history.lock().unwrap().push((job.id, job.status));
        }
        *stored = job.clone();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

type ErrorFactory = Box<dyn Fn() -> WorkerError + Send + Sync>;

/// Frame extractor returning canned frame paths or a canned error.
pub struct FakeExtractor {
    frames: usize,
    error: Option<ErrorFactory>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl FakeExtractor {
    const ROOT: &'static str = "/tmp/vframe-test";

    pub fn frames(count: usize) -> Self {
        Self {
            frames: count,
            error: None,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        let message = message.to_string();
        Self::failing_with(move || WorkerError::processing_failed(message.clone()))
    }

    pub fn failing_with(error: impl Fn() -> WorkerError + Send + Sync + 'static) -> Self {
        Self {
            error: Some(Box::new(error)),
            ..Self::frames(0)
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Directory the fake pretends to write frames of `working_id` into.
    pub fn frames_dir(working_id: &str) -> PathBuf {
        Path::new(Self::ROOT).join(working_id)
    }
}

#[async_trait]
impl FrameExtractor for FakeExtractor {
    async fn extract_frames(&self, _source: &Path, working_id: &str) -> WorkerResult<Vec<PathBuf>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = &self.error {
            return Err(error());
        }
        let dir = Self::frames_dir(working_id);
        Ok((1..=self.frames)
            .map(|i| dir.join(format!("frame_{:04}.png", i)))
            .collect())
    }
}

/// Archiver that records what it was asked to do.
#[derive(Default)]
pub struct FakeArchiver {
    zip_error: Option<String>,
    fail_deletes: bool,
    saved: Mutex<Vec<(String, usize)>>,
    deleted_files: Mutex<Vec<PathBuf>>,
    deleted_dirs: Mutex<Vec<PathBuf>>,
}

impl FakeArchiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_zip(mut self, message: &str) -> Self {
        self.zip_error = Some(message.to_string());
        self
    }

    pub fn failing_deletes(mut self) -> Self {
        self.fail_deletes = true;
        self
    }

    /// Archive names and entry counts.
    pub fn saved(&self) -> Vec<(String, usize)> {
        self.saved.lock().unwrap().clone()
    }

    pub fn deleted_files(&self) -> Vec<PathBuf> {
        self.deleted_files.lock().unwrap().clone()
    }

    pub fn deleted_dirs(&self) -> Vec<PathBuf> {
        self.deleted_dirs.lock().unwrap().clone()
    }

    fn delete_result(&self, path: &Path) -> WorkerResult<()> {
        if self.fail_deletes {
            return Err(StorageError::delete_failed(path.display().to_string()).into());
        }
        Ok(())
    }
}

#[async_trait]
impl Archiver for FakeArchiver {
    fn upload_path(&self, filename: &str) -> PathBuf {
        Path::new("/uploads").join(filename)
    }

    async fn save_zip(&self, name: &str, files: &[PathBuf]) -> WorkerResult<PathBuf> {
        if let Some(message) = &self.zip_error {
            return Err(StorageError::archive_failed(message.clone()).into());
        }
        self.saved.lock().unwrap().push((name.to_string(), files.len()));
        Ok(Path::new("/outputs").join(name))
    }

    async fn delete_file(&self, path: &Path) -> WorkerResult<()> {
        self.deleted_files.lock().unwrap().push(path.to_path_buf());
        self.delete_result(path)
    }

    async fn delete_dir(&self, path: &Path) -> WorkerResult<()> {
        self.deleted_dirs.lock().unwrap().push(path.to_path_buf());
        self.delete_result(path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentEmail>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail_sends(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> WorkerResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(WorkerError::notification_failed("smtp down"));
        }
        self.sent.lock().unwrap().push(SentEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

#[derive(Default)]
pub struct StaticUsers {
    users: Mutex<HashMap<i64, User>>,
}

impl StaticUsers {
    pub fn insert(&self, id: i64, email: &str) {
        self.users.lock().unwrap().insert(
            id,
            User {
                id,
                email: email.to_string(),
                name: format!("User {}", id),
                created_at: Utc::now(),
            },
        );
    }
}

#[async_trait]
impl UserDirectory for StaticUsers {
    async fn get_by_id(&self, user_id: i64) -> WorkerResult<Option<User>> {
        Ok(self.users.lock().unwrap().get(&user_id).cloned())
    }
}

#[derive(Default)]
pub struct RecordingMetrics {
    durations: Mutex<Vec<(String, String, f64)>>,
    counters: Mutex<Vec<(String, String)>>,
}

impl RecordingMetrics {
    pub fn durations(&self) -> Vec<(String, String, f64)> {
        self.durations.lock().unwrap().clone()
    }

    pub fn counters(&self) -> Vec<(String, String)> {
        self.counters.lock().unwrap().clone()
    }
}

impl Metrics for RecordingMetrics {
    fn observe_duration(&self, name: &'static str, status: &'static str, seconds: f64) {
        self.durations
            .lock()
            .unwrap()
            .push((name.to_string(), status.to_string(), seconds));
    }

    fn increment_counter(&self, name: &'static str, status: &'static str) {
        self.counters
            .lock()
            .unwrap()
            .push((name.to_string(), status.to_string()));
    }
}

/// An orchestrator wired to fakes, with handles to inspect them.
pub struct Harness {
    pub store: Arc<InMemoryJobStore>,
    pub extractor: Arc<FakeExtractor>,
    pub archiver: Arc<FakeArchiver>,
    pub notifier: Arc<RecordingNotifier>,
    pub users: Arc<StaticUsers>,
    pub metrics: Arc<RecordingMetrics>,
    pub orchestrator: Arc<JobOrchestrator>,
}

impl Harness {
    /// User 1 owns the jobs and has the address `owner@example.com`.
    pub fn new(jobs: Vec<Job>, extractor: FakeExtractor, archiver: FakeArchiver) -> Self {
        Self::with_store(
            Arc::new(InMemoryJobStore::with_jobs(jobs)),
            extractor,
            archiver,
        )
    }

    pub fn with_store(
        store: Arc<InMemoryJobStore>,
        extractor: FakeExtractor,
        archiver: FakeArchiver,
    ) -> Self {
        let extractor = Arc::new(extractor);
        let archiver = Arc::new(archiver);
        let notifier = Arc::new(RecordingNotifier::default());
        let users = Arc::new(StaticUsers::default());
        users.insert(1, "owner@example.com");
        let metrics = Arc::new(RecordingMetrics::default());

        let orchestrator = JobOrchestrator::new(
            store.clone(),
            extractor.clone(),
            archiver.clone(),
            notifier.clone(),
            users.clone(),
        )
        .with_metrics(metrics.clone());

        Self {
            store,
            extractor,
            archiver,
            notifier,
            users,
            metrics,
            orchestrator: Arc::new(orchestrator),
        }
    }
}

/// Message source backed by a local queue.
///
/// Sleeps briefly when empty so consumer loops yield like a blocking read.
#[derive(Default)]
pub struct QueueSource {
    queue: Mutex<Vec<Delivery>>,
    acked: Mutex<Vec<String>>,
    naked: Mutex<Vec<String>>,
}

impl QueueSource {
    pub fn push(&self, id: &str, payload: &[u8]) {
        self.queue.lock().unwrap().push(Delivery {
            id: id.to_string(),
            payload: payload.to_vec(),
            attempt: 1,
        });
    }

    pub fn acked(&self) -> Vec<String> {
        self.acked.lock().unwrap().clone()
    }

    pub fn naked(&self) -> Vec<String> {
        self.naked.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageSource for QueueSource {
    async fn subscribe(&self) -> WorkerResult<()> {
        Ok(())
    }

    async fn fetch(&self, in_flight: &HashSet<String>) -> WorkerResult<Vec<Delivery>> {
        let batch: Vec<Delivery> = {
            let mut queue = self.queue.lock().unwrap();
            let (ready, waiting): (Vec<_>, Vec<_>) = queue
                .drain(..)
                .partition(|d| !in_flight.contains(&d.id));
            *queue = waiting;
            ready
        };
        if batch.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok(batch)
    }

    async fn ack(&self, id: &str) -> WorkerResult<()> {
        self.acked.lock().unwrap().push(id.to_string());
        Ok(())
    }

    async fn nak(&self, id: &str) -> WorkerResult<()> {
        self.naked.lock().unwrap().push(id.to_string());
        Ok(())
    }
}
