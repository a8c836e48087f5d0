//! Polling fallback.
//!
//! Periodically scans the job store for PENDING jobs and processes them
//! oldest first. Covers events that were lost or published while the broker
//! subscription was down.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::ports::{JobProcessor, JobStore};
use crate::shutdown::{is_shutdown, wait_for_shutdown};

/// Outcome of one scan.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollReport {
    /// PENDING jobs returned by the store
    pub found: usize,
    /// Jobs processed without error
    pub processed: usize,
    /// Jobs whose processing returned an error
    pub failed: usize,
    /// Stuck PROCESSING jobs marked failed
    pub reconciled: usize,
    /// Shutdown was observed before the batch finished
    pub cancelled: bool,
}

pub struct PollingFallback {
    store: Arc<dyn JobStore>,
    processor: Arc<dyn JobProcessor>,
    interval: Duration,
    stale_after: Option<Duration>,
}

impl PollingFallback {
    pub fn new(store: Arc<dyn JobStore>, processor: Arc<dyn JobProcessor>, interval: Duration) -> Self {
        Self {
            store,
            processor,
            interval,
            stale_after: None,
        }
    }

    /// Also fail PROCESSING jobs that have not been updated for `after`.
    pub fn with_stale_reconciliation(mut self, after: Option<Duration>) -> Self {
        self.stale_after = after;
        self
    }

    /// Scan every `interval` until shutdown. The first scan happens one
    /// interval after start.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Starting polling fallback every {:?}", self.interval);

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let due = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => false,
                _ = ticker.tick() => true,
            };
            if !due {
                break;
            }

            let report = self.tick(&shutdown).await;
            if report.found > 0 || report.reconciled > 0 {
                info!(
                    found = report.found,
                    processed = report.processed,
                    failed = report.failed,
                    reconciled = report.reconciled,
                    "Polling scan finished"
                );
            }
        }

        info!("Polling fallback stopped");
    }

    /// Run one scan. A job already being processed is always finished; jobs
    /// after it are skipped once shutdown is observed.
    pub async fn tick(&self, shutdown: &watch::Receiver<bool>) -> PollReport {
        let mut report = PollReport::default();

        match self.store.get_pending().await {
            Ok(jobs) => {
                report.found = jobs.len();
                if !jobs.is_empty() {
                    debug!("Found {} pending jobs", jobs.len());
                }

                for job in jobs {
                    if is_shutdown(shutdown) {
                        report.cancelled = true;
                        break;
                    }
                    match self.processor.process(job.id).await {
                        Ok(()) => report.processed += 1,
                        Err(e) => {
                            report.failed += 1;
                            error!(job_id = %job.id, "Error processing pending job: {}", e);
                        }
                    }
                }
            }
            Err(e) => error!("Error fetching pending jobs: {}", e),
        }

        if let Some(after) = self.stale_after {
            if !report.cancelled {
                report.reconciled = self.reconcile_stale(after).await;
            }
        }

        report
    }

    async fn reconcile_stale(&self, after: Duration) -> usize {
        let Ok(after) = chrono::Duration::from_std(after) else {
            warn!("Stale threshold {:?} out of range, skipping reconciliation", after);
            return 0;
        };

        let jobs = match self.store.get_stale_processing(Utc::now() - after).await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!("Error fetching stale jobs: {}", e);
                return 0;
            }
        };

        let mut reconciled = 0;
        for job in jobs {
            match self.processor.reconcile_stale(job.id).await {
                Ok(true) => reconciled += 1,
                Ok(false) => {}
                Err(e) => error!(job_id = %job.id, "Error reconciling stale job: {}", e),
            }
        }
        reconciled
    }
}
