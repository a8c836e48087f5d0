//! Video-to-frames archive worker.
//!
//! This crate provides:
//! - Job orchestration (claim, extract, archive, finalize, clean up)
//! - Upload event consumption with ack/nak semantics
//! - A polling fallback for jobs whose events were lost
//! - Failure notifications, metrics and graceful shutdown

pub mod adapters;
pub mod config;
pub mod consumer;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod notify;
pub mod orchestrator;
pub mod poller;
pub mod ports;
pub mod retry;
pub mod shutdown;

#[cfg(test)]
pub mod testing;

pub use config::WorkerConfig;
pub use consumer::{Disposition, EventConsumer};
pub use error::{WorkerError, WorkerResult};
pub use logging::JobLogger;
pub use metrics::{NoopMetrics, PrometheusMetrics};
pub use notify::{notifier_from_env, LogNotifier, SmtpNotifier};
pub use orchestrator::JobOrchestrator;
pub use poller::{PollReport, PollingFallback};
pub use ports::{
    Archiver, FrameExtractor, JobProcessor, JobStore, MessageSource, Metrics, Notifier,
    UserDirectory,
};
