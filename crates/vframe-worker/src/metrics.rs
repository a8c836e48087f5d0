//! Prometheus metrics for the worker.

use std::net::SocketAddr;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{WorkerError, WorkerResult};
use crate::ports::Metrics;

/// Metric names as constants for consistency.
pub mod names {
    pub const PROCESSING_DURATION_SECONDS: &str = "worker_video_processing_duration_seconds";
    pub const VIDEOS_PROCESSED_TOTAL: &str = "worker_videos_processed_total";
}

/// Label values for the `status` label.
pub mod status {
    pub const SUCCESS: &str = "success";
    pub const ERROR: &str = "error";
}

/// Install the Prometheus recorder and serve `/metrics` on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_exporter(addr: SocketAddr) -> WorkerResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter: {}", e)))
}

/// Forwards to the global `metrics` recorder.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusMetrics;

impl Metrics for PrometheusMetrics {
    fn observe_duration(&self, name: &'static str, status: &'static str, seconds: f64) {
        histogram!(name, "status" => status).record(seconds);
    }

    fn increment_counter(&self, name: &'static str, status: &'static str) {
        counter!(name, "status" => status).increment(1);
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn observe_duration(&self, _name: &'static str, _status: &'static str, _seconds: f64) {}

    fn increment_counter(&self, _name: &'static str, _status: &'static str) {}
}
