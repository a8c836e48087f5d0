//! Worker configuration.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{WorkerError, WorkerResult};

const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:9090";

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Interval between polling fallback scans
    pub poll_interval: Duration,
    /// Upload events handled concurrently
    pub max_concurrent_messages: usize,
    /// Grace period for in-flight work on shutdown
    pub shutdown_timeout: Duration,
    /// PROCESSING jobs untouched for longer than this are marked failed.
    /// `None` disables reconciliation.
    pub stale_processing_after: Option<Duration>,
    /// Kill a single FFmpeg run after this many seconds
    pub ffmpeg_timeout_secs: Option<u64>,
    /// Prometheus exporter listen address, `None` when disabled
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            max_concurrent_messages: 2,
            shutdown_timeout: Duration::from_secs(10),
            stale_processing_after: None,
            ffmpeg_timeout_secs: None,
            metrics_addr: DEFAULT_METRICS_ADDR.parse().ok(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> WorkerResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            poll_interval: std::env::var("WORKER_POLL_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.poll_interval),
            max_concurrent_messages: std::env::var("WORKER_MAX_MESSAGES")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_concurrent_messages),
            shutdown_timeout: std::env::var("WORKER_SHUTDOWN_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
            stale_processing_after: std::env::var("WORKER_STALE_PROCESSING_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            ffmpeg_timeout_secs: std::env::var("WORKER_FFMPEG_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|secs| *secs > 0),
            metrics_addr: parse_metrics_addr(std::env::var("METRICS_ADDR").ok().as_deref())?,
        })
    }
}

fn parse_metrics_addr(value: Option<&str>) -> WorkerResult<Option<SocketAddr>> {
    match value.map(str::trim) {
        None => Ok(DEFAULT_METRICS_ADDR.parse().ok()),
        Some("") => Ok(None),
        Some(addr) => addr
            .parse()
            .map(Some)
            .map_err(|e| WorkerError::config_error(format!("METRICS_ADDR '{}': {}", addr, e))),
    }
}
