//! Video-to-frames worker binary.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vframe_db::{DbConfig, PgJobRepository, PgUserRepository};
use vframe_media::check_ffmpeg;
use vframe_queue::UploadStream;
use vframe_storage::{FsStorage, StorageConfig};
use vframe_worker::metrics::init_exporter;
use vframe_worker::retry::{with_retries, Backoff};
use vframe_worker::shutdown::termination_signal;
use vframe_worker::{
    notifier_from_env, EventConsumer, JobOrchestrator, PollingFallback, PrometheusMetrics,
    WorkerConfig,
};

const DB_CONNECT_ATTEMPTS: u32 = 10;
const DB_CONNECT_DELAY: Duration = Duration::from_secs(3);

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,vframe_worker=info,vframe_queue=info,sqlx=warn")
    });

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting vframe-worker");

    let config = match WorkerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid worker configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!("Worker config: {:?}", config);

    match check_ffmpeg() {
        Ok(path) => info!("Using ffmpeg at {}", path.display()),
        Err(e) => {
            error!("FFmpeg is not available: {}", e);
            std::process::exit(1);
        }
    }

    if let Some(addr) = config.metrics_addr {
        match init_exporter(addr) {
            Ok(()) => info!("Prometheus metrics listening on {}", addr),
            Err(e) => warn!("Metrics disabled: {}", e),
        }
    }

    let db_config = match DbConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Invalid database configuration: {}", e);
            std::process::exit(1);
        }
    };

    let backoff = Backoff::fixed(DB_CONNECT_ATTEMPTS, DB_CONNECT_DELAY);
    let pool = match with_retries("database", backoff, || vframe_db::create_pool(&db_config)).await {
        Ok(pool) => pool,
        Err((e, attempts)) => {
            error!("Could not connect to the database after {} attempts: {}", attempts, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = vframe_db::migrate(&pool).await {
        error!("Database migration failed: {}", e);
        std::process::exit(1);
    }
    info!("Connected to the database");

    let storage_config = StorageConfig::from_env();
    let mut extractor = vframe_media::FrameExtractor::new(storage_config.temp_dir.clone());
    if let Some(secs) = config.ffmpeg_timeout_secs {
        extractor = extractor.with_timeout(secs);
    }
    let storage = match FsStorage::new(storage_config).await {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to prepare storage directories: {}", e);
            std::process::exit(1);
        }
    };

    let jobs = Arc::new(PgJobRepository::new(pool.clone()));
    let orchestrator = Arc::new(
        JobOrchestrator::new(
            jobs.clone(),
            Arc::new(extractor),
            Arc::new(storage),
            notifier_from_env(),
            Arc::new(PgUserRepository::new(pool)),
        )
        .with_metrics(Arc::new(PrometheusMetrics)),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    match UploadStream::from_env() {
        Ok(stream) => {
            let consumer = EventConsumer::new(
                Arc::new(stream),
                orchestrator.clone(),
                config.max_concurrent_messages,
                config.shutdown_timeout,
            );
            match consumer.subscribe().await {
                Ok(()) => {
                    let rx = shutdown_rx.clone();
                    tasks.push(tokio::spawn(async move { consumer.run(rx).await }));
                }
                Err(e) => warn!("Event subscription failed, running on polling only: {}", e),
            }
        }
        Err(e) => warn!("Event broker unavailable, running on polling only: {}", e),
    }

    let poller = PollingFallback::new(jobs, orchestrator, config.poll_interval)
        .with_stale_reconciliation(config.stale_processing_after);
    let rx = shutdown_rx.clone();
    tasks.push(tokio::spawn(async move { poller.run(rx).await }));

    termination_signal().await;
    info!("Shutting down");
    shutdown_tx.send(true).ok();

    for result in futures::future::join_all(tasks).await {
        if let Err(e) = result {
            error!("Worker task failed: {}", e);
        }
    }

    info!("Worker shutdown complete");
}
