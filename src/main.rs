//! Report Export Worker Service
//!
//! This worker consumes export jobs from a queue and resolves them through
//! the export pipeline: metadata enrichment, template auto-selection, and
//! a call to the external rendering service.
//!
//! ## Architecture
//!
//! - **Queue**: in-memory FIFO or Redis list (`exports:queue`), selected
//!   once at startup via `EXPORT_QUEUE`
//! - **Status**: job records polled by id (Redis keys `exports:job:{job_id}`
//!   on the durable backend)
//! - **Pipeline**: enrichment + template resolution + render call
//! - **Telemetry**: OpenTelemetry OTLP export, `metrics` counters
//!
//! ## Configuration
//!
//! See [`export_worker::config::Config`] for the environment variables.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use export_worker::config::{Config, QueueBackend};
use export_worker::metrics::MetricsSink;
use export_worker::pipeline::{ExportPipeline, NullDirectory};
use export_worker::queue::memory::MemoryQueue;
use export_worker::queue::redis::RedisQueue;
use export_worker::render::HttpRenderClient;
use export_worker::runner::{DurableRunner, PollRunner};
use export_worker::telemetry;
use export_worker::template::MemoryCatalog;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Initialize OpenTelemetry
    if let Err(e) = telemetry::init_telemetry() {
        warn!("Failed to initialize telemetry: {}", e);
    }

    info!("Starting export worker service");

    let config = Config::from_env();
    info!(
        backend = ?config.queue_backend,
        render_url = %config.render_url,
        concurrency = config.concurrency,
        "Configuration loaded"
    );

    let metrics = MetricsSink::new();
    let renderer = Arc::new(
        HttpRenderClient::new(&config.render_url, config.render_timeout)
            .context("Failed to build render client")?,
    );
    // Directory and catalog wiring points for the embedding service; the
    // standalone worker runs without backing stores.
    let pipeline = Arc::new(ExportPipeline::new(
        Arc::new(NullDirectory),
        Arc::new(NullDirectory),
        Arc::new(MemoryCatalog::new()),
        renderer,
    ));

    let shutdown = CancellationToken::new();
    let runner_handle = match config.queue_backend {
        QueueBackend::Memory => {
            let queue = Arc::new(MemoryQueue::new());
            let runner = Arc::new(PollRunner::new(
                queue,
                pipeline,
                metrics,
                config.poll_interval,
            ));
            let shutdown = shutdown.clone();
            tokio::spawn(async move { runner.run(shutdown).await })
        }
        QueueBackend::Redis => {
            let queue = RedisQueue::connect(&config.redis_url, config.retry_policy())
                .await
                .context("Failed to connect to Redis")?;
            info!("Connected to Redis");
            let runner = Arc::new(DurableRunner::new(
                queue,
                pipeline,
                metrics,
                config.concurrency,
            ));
            let shutdown = shutdown.clone();
            tokio::spawn(async move { runner.run(shutdown).await })
        }
    };

    info!("Worker service ready, press Ctrl+C to shutdown");
    signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    info!("Received shutdown signal, waiting for workers to finish...");
    shutdown.cancel();
    let _ = runner_handle.await;

    info!("Worker service shutdown complete");
    Ok(())
}
