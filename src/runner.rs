//! Worker runners driving the two queue backends.
//!
//! Liveness is separate from any one job's correctness: a tick or a
//! claimed job may fail in any way and the loops keep running.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::codes;
use crate::job::{JobRecord, JobStatus};
use crate::metrics::MetricsSink;
use crate::pipeline::{process_export, ExportPipeline};
use crate::queue::memory::MemoryQueue;
use crate::queue::redis::RedisQueue;
use crate::telemetry;

/// Timer-driven runner for the ephemeral backend.
///
/// Fires `process_next` on a fixed interval on one logical task; only one
/// tick executes at a time.
pub struct PollRunner {
    queue: Arc<MemoryQueue>,
    pipeline: Arc<ExportPipeline>,
    metrics: MetricsSink,
    interval: Duration,
}

impl PollRunner {
    pub fn new(
        queue: Arc<MemoryQueue>,
        pipeline: Arc<ExportPipeline>,
        metrics: MetricsSink,
        interval: Duration,
    ) -> Self {
        Self {
            queue,
            pipeline,
            metrics,
            interval,
        }
    }

    /// Polls until cancelled. Any tick fault is logged and swallowed.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        info!(interval_ms = self.interval.as_millis() as u64, "poll runner started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.tick_once().await {
                        warn!("export tick failed: {e:#}");
                    }
                }
            }
        }
        info!("poll runner stopped");
    }

    /// Processes at most one queued job.
    pub async fn tick_once(&self) -> Result<()> {
        let pipeline = self.pipeline.clone();
        let processed = self
            .queue
            .process_next(|payload| async move { process_export(&pipeline, payload).await })
            .await?;
        if let Some(record) = processed {
            self.observe_terminal(&record);
        }
        Ok(())
    }

    fn observe_terminal(&self, record: &JobRecord) {
        match record.status {
            JobStatus::Completed => self.metrics.job_completed(record.duration_ms),
            JobStatus::Failed => self.metrics.job_failed(
                record.error_code.as_deref().unwrap_or(codes::WORKER_FAILED),
                record.duration_ms,
            ),
            _ => return,
        }
        telemetry::record_job_span(record);
    }
}

/// Concurrent runner for the durable backend.
///
/// Spawns `concurrency` worker loops; each claims jobs from Redis and
/// resolves them independently, so up to N jobs are in flight at once.
pub struct DurableRunner {
    queue: RedisQueue,
    pipeline: Arc<ExportPipeline>,
    metrics: MetricsSink,
    concurrency: usize,
}

impl DurableRunner {
    pub fn new(
        queue: RedisQueue,
        pipeline: Arc<ExportPipeline>,
        metrics: MetricsSink,
        concurrency: usize,
    ) -> Self {
        Self {
            queue,
            pipeline,
            metrics,
            concurrency: concurrency.max(1),
        }
    }

    /// Runs the worker loops until cancelled, then waits for them to drain.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(self.concurrency);
        for worker_id in 0..self.concurrency {
            let queue = self.queue.clone();
            let pipeline = self.pipeline.clone();
            let metrics = self.metrics;
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                worker_loop(worker_id, queue, pipeline, metrics, shutdown).await;
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
        info!("durable runner stopped");
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: RedisQueue,
    pipeline: Arc<ExportPipeline>,
    metrics: MetricsSink,
    shutdown: CancellationToken,
) {
    info!(worker_id, "worker started");
    loop {
        // Claiming pops from Redis before the status key is written, so
        // the claim future must never be dropped mid-flight. Shutdown is
        // checked between claims; the bounded BLPOP timeout caps exit
        // latency.
        if shutdown.is_cancelled() {
            break;
        }
        let job = match queue.claim_next().await {
            Ok(Some(job)) => job,
            Ok(None) => continue,
            Err(e) => {
                error!(worker_id, "failed to claim job: {e:#}");
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
        };

        let payload = job.payload.clone();
        let outcome = process_export(&pipeline, payload).await;

        let resolved: Result<Option<JobRecord>> = match outcome {
            Ok(outcome) if outcome.status == JobStatus::Completed => {
                queue.complete(job, outcome.download_url).await.map(Some)
            }
            Ok(outcome) => {
                queue
                    .fail_attempt(
                        job,
                        outcome.error.unwrap_or_else(|| "failed".to_string()),
                        outcome
                            .error_code
                            .unwrap_or_else(|| codes::WORKER_FAILED.to_string()),
                    )
                    .await
            }
            Err(fault) => {
                queue
                    .fail_attempt(job, format!("{fault:#}"), codes::WORKER_THROW.to_string())
                    .await
            }
        };

        match resolved {
            Ok(Some(record)) => observe_terminal(&metrics, &record),
            Ok(None) => {} // retry scheduled, not terminal yet
            Err(e) => error!(worker_id, "failed to record job outcome: {e:#}"),
        }
    }
    info!(worker_id, "worker stopped");
}

fn observe_terminal(metrics: &MetricsSink, record: &JobRecord) {
    match record.status {
        JobStatus::Completed => {
            info!(
                event = "export.completed",
                job_id = %record.job_id,
                download_url = record.download_url.as_deref().unwrap_or(""),
                duration_ms = record.duration_ms.unwrap_or(0),
                "export job completed"
            );
            metrics.job_completed(record.duration_ms);
        }
        JobStatus::Failed => {
            error!(
                event = "export.failed",
                job_id = %record.job_id,
                error = record.error.as_deref().unwrap_or(""),
                error_code = record.error_code.as_deref().unwrap_or(""),
                attempts_made = record.attempts_made,
                "export job failed"
            );
            metrics.job_failed(
                record.error_code.as_deref().unwrap_or(codes::WORKER_FAILED),
                record.duration_ms,
            );
        }
        _ => return,
    }
    telemetry::record_job_span(record);
}
