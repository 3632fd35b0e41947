//! In-process ephemeral job queue.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Mutex;
use tracing::debug;

use crate::job::{ExportRequest, JobRecord, ProcessOutcome};
use crate::metrics::MetricsSink;
use crate::queue::ExportQueue;

/// Single attempt per job; the ephemeral backend never retries.
const EPHEMERAL_ATTEMPTS_MAX: u32 = 1;

struct Registry {
    fifo: VecDeque<String>,
    jobs: HashMap<String, JobRecord>,
}

/// In-memory FIFO queue plus job registry.
///
/// Enqueue may interleave with one in-flight `process_next`; the shared
/// registry sits behind a single mutex and the lock is never held across
/// an await.
pub struct MemoryQueue {
    registry: Mutex<Registry>,
    metrics: MetricsSink,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Registry {
                fifo: VecDeque::new(),
                jobs: HashMap::new(),
            }),
            metrics: MetricsSink::new(),
        }
    }

    /// Pops the oldest queued job and resolves it with `processor`.
    ///
    /// Returns `Ok(None)` without side effects when the queue is empty.
    /// A processor `Err` is captured as a failed job with code
    /// `WORKER_THROW`; the error never propagates to the caller.
    pub async fn process_next<F, Fut>(&self, processor: F) -> Result<Option<JobRecord>>
    where
        F: FnOnce(ExportRequest) -> Fut,
        Fut: Future<Output = Result<ProcessOutcome>>,
    {
        let (job_id, payload) = {
            let mut registry = self.registry.lock().unwrap();
            let Some(job_id) = registry.fifo.pop_front() else {
                return Ok(None);
            };
            let job = registry
                .jobs
                .get_mut(&job_id)
                .ok_or_else(|| anyhow::anyhow!("job {job_id} missing from registry"))?;
            job.begin_attempt();
            let payload = job
                .payload
                .clone()
                .ok_or_else(|| anyhow::anyhow!("job {job_id} has no payload"))?;
            (job_id, payload)
        };

        debug!(job_id = %job_id, "processing next queued job");
        let outcome = processor(payload).await;

        let mut registry = self.registry.lock().unwrap();
        let job = registry
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| anyhow::anyhow!("job {job_id} missing from registry"))?;
        match outcome {
            Ok(outcome) => job.finish(outcome),
            Err(fault) => job.finish_with_fault(format!("{fault:#}")),
        }
        Ok(Some(job.snapshot()))
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.registry.lock().unwrap().fifo.len()
    }
}

#[async_trait]
impl ExportQueue for MemoryQueue {
    async fn enqueue(&self, payload: ExportRequest) -> Result<JobRecord> {
        let record = JobRecord::new(payload, EPHEMERAL_ATTEMPTS_MAX);
        let snapshot = record.snapshot();
        {
            let mut registry = self.registry.lock().unwrap();
            registry.fifo.push_back(record.job_id.clone());
            registry.jobs.insert(record.job_id.clone(), record);
        }
        self.metrics.job_enqueued();
        debug!(job_id = %snapshot.job_id, "enqueued export job");
        Ok(snapshot)
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>> {
        let registry = self.registry.lock().unwrap();
        Ok(registry.jobs.get(job_id).map(JobRecord::snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::codes;
    use crate::job::{ContentItem, ExportFormat, JobStatus};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn request(title: &str) -> ExportRequest {
        ExportRequest {
            title: title.to_string(),
            content: vec![ContentItem::TextBox {
                content: "body".to_string(),
            }],
            metadata: serde_json::Map::new(),
            template_id: None,
            template_path: None,
            format: ExportFormat::Pptx,
            user_id: None,
        }
    }

    #[tokio::test]
    async fn enqueue_returns_fresh_queued_ids() {
        let queue = MemoryQueue::new();
        let a = queue.enqueue(request("a")).await.unwrap();
        let b = queue.enqueue(request("b")).await.unwrap();
        assert_eq!(a.status, JobStatus::Queued);
        assert_eq!(b.status, JobStatus::Queued);
        assert_ne!(a.job_id, b.job_id);
        assert!(a.payload.is_none(), "snapshot must not expose payload");
    }

    #[tokio::test]
    async fn process_next_on_empty_queue_is_a_noop() {
        let queue = MemoryQueue::new();
        let processed = queue
            .process_next(|_| async { Ok(ProcessOutcome::completed(None)) })
            .await
            .unwrap();
        assert!(processed.is_none());
        assert_eq!(queue.len(), 0);
    }

    #[tokio::test]
    async fn jobs_resolve_in_fifo_order() {
        let queue = MemoryQueue::new();
        queue.enqueue(request("first")).await.unwrap();
        queue.enqueue(request("second")).await.unwrap();

        let first = queue
            .process_next(|payload| async move {
                assert_eq!(payload.title, "first");
                Ok(ProcessOutcome::completed(Some("/dl/1.pptx".to_string())))
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.status, JobStatus::Completed);
        assert_eq!(first.attempts_made, 1);
        assert_eq!(first.download_url.as_deref(), Some("/dl/1.pptx"));

        let second = queue
            .process_next(|payload| async move {
                assert_eq!(payload.title, "second");
                Ok(ProcessOutcome::completed(None))
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn explicit_failure_and_fault_map_to_distinct_codes() {
        let queue = MemoryQueue::new();
        queue.enqueue(request("explicit")).await.unwrap();
        queue.enqueue(request("fault")).await.unwrap();

        let explicit = queue
            .process_next(|_| async {
                Ok(ProcessOutcome::failed(
                    Some("render rejected".to_string()),
                    None,
                ))
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(explicit.status, JobStatus::Failed);
        assert_eq!(explicit.error_code.as_deref(), Some(codes::WORKER_FAILED));

        let fault = queue
            .process_next(|_| async { anyhow::bail!("connection reset") })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fault.status, JobStatus::Failed);
        assert_eq!(fault.error_code.as_deref(), Some(codes::WORKER_THROW));
        assert_eq!(fault.error.as_deref(), Some("connection reset"));
    }

    #[tokio::test]
    async fn terminal_jobs_have_consistent_timestamps() {
        let queue = MemoryQueue::new();
        queue.enqueue(request("timing")).await.unwrap();
        let job = queue
            .process_next(|_| async {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                Ok(ProcessOutcome::completed(None))
            })
            .await
            .unwrap()
            .unwrap();
        let started = job.started_at.unwrap();
        let finished = job.finished_at.unwrap();
        assert!(finished >= started);
        assert_eq!(
            job.duration_ms.unwrap(),
            finished
                .signed_duration_since(started)
                .num_milliseconds()
                .max(0)
        );
    }

    #[tokio::test]
    async fn enqueue_interleaves_with_in_flight_processing() {
        let queue = Arc::new(MemoryQueue::new());
        queue.enqueue(request("running")).await.unwrap();

        let enqueuer = queue.clone();
        let processed = queue
            .process_next(|_| async move {
                // A request handler submitting while this job is in flight.
                enqueuer.enqueue(request("late")).await?;
                Ok(ProcessOutcome::completed(None))
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(processed.status, JobStatus::Completed);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn enqueue_increments_the_enqueued_counter() {
        use metrics_util::debugging::{DebugValue, DebuggingRecorder};

        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        metrics::with_local_recorder(&recorder, || {
            rt.block_on(async {
                let queue = MemoryQueue::new();
                queue.enqueue(request("counted")).await.unwrap();
                queue.enqueue(request("counted too")).await.unwrap();
            });
        });

        let count = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .find(|(key, _, _, _)| key.key().name() == "export_jobs_enqueued_total")
            .map(|(_, _, _, value)| value);
        assert_eq!(count, Some(DebugValue::Counter(2)));
    }

    #[tokio::test]
    async fn get_job_reports_unknown_ids_as_not_found() {
        let queue = MemoryQueue::new();
        assert!(queue.get_job("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_job_reflects_terminal_state() {
        let queue = MemoryQueue::new();
        let rec = queue.enqueue(request("tracked")).await.unwrap();
        queue
            .process_next(|_| async { Ok(ProcessOutcome::completed(None)) })
            .await
            .unwrap();
        let fetched = queue.get_job(&rec.job_id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Completed);
        assert!(fetched.payload.is_none());
    }
}
