//! Redis-backed durable job queue.
//!
//! Jobs travel through a Redis list (FIFO) and are mirrored into per-job
//! status keys for client polling. The stored value is the broker-native
//! [`DurableJob`]; callers only ever see the normalized
//! [`JobRecord`](crate::job::JobRecord) produced by [`DurableJob::to_record`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{aio::ConnectionManager, AsyncCommands};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::job::{ExportRequest, JobRecord, JobStatus};
use crate::metrics::MetricsSink;
use crate::queue::ExportQueue;

/// Queue key for pending export jobs.
const QUEUE_KEY: &str = "exports:queue";

/// Sorted set of jobs waiting out a retry backoff, scored by due time
/// (epoch milliseconds). Entries survive process restarts; any worker
/// promotes due jobs back into the FIFO.
const DELAYED_KEY: &str = "exports:delayed";

/// Status key prefix for job polling.
const JOB_KEY_PREFIX: &str = "exports:job";

/// Status key TTL in seconds (24 hours). Pruning stale records is resource
/// hygiene, not a correctness requirement.
const JOB_TTL_SECONDS: u64 = 86400;

/// Dequeue blocking timeout in seconds.
const DEQUEUE_TIMEOUT_SECS: f64 = 5.0;

/// Retry policy fixed at enqueue time.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts_max: u32,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts_max: 2,
            backoff_ms: 1000,
        }
    }
}

/// Broker-native lifecycle state. `active` is surfaced as `processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurableState {
    Queued,
    Active,
    Completed,
    Failed,
}

/// Broker-native job object as stored in Redis.
///
/// Field names mirror the broker's bookkeeping (`timestamp`,
/// `processedOn`, `finishedOn`, `attemptsMade`); the translation into the
/// public record shape happens in one place, [`Self::to_record`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DurableJob {
    pub id: String,
    pub payload: ExportRequest,
    pub state: DurableState,
    pub attempts_made: u32,
    pub attempts_max: u32,
    pub backoff_ms: u64,
    pub progress: u8,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_on: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_on: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl DurableJob {
    fn new(payload: ExportRequest, policy: RetryPolicy) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            payload,
            state: DurableState::Queued,
            attempts_made: 0,
            attempts_max: policy.attempts_max,
            backoff_ms: policy.backoff_ms,
            progress: 0,
            timestamp: Utc::now(),
            processed_on: None,
            finished_on: None,
            return_url: None,
            failed_reason: None,
            error_code: None,
        }
    }

    /// Normalizes broker fields into the shared record shape.
    ///
    /// The payload is never exposed, and the retry sub-state is invisible:
    /// a job waiting on backoff reads as `queued` with `attemptsMade`
    /// increased.
    pub fn to_record(&self) -> JobRecord {
        let status = match self.state {
            DurableState::Queued => JobStatus::Queued,
            DurableState::Active => JobStatus::Processing,
            DurableState::Completed => JobStatus::Completed,
            DurableState::Failed => JobStatus::Failed,
        };
        let duration_ms = match (self.processed_on, self.finished_on) {
            (Some(started), Some(finished)) => Some(
                finished
                    .signed_duration_since(started)
                    .num_milliseconds()
                    .max(0),
            ),
            _ => None,
        };
        JobRecord {
            job_id: self.id.clone(),
            status,
            payload: None,
            attempts_made: self.attempts_made,
            attempts_max: self.attempts_max,
            progress: self.progress,
            created_at: self.timestamp,
            started_at: self.processed_on,
            finished_at: self.finished_on,
            duration_ms,
            download_url: if status == JobStatus::Completed {
                self.return_url.clone()
            } else {
                None
            },
            error: if status == JobStatus::Failed {
                self.failed_reason.clone()
            } else {
                None
            },
            error_code: if status == JobStatus::Failed {
                self.error_code.clone()
            } else {
                None
            },
        }
    }

    fn job_key(id: &str) -> String {
        format!("{JOB_KEY_PREFIX}:{id}")
    }
}

/// Durable queue adapter over Redis.
///
/// Delivery is at-least-once: a worker that dies mid-job loses neither
/// the status key nor other queued jobs, and attempts are bounded by the
/// enqueue-time policy.
#[derive(Clone)]
pub struct RedisQueue {
    conn: ConnectionManager,
    policy: RetryPolicy,
    metrics: MetricsSink,
}

impl RedisQueue {
    pub fn new(conn: ConnectionManager, policy: RetryPolicy) -> Self {
        Self {
            conn,
            policy,
            metrics: MetricsSink::new(),
        }
    }

    /// Connects to Redis and builds the queue.
    pub async fn connect(redis_url: &str, policy: RetryPolicy) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;
        Ok(Self::new(conn, policy))
    }

    async fn write_job(&self, job: &DurableJob) -> Result<()> {
        let job_json = serde_json::to_string(job).context("Failed to serialize job")?;
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(DurableJob::job_key(&job.id), &job_json, JOB_TTL_SECONDS)
            .await
            .context("Failed to write job status")?;
        Ok(())
    }

    async fn push_job(&self, job: &DurableJob) -> Result<()> {
        let job_json = serde_json::to_string(job).context("Failed to serialize job")?;
        let mut conn = self.conn.clone();
        conn.rpush::<_, _, ()>(QUEUE_KEY, &job_json)
            .await
            .context("Failed to push job to queue")?;
        Ok(())
    }

    /// Moves jobs whose backoff has elapsed from the delayed set back into
    /// the FIFO.
    ///
    /// ZREM is the claim: with several workers promoting concurrently,
    /// only the one that removes the entry re-pushes it.
    async fn promote_due(&self) -> Result<usize> {
        let mut conn = self.conn.clone();
        let now = Utc::now().timestamp_millis();
        let due: Vec<String> = conn
            .zrangebyscore_limit(DELAYED_KEY, 0, now, 0, 16)
            .await
            .context("Failed to read delayed jobs")?;
        let mut promoted = 0;
        for job_json in due {
            let removed: i64 = conn
                .zrem(DELAYED_KEY, &job_json)
                .await
                .context("Failed to remove delayed job")?;
            if removed == 1 {
                conn.rpush::<_, _, ()>(QUEUE_KEY, &job_json)
                    .await
                    .context("Failed to promote delayed job")?;
                promoted += 1;
            }
        }
        Ok(promoted)
    }

    /// Blocks up to the dequeue timeout for the next job and claims it.
    ///
    /// Promotes due retries first, then pops. Claiming marks the job
    /// `active`, stamps `processedOn` for this attempt cycle, and
    /// increments `attemptsMade` exactly once.
    pub async fn claim_next(&self) -> Result<Option<DurableJob>> {
        self.promote_due().await?;
        let mut conn = self.conn.clone();
        let popped: Option<(String, String)> = conn
            .blpop(QUEUE_KEY, DEQUEUE_TIMEOUT_SECS)
            .await
            .context("Failed to pop job from queue")?;
        let Some((_key, job_json)) = popped else {
            return Ok(None);
        };
        let mut job: DurableJob =
            serde_json::from_str(&job_json).context("Failed to deserialize job")?;
        job.state = DurableState::Active;
        job.processed_on = Some(Utc::now());
        job.attempts_made += 1;
        self.write_job(&job).await?;
        debug!(job_id = %job.id, attempt = job.attempts_made, "claimed export job");
        Ok(Some(job))
    }

    /// Marks a claimed job completed.
    pub async fn complete(&self, mut job: DurableJob, download_url: Option<String>) -> Result<JobRecord> {
        job.state = DurableState::Completed;
        job.finished_on = Some(Utc::now());
        job.return_url = download_url;
        job.failed_reason = None;
        job.error_code = None;
        self.write_job(&job).await?;
        Ok(job.to_record())
    }

    /// Records a failed attempt.
    ///
    /// With attempts remaining the job is parked in the delayed set until
    /// its backoff elapses and `Ok(None)` is returned; otherwise the job
    /// is terminal and its final record is returned. The parked entry
    /// lives in Redis, so a pending retry survives process exit.
    pub async fn fail_attempt(
        &self,
        mut job: DurableJob,
        error: String,
        error_code: String,
    ) -> Result<Option<JobRecord>> {
        job.failed_reason = Some(error);
        job.error_code = Some(error_code);

        if job.attempts_made < job.attempts_max {
            job.state = DurableState::Queued;
            self.write_job(&job).await?;
            let job_json = serde_json::to_string(&job).context("Failed to serialize job")?;
            let due = Utc::now().timestamp_millis() + job.backoff_ms as i64;
            let mut conn = self.conn.clone();
            conn.zadd::<_, _, _, ()>(DELAYED_KEY, &job_json, due)
                .await
                .context("Failed to schedule retry")?;
            info!(
                job_id = %job.id,
                attempts_made = job.attempts_made,
                attempts_max = job.attempts_max,
                backoff_ms = job.backoff_ms,
                "export job failed, retry scheduled"
            );
            return Ok(None);
        }

        job.state = DurableState::Failed;
        job.finished_on = Some(Utc::now());
        self.write_job(&job).await?;
        warn!(
            job_id = %job.id,
            attempts_made = job.attempts_made,
            "export job failed permanently, attempts exhausted"
        );
        Ok(Some(job.to_record()))
    }

    /// Current number of pending jobs.
    pub async fn queue_length(&self) -> Result<usize> {
        let mut conn = self.conn.clone();
        let len: usize = conn
            .llen(QUEUE_KEY)
            .await
            .context("Failed to get queue length")?;
        Ok(len)
    }
}

#[async_trait]
impl ExportQueue for RedisQueue {
    async fn enqueue(&self, payload: ExportRequest) -> Result<JobRecord> {
        let job = DurableJob::new(payload, self.policy);
        self.push_job(&job).await?;
        self.write_job(&job).await?;
        self.metrics.job_enqueued();
        info!(
            job_id = %job.id,
            attempts_max = job.attempts_max,
            "enqueued export job"
        );
        Ok(job.to_record())
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>> {
        let mut conn = self.conn.clone();
        let job_json: Option<String> = conn
            .get(DurableJob::job_key(job_id))
            .await
            .context("Failed to get job status")?;
        match job_json {
            Some(json) => {
                let job: DurableJob =
                    serde_json::from_str(&json).context("Failed to deserialize job status")?;
                Ok(Some(job.to_record()))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{ContentItem, ExportFormat};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

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

    #[test]
    fn durable_view_normalizes_broker_fields() {
        let mut job = DurableJob::new(request("view"), RetryPolicy::default());
        assert_eq!(job.to_record().status, JobStatus::Queued);

        job.state = DurableState::Active;
        job.processed_on = Some(Utc::now());
        job.attempts_made = 1;
        let record = job.to_record();
        assert_eq!(record.status, JobStatus::Processing);
        assert_eq!(record.attempts_made, 1);
        assert!(record.payload.is_none());
        assert!(record.download_url.is_none());

        job.state = DurableState::Completed;
        job.finished_on = Some(Utc::now());
        job.return_url = Some("/dl/view.pptx".to_string());
        let record = job.to_record();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.download_url.as_deref(), Some("/dl/view.pptx"));
        assert!(record.duration_ms.unwrap() >= 0);
    }

    #[test]
    fn retry_substate_reads_as_queued() {
        let mut job = DurableJob::new(request("retry"), RetryPolicy::default());
        job.attempts_made = 1;
        job.state = DurableState::Queued;
        job.failed_reason = Some("transient".to_string());
        job.error_code = Some("TIMEOUT".to_string());
        let record = job.to_record();
        assert_eq!(record.status, JobStatus::Queued);
        assert!(record.error.is_none(), "retry bookkeeping stays internal");
        assert!(record.error_code.is_none());
        assert_eq!(record.attempts_made, 1);
    }

    // Note: These tests require a running Redis instance.
    // Run with: docker run -d -p 6379:6379 redis:7-alpine

    async fn live_queue() -> RedisQueue {
        RedisQueue::connect("redis://127.0.0.1/", RetryPolicy::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    #[ignore]
    async fn test_enqueue_claim_complete() {
        let queue = live_queue().await;
        let rec = queue.enqueue(request("live")).await.unwrap();
        assert_eq!(rec.status, JobStatus::Queued);

        let claimed = queue.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.attempts_made, 1);

        let done = queue
            .complete(claimed, Some("/dl/live.pptx".to_string()))
            .await
            .unwrap();
        assert_eq!(done.status, JobStatus::Completed);

        let polled = queue.get_job(&rec.job_id).await.unwrap().unwrap();
        assert_eq!(polled.status, JobStatus::Completed);
        assert_eq!(polled.download_url.as_deref(), Some("/dl/live.pptx"));
    }

    #[tokio::test]
    #[ignore]
    async fn test_fail_attempt_schedules_retry_then_exhausts() {
        let queue = RedisQueue::connect(
            "redis://127.0.0.1/",
            RetryPolicy {
                attempts_max: 2,
                backoff_ms: 50,
            },
        )
        .await
        .unwrap();

        let rec = queue.enqueue(request("flaky")).await.unwrap();
        let first = queue.claim_next().await.unwrap().unwrap();
        let retried = queue
            .fail_attempt(first, "boom".to_string(), "WORKER_FAILED".to_string())
            .await
            .unwrap();
        assert!(retried.is_none(), "first failure must schedule a retry");

        let polled = queue.get_job(&rec.job_id).await.unwrap().unwrap();
        assert_eq!(polled.status, JobStatus::Queued);
        assert_eq!(polled.attempts_made, 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let second = queue.claim_next().await.unwrap().unwrap();
        assert_eq!(second.attempts_made, 2);
        let terminal = queue
            .fail_attempt(second, "boom".to_string(), "WORKER_FAILED".to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(terminal.status, JobStatus::Failed);
        assert_eq!(terminal.attempts_made, terminal.attempts_max);
        assert_eq!(terminal.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    #[ignore]
    async fn test_scheduled_retry_survives_reconnect() {
        let policy = RetryPolicy {
            attempts_max: 2,
            backoff_ms: 50,
        };
        let queue = RedisQueue::connect("redis://127.0.0.1/", policy)
            .await
            .unwrap();

        let rec = queue.enqueue(request("restarted")).await.unwrap();
        let first = queue.claim_next().await.unwrap().unwrap();
        let retried = queue
            .fail_attempt(first, "boom".to_string(), "WORKER_FAILED".to_string())
            .await
            .unwrap();
        assert!(retried.is_none());
        drop(queue);

        // A fresh connection, as after a worker restart, must still find
        // and claim the scheduled retry once its backoff has elapsed.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let queue = RedisQueue::connect("redis://127.0.0.1/", policy)
            .await
            .unwrap();
        let second = queue.claim_next().await.unwrap().unwrap();
        assert_eq!(second.id, rec.job_id);
        assert_eq!(second.attempts_made, 2);
    }
}
