//! Queue adapters for export jobs.
//!
//! Two interchangeable backends share the submit/poll surface:
//!
//! - [`memory::MemoryQueue`]: in-process FIFO, single attempt per job,
//!   nothing survives a restart.
//! - [`redis::RedisQueue`]: Redis-backed queue with configurable attempts
//!   and fixed backoff, safe for distributed workers.
//!
//! The backend is chosen once at startup; callers hold an `ExportQueue`
//! trait object and never branch on the deployment flag.

pub mod memory;
pub mod redis;

use anyhow::Result;
use async_trait::async_trait;

use crate::job::{ExportRequest, JobRecord};

/// Submit/poll surface common to both queue backends.
///
/// `get_job` returns a read-only snapshot that never exposes the payload.
#[async_trait]
pub trait ExportQueue: Send + Sync {
    async fn enqueue(&self, payload: ExportRequest) -> Result<JobRecord>;
    async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>>;
}
