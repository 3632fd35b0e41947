//! Job models and state management for the export queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

use crate::error::codes;

/// Lifecycle status of an export job: `queued -> processing -> {completed, failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Output document format requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Pptx,
    Pdf,
}

/// Where a content item was lifted from in the source notebook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Origin {
    pub notebook_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cell_index: Option<u32>,
}

/// A single execution output attached to a `notebook_code` item.
///
/// Field names follow the Jupyter output convention and are passed through
/// to the render service untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeOutput {
    pub output_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

/// One block of report content.
///
/// A closed union so the metadata-enrichment scan over `origin` is
/// exhaustive rather than a speculative walk over loose JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    NotebookMarkdown {
        source: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        origin: Option<Origin>,
    },
    NotebookCode {
        source: String,
        #[serde(default)]
        outputs: Vec<CodeOutput>,
        #[serde(skip_serializing_if = "Option::is_none")]
        origin: Option<Origin>,
    },
    TextBox {
        content: String,
    },
}

impl ContentItem {
    /// Returns the notebook name this item originated from, if any.
    pub fn notebook_name(&self) -> Option<&str> {
        match self {
            ContentItem::NotebookMarkdown { origin, .. }
            | ContentItem::NotebookCode { origin, .. } => {
                origin.as_ref().map(|o| o.notebook_name.as_str())
            }
            ContentItem::TextBox { .. } => None,
        }
    }
}

/// An export request as submitted by the client, the payload of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    pub title: String,
    pub content: Vec<ContentItem>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_path: Option<String>,
    #[serde(default)]
    pub format: ExportFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Uniform result shape produced by the pipeline for one export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResult {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_group: Option<String>,
}

impl ExportResult {
    pub fn completed(job_id: impl Into<String>, download_url: Option<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Completed,
            download_url,
            error: None,
            error_code: None,
            error_group: None,
        }
    }

    pub fn failed(
        job_id: impl Into<String>,
        error: impl Into<String>,
        error_code: impl Into<String>,
        error_group: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Failed,
            download_url: None,
            error: Some(error.into()),
            error_code: Some(error_code.into()),
            error_group: Some(error_group.into()),
        }
    }
}

/// What a queue processor reports back for one attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutcome {
    pub status: JobStatus,
    pub download_url: Option<String>,
    pub error: Option<String>,
    pub error_code: Option<String>,
}

impl ProcessOutcome {
    pub fn completed(download_url: Option<String>) -> Self {
        Self {
            status: JobStatus::Completed,
            download_url,
            error: None,
            error_code: None,
        }
    }

    pub fn failed(error: Option<String>, error_code: Option<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            download_url: None,
            error,
            error_code,
        }
    }
}

/// One export job tracked end-to-end.
///
/// The payload is owned exclusively by the queue until a worker claims it;
/// snapshots handed to callers never carry it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<ExportRequest>,
    pub attempts_made: u32,
    pub attempts_max: u32,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl JobRecord {
    /// Creates a freshly queued record owning the payload.
    pub fn new(payload: ExportRequest, attempts_max: u32) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            status: JobStatus::Queued,
            payload: Some(payload),
            attempts_made: 0,
            attempts_max,
            progress: 0,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            duration_ms: None,
            download_url: None,
            error: None,
            error_code: None,
        }
    }

    /// Marks the start of one processing attempt.
    ///
    /// Sets `started_at` for this attempt cycle and increments
    /// `attempts_made` exactly once.
    pub fn begin_attempt(&mut self) {
        self.status = JobStatus::Processing;
        self.started_at = Some(Utc::now());
        self.attempts_made += 1;
    }

    /// Applies a processor outcome and stamps the terminal timestamps.
    pub fn finish(&mut self, outcome: ProcessOutcome) {
        match outcome.status {
            JobStatus::Failed => {
                self.status = JobStatus::Failed;
                self.error = outcome.error.or_else(|| Some("failed".to_string()));
                self.error_code = outcome
                    .error_code
                    .or_else(|| Some(codes::WORKER_FAILED.to_string()));
            }
            _ => {
                self.status = JobStatus::Completed;
                self.download_url = outcome.download_url;
            }
        }
        self.stamp_finished();
    }

    /// Records an unexpected fault raised while processing.
    pub fn finish_with_fault(&mut self, message: String) {
        self.status = JobStatus::Failed;
        self.error = Some(message);
        self.error_code = Some(codes::WORKER_THROW.to_string());
        self.stamp_finished();
    }

    fn stamp_finished(&mut self) {
        let now = Utc::now();
        self.finished_at = Some(now);
        if let Some(started) = self.started_at {
            self.duration_ms = Some(now.signed_duration_since(started).num_milliseconds().max(0));
        }
    }

    /// Read-only view of the record with the payload stripped.
    pub fn snapshot(&self) -> JobRecord {
        let mut copy = self.clone();
        copy.payload = None;
        copy
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Completed | JobStatus::Failed)
    }
}
