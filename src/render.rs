//! Client for the external rendering service.
//!
//! One outbound call per export, bounded by a configurable timeout. Every
//! failure mode is folded into a failed [`ExportResult`] with a stable
//! `errorCode`; this module never raises past its boundary.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

use crate::error::{codes, groups};
use crate::job::{ContentItem, ExportFormat, ExportResult, JobStatus};

/// Placeholder job id for failures that never reached the remote queue.
const NO_JOB_ID: &str = "n/a";

/// Body of `POST /export`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderRequest {
    pub title: String,
    pub content: Vec<ContentItem>,
    pub metadata: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_path: Option<String>,
    pub format: ExportFormat,
}

/// Response of `POST /export` and `GET /export-jobs/{jobId}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderResponse {
    #[serde(default)]
    pub job_id: Option<String>,
    pub status: JobStatus,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_group: Option<String>,
}

/// Access to the rendering service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RenderClient: Send + Sync {
    /// Submits one render request; all failures come back as a failed result.
    async fn render(&self, request: RenderRequest) -> ExportResult;

    /// Polls a render-service job (passthrough mode).
    async fn fetch_job(&self, job_id: &str) -> Result<ExportResult>;
}

/// HTTP implementation of [`RenderClient`] backed by `reqwest`.
pub struct HttpRenderClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpRenderClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            timeout,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl RenderClient for HttpRenderClient {
    async fn render(&self, request: RenderRequest) -> ExportResult {
        let url = self.endpoint("export");
        debug!(url = %url, format = ?request.format, "submitting render request");

        let sent = self
            .http
            .post(&url)
            .json(&request)
            .timeout(self.timeout)
            .send()
            .await;

        let response = match sent {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return ExportResult::failed(
                    NO_JOB_ID,
                    "Export service timeout",
                    codes::TIMEOUT,
                    groups::NETWORK,
                );
            }
            Err(e) => {
                return ExportResult::failed(
                    NO_JOB_ID,
                    e.to_string(),
                    codes::NETWORK_ERROR,
                    groups::NETWORK,
                );
            }
        };

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let reason = response.status().canonical_reason().unwrap_or("");
            let body = response.text().await.unwrap_or_else(|_| reason.to_string());
            return map_http_error(status, &body);
        }

        match response.json::<RenderResponse>().await {
            Ok(body) => map_render_response(body),
            Err(e) if e.is_timeout() => ExportResult::failed(
                NO_JOB_ID,
                "Export service timeout",
                codes::TIMEOUT,
                groups::NETWORK,
            ),
            Err(e) => ExportResult::failed(
                NO_JOB_ID,
                e.to_string(),
                codes::NETWORK_ERROR,
                groups::NETWORK,
            ),
        }
    }

    async fn fetch_job(&self, job_id: &str) -> Result<ExportResult> {
        let url = self.endpoint(&format!("export-jobs/{job_id}"));
        let response = self
            .http
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .context("Render service request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Render service error: {} {}", status.as_u16(), body);
        }
        let body: RenderResponse = response
            .json()
            .await
            .context("Render service returned an unreadable body")?;
        Ok(map_render_response(body))
    }
}

/// Maps a non-2xx render service response per the error contract.
fn map_http_error(status: u16, body: &str) -> ExportResult {
    ExportResult::failed(
        NO_JOB_ID,
        format!("HTTP {status} {body}"),
        codes::http_status(status),
        groups::for_http_status(status),
    )
}

/// Maps a 2xx render service body into the uniform result shape.
///
/// A reported failure keeps whatever code and group the remote supplied;
/// `REMOTE_FAILED` is stamped only where the body carries none.
fn map_render_response(body: RenderResponse) -> ExportResult {
    let job_id = body.job_id.unwrap_or_else(|| NO_JOB_ID.to_string());
    match body.status {
        JobStatus::Failed => {
            let (code, group) = match body.error_code {
                Some(code) => (code, body.error_group),
                None => (
                    codes::REMOTE_FAILED.to_string(),
                    body.error_group
                        .or_else(|| Some(groups::REMOTE_FAILED.to_string())),
                ),
            };
            ExportResult {
                job_id,
                status: JobStatus::Failed,
                download_url: None,
                error: body.error,
                error_code: Some(code),
                error_group: group,
            }
        }
        status => ExportResult {
            job_id,
            status,
            download_url: body.download_url,
            error: None,
            error_code: None,
            error_group: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn non_2xx_maps_to_http_code_and_group() {
        let result = map_http_error(404, "Not Found");
        assert_eq!(result.status, JobStatus::Failed);
        assert_eq!(result.error_code.as_deref(), Some("HTTP_404"));
        assert_eq!(result.error_group.as_deref(), Some(groups::HTTP_4XX));
        assert_eq!(result.error.as_deref(), Some("HTTP 404 Not Found"));

        let result = map_http_error(502, "upstream down");
        assert_eq!(result.error_code.as_deref(), Some("HTTP_502"));
        assert_eq!(result.error_group.as_deref(), Some(groups::HTTP_5XX));
    }

    #[test]
    fn remote_failure_without_code_becomes_remote_failed() {
        let result = map_render_response(RenderResponse {
            job_id: Some("rj-1".to_string()),
            status: JobStatus::Failed,
            download_url: None,
            error: Some("deck build crashed".to_string()),
            error_code: None,
            error_group: None,
        });
        assert_eq!(result.error_code.as_deref(), Some(codes::REMOTE_FAILED));
        assert_eq!(result.error_group.as_deref(), Some(groups::REMOTE_FAILED));
        assert_eq!(result.error.as_deref(), Some("deck build crashed"));
    }

    #[test]
    fn remote_failure_with_code_passes_through() {
        let result = map_render_response(RenderResponse {
            job_id: Some("rj-2".to_string()),
            status: JobStatus::Failed,
            download_url: None,
            error: Some("bad template".to_string()),
            error_code: Some("TEMPLATE_CORRUPT".to_string()),
            error_group: None,
        });
        assert_eq!(result.error_code.as_deref(), Some("TEMPLATE_CORRUPT"));
        assert!(result.error_group.is_none());
    }

    #[test]
    fn remote_error_group_is_forwarded() {
        let result = map_render_response(RenderResponse {
            job_id: Some("rj-4".to_string()),
            status: JobStatus::Failed,
            download_url: None,
            error: Some("chart render failed".to_string()),
            error_code: Some("CHART_ENGINE".to_string()),
            error_group: Some("RENDER".to_string()),
        });
        assert_eq!(result.error_code.as_deref(), Some("CHART_ENGINE"));
        assert_eq!(result.error_group.as_deref(), Some("RENDER"));

        // A supplied group also wins when the code falls back.
        let result = map_render_response(RenderResponse {
            job_id: Some("rj-5".to_string()),
            status: JobStatus::Failed,
            download_url: None,
            error: Some("render failed".to_string()),
            error_code: None,
            error_group: Some("RENDER".to_string()),
        });
        assert_eq!(result.error_code.as_deref(), Some(codes::REMOTE_FAILED));
        assert_eq!(result.error_group.as_deref(), Some("RENDER"));
    }

    #[test]
    fn completed_response_keeps_download_url() {
        let result = map_render_response(RenderResponse {
            job_id: Some("rj-3".to_string()),
            status: JobStatus::Completed,
            download_url: Some("/dl/deck.pptx".to_string()),
            error: None,
            error_code: None,
            error_group: None,
        });
        assert_eq!(result.status, JobStatus::Completed);
        assert_eq!(result.download_url.as_deref(), Some("/dl/deck.pptx"));
        assert_eq!(result.job_id, "rj-3");
    }

    #[test]
    fn missing_job_id_gets_placeholder() {
        let result = map_render_response(RenderResponse {
            job_id: None,
            status: JobStatus::Completed,
            download_url: None,
            error: None,
            error_code: None,
            error_group: None,
        });
        assert_eq!(result.job_id, NO_JOB_ID);
    }
}
