//! Export pipeline: metadata enrichment, template resolution, render call.
//!
//! One pass per job, no retries here (retry is the queue backend's
//! concern) and no side effects beyond the render call and the two
//! optional lookups.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

use crate::error::ExportError;
use crate::job::{ExportRequest, ExportResult, JobStatus, ProcessOutcome};
use crate::render::{RenderClient, RenderRequest};
use crate::template::{select_template_path, TemplateCatalog};

/// Project lookup collaborator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProjectDirectory: Send + Sync {
    async fn project_name(&self, project_id: &str) -> Result<Option<String>>;
}

/// Display identity of a user, as the directory knows it.
#[derive(Debug, Clone, Default)]
pub struct UserIdentity {
    pub name: Option<String>,
    pub email: Option<String>,
}

/// User lookup collaborator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn user_identity(&self, user_id: &str) -> Result<Option<UserIdentity>>;
}

/// Directory that knows nobody; the wiring default when no backing
/// store is configured.
pub struct NullDirectory;

#[async_trait]
impl ProjectDirectory for NullDirectory {
    async fn project_name(&self, _project_id: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

#[async_trait]
impl UserDirectory for NullDirectory {
    async fn user_identity(&self, _user_id: &str) -> Result<Option<UserIdentity>> {
        Ok(None)
    }
}

/// Turns one `ExportRequest` into an `ExportResult`.
pub struct ExportPipeline {
    projects: Arc<dyn ProjectDirectory>,
    users: Arc<dyn UserDirectory>,
    templates: Arc<dyn TemplateCatalog>,
    renderer: Arc<dyn RenderClient>,
}

impl ExportPipeline {
    pub fn new(
        projects: Arc<dyn ProjectDirectory>,
        users: Arc<dyn UserDirectory>,
        templates: Arc<dyn TemplateCatalog>,
        renderer: Arc<dyn RenderClient>,
    ) -> Self {
        Self {
            projects,
            users,
            templates,
            renderer,
        }
    }

    /// Runs the pipeline for one request.
    ///
    /// `Err` is reserved for explicit template selection
    /// (`NotFound`/`StoragePathMissing`) and collaborator faults; render
    /// failures come back as a failed `ExportResult`.
    pub async fn run(
        &self,
        request: &ExportRequest,
        acting_user: Option<&str>,
    ) -> Result<ExportResult, ExportError> {
        let metadata = self.enrich_metadata(request, acting_user).await?;
        let template_path = self.resolve_template_path(request).await?;

        debug!(
            title = %request.title,
            template_path = template_path.as_deref().unwrap_or("<renderer default>"),
            "dispatching render request"
        );

        let result = self
            .renderer
            .render(RenderRequest {
                title: request.title.clone(),
                content: request.content.clone(),
                metadata,
                template_path,
                format: request.format,
            })
            .await;
        Ok(result)
    }

    /// Enriches a copy of the request metadata.
    ///
    /// Existing values always win; enrichment only fills gaps.
    async fn enrich_metadata(
        &self,
        request: &ExportRequest,
        acting_user: Option<&str>,
    ) -> Result<Map<String, Value>, ExportError> {
        let mut metadata = request.metadata.clone();

        let project_id = metadata
            .get("projectId")
            .and_then(Value::as_str)
            .map(String::from);
        if let Some(project_id) = project_id {
            if !metadata.contains_key("projectName") {
                if let Some(name) = self.projects.project_name(&project_id).await? {
                    metadata.insert("projectName".to_string(), Value::String(name));
                }
            }
        }

        if let Some(user_id) = acting_user {
            if !metadata.contains_key("author") {
                let identity = self.users.user_identity(user_id).await?.unwrap_or_default();
                let author = identity
                    .name
                    .or(identity.email)
                    .unwrap_or_else(|| user_id.to_string());
                metadata.insert("author".to_string(), Value::String(author));
            }
        }

        let has_data_sources = metadata
            .get("dataSources")
            .is_some_and(|v| v.is_array());
        if !has_data_sources {
            let mut seen = Vec::new();
            for item in &request.content {
                if let Some(name) = item.notebook_name() {
                    if !seen.iter().any(|s| s == name) {
                        seen.push(name.to_string());
                    }
                }
            }
            metadata.insert(
                "dataSources".to_string(),
                Value::Array(seen.into_iter().map(Value::String).collect()),
            );
        }

        Ok(metadata)
    }

    /// Resolves the template storage path in strict priority order:
    /// explicit path, explicit id (loud failure), then auto-selection
    /// (fail open to no template).
    async fn resolve_template_path(
        &self,
        request: &ExportRequest,
    ) -> Result<Option<String>, ExportError> {
        if let Some(path) = &request.template_path {
            return Ok(Some(path.clone()));
        }

        if let Some(template_id) = &request.template_id {
            let template = self
                .templates
                .get(template_id)
                .await?
                .ok_or_else(|| ExportError::TemplateNotFound(template_id.clone()))?;
            let path = template
                .content
                .storage_path
                .ok_or_else(|| ExportError::StoragePathMissing(template_id.clone()))?;
            return Ok(Some(path));
        }

        let catalog = self.templates.list().await?;
        let project_id = request
            .metadata
            .get("projectId")
            .and_then(Value::as_str);
        Ok(select_template_path(&catalog, &request.title, project_id))
    }
}

/// Processor body shared by both runners.
///
/// Template selection errors are captured here as failed outcomes with
/// their own codes; collaborator faults propagate and the queue records
/// them as `WORKER_THROW`. A remote status that is neither terminal is
/// treated as accepted-without-URL.
pub async fn process_export(
    pipeline: &ExportPipeline,
    payload: ExportRequest,
) -> Result<ProcessOutcome> {
    let acting_user = payload.user_id.clone();
    match pipeline.run(&payload, acting_user.as_deref()).await {
        Ok(result) => match result.status {
            JobStatus::Failed => Ok(ProcessOutcome::failed(result.error, result.error_code)),
            _ => Ok(ProcessOutcome::completed(result.download_url)),
        },
        Err(ExportError::Lookup(fault)) => Err(fault),
        Err(selection) => Ok(ProcessOutcome::failed(
            Some(selection.to_string()),
            Some(selection.code().to_string()),
        )),
    }
}
