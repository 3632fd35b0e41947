//! Typed pipeline errors and the stable error-code vocabulary.

use thiserror::Error;

/// Stable machine-readable error codes recorded on failed jobs.
///
/// Codes for HTTP failures are formatted as `HTTP_<status>` and are not
/// listed here; see [`codes::http_status`].
pub mod codes {
    /// Explicit `templateId` does not exist.
    pub const NOT_FOUND: &str = "NotFound";
    /// Explicit `templateId` resolves but carries no storage path.
    pub const STORAGE_PATH_MISSING: &str = "StoragePathMissing";
    /// Render call exceeded the configured timeout.
    pub const TIMEOUT: &str = "TIMEOUT";
    /// Render call failed before a response was received.
    pub const NETWORK_ERROR: &str = "NETWORK_ERROR";
    /// Render service answered 2xx but reported failure without a code.
    pub const REMOTE_FAILED: &str = "REMOTE_FAILED";
    /// Processor returned an explicit failure without its own code.
    pub const WORKER_FAILED: &str = "WORKER_FAILED";
    /// Processor raised an unexpected fault.
    pub const WORKER_THROW: &str = "WORKER_THROW";

    /// Code for a non-2xx render service response.
    pub fn http_status(status: u16) -> String {
        format!("HTTP_{status}")
    }
}

/// Coarse failure groups used on operator dashboards.
pub mod groups {
    pub const HTTP_4XX: &str = "HTTP_4XX";
    pub const HTTP_5XX: &str = "HTTP_5XX";
    pub const HTTP_OTHER: &str = "HTTP_OTHER";
    pub const NETWORK: &str = "NETWORK";
    pub const REMOTE_FAILED: &str = "REMOTE_FAILED";

    /// Groups an HTTP status for dashboards: 5xx, 4xx, or other.
    pub fn for_http_status(status: u16) -> &'static str {
        if status >= 500 {
            HTTP_5XX
        } else if status >= 400 {
            HTTP_4XX
        } else {
            HTTP_OTHER
        }
    }
}

/// Errors the export pipeline surfaces synchronously.
///
/// Only explicit template selection fails loudly; every downstream
/// failure (render call, remote status) is folded into a failed
/// [`ExportResult`](crate::job::ExportResult) instead.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Template storage path missing: {0}")]
    StoragePathMissing(String),

    /// A collaborator lookup (project, user, catalog) failed outright.
    #[error(transparent)]
    Lookup(#[from] anyhow::Error),
}

impl ExportError {
    /// The stable code recorded on the job for this error.
    pub fn code(&self) -> &'static str {
        match self {
            ExportError::TemplateNotFound(_) => codes::NOT_FOUND,
            ExportError::StoragePathMissing(_) => codes::STORAGE_PATH_MISSING,
            ExportError::Lookup(_) => codes::WORKER_THROW,
        }
    }
}
