use std::time::Duration;

use thiserror::Error;

/// Failures inside the question-supply pipeline.
///
/// None of these reach end users; they are logged and surface only as
/// reduced `generated` / `saved` / `migrated` counts.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Missing workflow credentials. Aborts the whole batch.
    #[error("workflow API is not configured: {0}")]
    Config(String),

    /// Non-zero status or unreadable payload from the workflow API.
    #[error("workflow API error: {0}")]
    Upstream(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to download image: {0}")]
    Download(String),

    #[error("failed to upload image: {0}")]
    Upload(String),

    #[error("failed to persist question: {0}")]
    Persistence(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl PipelineError {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Config(_) => "config",
            PipelineError::Upstream(_) => "upstream",
            PipelineError::Timeout(_) => "timeout",
            PipelineError::Download(_) => "download",
            PipelineError::Upload(_) => "upload",
            PipelineError::Persistence(_) => "persistence",
            PipelineError::Storage(_) => "storage",
        }
    }
}
