use cadchat_core::types::{ErrorCode, ToolFailure};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pipeline stage a failure is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    Validate,
    Compile,
    Tessellate,
    CreateDocument,
    UploadMesh,
    ImportMesh,
    /// Failure reported by a remote conversion service
    Remote,
}

impl std::fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Validate => "validate",
            Self::Compile => "compile",
            Self::Tessellate => "tessellate",
            Self::CreateDocument => "create_document",
            Self::UploadMesh => "upload_mesh",
            Self::ImportMesh => "import_mesh",
            Self::Remote => "remote",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("compile error: {0}")]
    Compile(String),

    #[error("compiler could not be started: {0}")]
    CompilerUnavailable(String),

    #[error("tessellation error: {0}")]
    Tessellation(String),

    #[error("remote error {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out after {0}s")]
    Timeout(u64),

    #[error("unexpected response: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidInput(_) => ErrorCode::InvalidInput,
            Self::Compile(_) => ErrorCode::CompileError,
            Self::Tessellation(_) => ErrorCode::TessellationError,
            Self::Remote { .. } | Self::Parse(_) => ErrorCode::RemoteError,
            Self::Transport(_) => ErrorCode::TransportError,
            Self::Timeout(_) => ErrorCode::Timeout,
            Self::CompilerUnavailable(_) | Self::Io(_) => ErrorCode::PipelineError,
        }
    }

    pub(crate) fn from_reqwest(e: reqwest::Error, timeout_secs: u64) -> Self {
        if e.is_timeout() {
            Self::Timeout(timeout_secs)
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// Structured failure naming the step that failed.
///
/// `document_id` is set when a remote document already exists, so the caller
/// can inspect or remove it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineFailure {
    pub step: PipelineStep,
    pub error_code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
}

impl PipelineFailure {
    pub fn new(step: PipelineStep, error: PipelineError) -> Self {
        Self {
            step,
            error_code: error.code(),
            message: error.to_string(),
            document_id: None,
        }
    }

    pub fn with_document(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }
}

impl std::fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed: {}", self.step, self.message)?;
        if let Some(id) = &self.document_id {
            write!(f, " (document {} was created)", id)?;
        }
        Ok(())
    }
}

impl std::error::Error for PipelineFailure {}

impl From<PipelineFailure> for ToolFailure {
    fn from(failure: PipelineFailure) -> Self {
        let message = match &failure.document_id {
            Some(id) => format!(
                "{} step failed: {} (a partial document {} was left in the CAD platform)",
                failure.step, failure.message, id
            ),
            None => format!("{} step failed: {}", failure.step, failure.message),
        };
        ToolFailure::new(failure.error_code, message).with_document(failure.document_id)
    }
}
