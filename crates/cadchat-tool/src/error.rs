//! Error types for cadchat-tool

use cadchat_core::types::{ErrorCode, ToolFailure};
use cadchat_pipeline::PipelineFailure;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ToolError>;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// `document_id` is set when the call created a document before the deadline
    #[error("tool call timed out after {millis}ms")]
    Timeout {
        millis: u64,
        document_id: Option<String>,
    },

    #[error("{0}")]
    Pipeline(#[from] PipelineFailure),
}

impl ToolError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownTool(_) => ErrorCode::UnknownTool,
            Self::InvalidInput(_) => ErrorCode::InvalidInput,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::Pipeline(failure) => failure.error_code,
        }
    }
}

impl From<ToolError> for ToolFailure {
    fn from(error: ToolError) -> Self {
        match error {
            ToolError::Pipeline(failure) => failure.into(),
            ToolError::Timeout { millis, document_id } => ToolFailure::new(
                ErrorCode::Timeout,
                format!("tool call timed out after {}ms", millis),
            )
            .with_document(document_id),
            other => ToolFailure::new(other.code(), other.to_string()),
        }
    }
}
