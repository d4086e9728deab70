use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, OnceLock};

/// Tool definition advertised to the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments object
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// A tool invocation emitted by the model.
///
/// `arguments` holds the parsed JSON object. When the model produced text
/// that does not parse, the raw text is kept as a JSON string so the
/// gateway can reject it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Build a request from the raw argument text streamed by the model
    pub fn from_raw_arguments(id: impl Into<String>, name: impl Into<String>, raw: &str) -> Self {
        let arguments = if raw.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
        };
        Self::new(id, name, arguments)
    }

    /// Arguments as they go back on the wire to the model
    pub fn arguments_string(&self) -> String {
        match &self.arguments {
            Value::String(raw) => raw.clone(),
            other => other.to_string(),
        }
    }
}

/// Result of a model-creation request that reached the CAD service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModelReference {
    pub document_id: String,
    pub url: String,
    pub summary: String,
}

/// Stable error vocabulary shared by the gateway and the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidInput,
    UnknownTool,
    CompileError,
    TessellationError,
    RemoteError,
    TransportError,
    Timeout,
    PipelineError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::UnknownTool => "unknown_tool",
            Self::CompileError => "compile_error",
            Self::TessellationError => "tessellation_error",
            Self::RemoteError => "remote_error",
            Self::TransportError => "transport_error",
            Self::Timeout => "timeout",
            Self::PipelineError => "pipeline_error",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed tool call.
///
/// `document_id` is set when a remote document was created before the
/// failure, so the caller can locate the partial artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ToolFailure {
    pub error_code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
}

impl ToolFailure {
    pub fn new(error_code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error_code,
            message: message.into(),
            document_id: None,
        }
    }

    pub fn with_document(mut self, document_id: Option<String>) -> Self {
        self.document_id = document_id;
        self
    }
}

/// Shared slot for the id of a document a conversion has created.
///
/// Clones share the slot, so a caller that drops the conversion future
/// (deadline, cancellation) can still read what was created.
#[derive(Debug, Clone, Default)]
pub struct DocumentTracker(Arc<OnceLock<String>>);

impl DocumentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// First recorded id wins
    pub fn record(&self, document_id: impl Into<String>) {
        self.0.get_or_init(|| document_id.into());
    }

    pub fn document_id(&self) -> Option<String> {
        self.0.get().cloned()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success(ModelReference),
    Failure(ToolFailure),
}

impl ToolOutcome {
    pub fn failure(error_code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Failure(ToolFailure::new(error_code, message))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Resolution of one tool call, matched to it by `call_id`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    pub call_id: String,
    pub outcome: ToolOutcome,
}

impl ToolCallResult {
    pub fn success(call_id: impl Into<String>, reference: ModelReference) -> Self {
        Self {
            call_id: call_id.into(),
            outcome: ToolOutcome::Success(reference),
        }
    }

    pub fn failure(call_id: impl Into<String>, failure: ToolFailure) -> Self {
        Self {
            call_id: call_id.into(),
            outcome: ToolOutcome::Failure(failure),
        }
    }

    /// JSON text handed back to the model as the tool message content
    pub fn content_for_model(&self) -> String {
        serde_json::to_string(&self.outcome).unwrap_or_else(|_| self.outcome_summary())
    }

    fn outcome_summary(&self) -> String {
        match &self.outcome {
            ToolOutcome::Success(r) => format!("created document {} at {}", r.document_id, r.url),
            ToolOutcome::Failure(f) => format!("{}: {}", f.error_code, f.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_raw_arguments_parse() {
        let call = ToolCallRequest::from_raw_arguments("c1", "create_model", r#"{"geometrySource":"sphere(5);"}"#);
        assert_eq!(call.arguments["geometrySource"], "sphere(5);");
    }

    #[test]
    fn test_raw_arguments_invalid_json_kept_as_string() {
        let call = ToolCallRequest::from_raw_arguments("c1", "create_model", "{not json");
        assert_eq!(call.arguments, Value::String("{not json".into()));
        assert_eq!(call.arguments_string(), "{not json");
    }

    #[test]
    fn test_empty_raw_arguments_become_empty_object() {
        let call = ToolCallRequest::from_raw_arguments("c1", "create_model", "  ");
        assert_eq!(call.arguments, json!({}));
    }

    #[test]
    fn test_success_outcome_wire_shape() {
        let result = ToolCallResult::success(
            "c1",
            ModelReference {
                document_id: "doc123".into(),
                url: "https://cad.onshape.com/documents/doc123".into(),
                summary: "Created AI Model".into(),
            },
        );
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["callId"], "c1");
        assert_eq!(value["outcome"]["status"], "success");
        assert_eq!(value["outcome"]["documentId"], "doc123");
        assert_eq!(value["outcome"]["url"], "https://cad.onshape.com/documents/doc123");
    }

    #[test]
    fn test_failure_content_for_model() {
        let failure = ToolFailure::new(ErrorCode::RemoteError, "import rejected")
            .with_document(Some("doc9".into()));
        let result = ToolCallResult::failure("c2", failure);
        let content: Value = serde_json::from_str(&result.content_for_model()).unwrap();
        assert_eq!(content["status"], "failure");
        assert_eq!(content["errorCode"], "remote_error");
        assert_eq!(content["documentId"], "doc9");
    }

    #[test]
    fn test_document_tracker_clones_share_first_id() {
        let tracker = DocumentTracker::new();
        let handle = tracker.clone();
        assert_eq!(tracker.document_id(), None);

        handle.record("doc1");
        handle.record("doc2");

        assert_eq!(tracker.document_id().as_deref(), Some("doc1"));
    }
}
