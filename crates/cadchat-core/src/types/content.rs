use serde::{Deserialize, Serialize};

use crate::types::tool::{ToolCallRequest, ToolCallResult};

/// One ordered piece of a message.
///
/// Assistant messages interleave `Text` and `ToolCall` parts in the order the
/// model emitted them; tool messages carry only `ToolResult` parts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    /// Plain text
    Text { text: String },
    /// A tool invocation requested by the model
    ToolCall(ToolCallRequest),
    /// The resolution of an earlier tool invocation
    ToolResult(ToolCallResult),
}

impl Part {
    /// Create a text part
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn tool_call(call: ToolCallRequest) -> Self {
        Self::ToolCall(call)
    }

    pub fn tool_result(result: ToolCallResult) -> Self {
        Self::ToolResult(result)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn as_tool_call(&self) -> Option<&ToolCallRequest> {
        match self {
            Self::ToolCall(call) => Some(call),
            _ => None,
        }
    }

    pub fn as_tool_result(&self) -> Option<&ToolCallResult> {
        match self {
            Self::ToolResult(result) => Some(result),
            _ => None,
        }
    }
}
