/// One decoded increment of a streamed model response.
///
/// Tool-call fragments are keyed by `index`, the position the provider
/// assigned to the call within the response. The call id and name arrive
/// once in `ToolCallStart`; argument text accumulates across deltas.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatChunk {
    /// Text content delta
    Content { text: String },
    /// Tool call started
    ToolCallStart { index: usize, call_id: String, name: String },
    /// Tool call arguments delta
    ToolCallDelta { index: usize, arguments_delta: String },
    /// Usage information
    Usage { input_tokens: u32, output_tokens: u32 },
    /// Stream finished
    Finish { reason: FinishReason },
}

impl ChatChunk {
    pub fn content(text: impl Into<String>) -> Self {
        Self::Content { text: text.into() }
    }

    pub fn finish(reason: FinishReason) -> Self {
        Self::Finish { reason }
    }

    pub fn is_finish(&self) -> bool {
        matches!(self, Self::Finish { .. })
    }
}

/// Reason the model stopped generating
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// Completed naturally
    Stop,
    /// Hit token limit
    Length,
    /// Tool calls were made
    ToolCalls,
    /// Content was filtered
    ContentFilter,
}

impl FinishReason {
    /// Map a provider finish reason; unknown values count as `Stop`
    pub fn from_wire(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "length" => Self::Length,
            "tool_calls" | "function_call" => Self::ToolCalls,
            "content_filter" => Self::ContentFilter,
            _ => Self::Stop,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Length => "length",
            Self::ToolCalls => "tool_calls",
            Self::ContentFilter => "content_filter",
        }
    }
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
