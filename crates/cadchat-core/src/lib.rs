pub mod types;
pub mod chat;
pub mod agent;
pub mod conversation;

pub use types::{
    DocumentTracker,
    ErrorCode,
    Message,
    MessageId,
    ModelReference,
    Part,
    Role,
    ToolCallRequest,
    ToolCallResult,
    ToolDefinition,
    ToolFailure,
    ToolOutcome,
};

pub use chat::{
    ChatChunk,
    ChatOptions,
    ChatRequest,
    FinishReason,
};

pub use agent::{AgentEvent, TokenUsage, TurnMachine, TurnState};
pub use conversation::{ProtocolError, Reconciled};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
