pub mod message;
pub mod tool;
pub mod content;

pub use message::{Message, Role, MessageId};
pub use tool::{DocumentTracker, ErrorCode, ModelReference, ToolCallRequest, ToolCallResult, ToolDefinition, ToolFailure, ToolOutcome};
pub use content::Part;
