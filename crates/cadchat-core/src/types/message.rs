use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::content::Part;
use crate::types::tool::{ToolCallRequest, ToolCallResult};

pub type MessageId = String;

/// Message author.
///
/// `System` only ever appears in outbound model requests, never in a stored
/// conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single entry of a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    #[serde(default = "new_message_id")]
    pub id: MessageId,
    pub role: Role,
    #[serde(default)]
    pub parts: Vec<Part>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

pub fn new_message_id() -> MessageId {
    Uuid::new_v4().to_string()
}

impl Message {
    /// Create a message with the given parts
    pub fn with_parts(role: Role, parts: Vec<Part>) -> Self {
        Self {
            id: new_message_id(),
            role,
            parts,
            created_at: Utc::now(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::with_parts(Role::System, vec![Part::text(text)])
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::with_parts(Role::User, vec![Part::text(text)])
    }

    /// Create an assistant message from parts in emission order
    pub fn assistant(parts: Vec<Part>) -> Self {
        Self::with_parts(Role::Assistant, parts)
    }

    /// Create a tool message carrying one result per part
    pub fn tool_results(results: Vec<ToolCallResult>) -> Self {
        Self::with_parts(Role::Tool, results.into_iter().map(Part::tool_result).collect())
    }

    /// Override the generated id
    pub fn with_id(mut self, id: impl Into<MessageId>) -> Self {
        self.id = id.into();
        self
    }

    /// Concatenated text of all text parts
    pub fn text(&self) -> String {
        self.parts.iter().filter_map(Part::as_text).collect()
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCallRequest> {
        self.parts.iter().filter_map(Part::as_tool_call)
    }

    pub fn results(&self) -> impl Iterator<Item = &ToolCallResult> {
        self.parts.iter().filter_map(Part::as_tool_result)
    }

    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls().next().is_some()
    }

    /// True when the message is user-authored and consists of text only
    pub fn is_user_text(&self) -> bool {
        self.role == Role::User
            && !self.parts.is_empty()
            && self.parts.iter().all(|p| matches!(p, Part::Text { .. }))
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}
