use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::agent::state::TurnState;
use crate::types::ToolOutcome;

/// Frames streamed to the client while a turn runs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// The user message was accepted and the turn started
    TurnStart {
        session_id: String,
        message_id: String,
    },
    /// Turn state transition
    StateChange {
        from: TurnState,
        to: TurnState,
    },
    /// Streamed assistant text
    Token {
        content: String,
    },
    /// A tool call was dispatched
    ToolStart {
        tool_call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },
    /// A tool call resolved
    ToolComplete {
        tool_call_id: String,
        result: ToolOutcome,
    },
    /// Calls left unresolved by an earlier cancelled turn
    Unresolved {
        tool_call_ids: Vec<String>,
        message: String,
    },
    /// The turn finalized
    Complete {
        #[serde(skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
        usage: TokenUsage,
    },
    /// The turn failed
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
    /// The turn was cancelled by the client
    Cancelled {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        unresolved: Vec<String>,
        /// Unresolved call id to the document it created before the cancel
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        documents: BTreeMap<String, String>,
    },
}

impl AgentEvent {
    pub fn token(content: impl Into<String>) -> Self {
        Self::Token {
            content: content.into(),
        }
    }

    pub fn error(message: impl Into<String>, code: Option<&str>) -> Self {
        Self::Error {
            message: message.into(),
            code: code.map(str::to_string),
        }
    }

    pub fn state_change(from: TurnState, to: TurnState) -> Self {
        Self::StateChange { from, to }
    }

    /// True for the frames that end a turn's stream
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Complete { .. } | Self::Error { .. } | Self::Cancelled { .. }
        )
    }
}

/// Token accounting accumulated over a turn
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn add(&mut self, prompt: u32, completion: u32) {
        self.prompt_tokens += prompt;
        self.completion_tokens += completion;
        self.total_tokens = self.prompt_tokens + self.completion_tokens;
    }
}
