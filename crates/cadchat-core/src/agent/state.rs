use serde::{Deserialize, Serialize};

use crate::conversation::ProtocolError;

/// Protocol state of a session's current turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    #[default]
    AwaitingUserInput,
    Generating,
    ToolPending,
    ToolExecuting,
    Finalized,
}

impl TurnState {
    /// States in which a turn is in flight
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Generating | Self::ToolPending | Self::ToolExecuting)
    }

    pub fn can_transition_to(&self, to: TurnState) -> bool {
        use TurnState::*;
        matches!(
            (self, to),
            (AwaitingUserInput, Generating)
                | (Generating, ToolPending)
                | (Generating, Finalized)
                | (ToolPending, ToolExecuting)
                | (ToolExecuting, Generating)
                | (Finalized, AwaitingUserInput)
                // aborts
                | (Generating, AwaitingUserInput)
                | (ToolPending, AwaitingUserInput)
                | (ToolExecuting, AwaitingUserInput)
        )
    }
}

impl std::fmt::Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AwaitingUserInput => "awaiting_user_input",
            Self::Generating => "generating",
            Self::ToolPending => "tool_pending",
            Self::ToolExecuting => "tool_executing",
            Self::Finalized => "finalized",
        };
        f.write_str(s)
    }
}

/// Enforces the legal turn transitions
#[derive(Debug, Clone, Default)]
pub struct TurnMachine {
    state: TurnState,
}

impl TurnMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from a persisted state
    pub fn from_state(state: TurnState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Move to `to`, returning the previous state
    pub fn transition(&mut self, to: TurnState) -> Result<TurnState, ProtocolError> {
        let from = self.state;
        if !from.can_transition_to(to) {
            return Err(ProtocolError::IllegalTransition { from, to });
        }
        self.state = to;
        Ok(from)
    }
}
