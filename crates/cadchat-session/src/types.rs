//! # Session Types

use cadchat_core::conversation::pending_calls;
use cadchat_core::{Message, TurnState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SessionError, SessionResult};

pub const MAX_SESSION_ID_LEN: usize = 128;

/// Reject anything outside `[A-Za-z0-9_-]{1,128}`
pub fn validate_session_id(id: &str) -> SessionResult<()> {
    let valid = !id.is_empty()
        && id.len() <= MAX_SESSION_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(SessionError::InvalidId { id: id.to_string() })
    }
}

/// One conversation: ordered history plus protocol state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub state: TurnState,
    /// Calls whose turn was cancelled before they resolved
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unresolved: Vec<String>,
    /// Leading entries of `unresolved` already reported to the client
    #[serde(default)]
    pub reported_unresolved: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            messages: Vec::new(),
            state: TurnState::AwaitingUserInput,
            unresolved: Vec::new(),
            reported_unresolved: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Append in conversation order
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
        self.touch();
    }

    pub fn set_state(&mut self, state: TurnState) {
        self.state = state;
        self.touch();
    }

    /// Ids of requests in the history that have no result
    pub fn pending_call_ids(&self) -> Vec<String> {
        pending_calls(&self.messages)
            .into_iter()
            .map(|call| call.id.clone())
            .collect()
    }

    /// Record calls as unresolved, keeping the first-seen order
    pub fn mark_unresolved<I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = String>,
    {
        for id in ids {
            if !self.unresolved.contains(&id) {
                self.unresolved.push(id);
            }
        }
        self.touch();
    }

    /// Drop unresolved ids that are no longer pending in the history
    pub fn prune_unresolved(&mut self) {
        let pending = self.pending_call_ids();
        let reported_len = self.reported_unresolved.min(self.unresolved.len());
        let reported: Vec<String> = self.unresolved[..reported_len].to_vec();
        self.unresolved.retain(|id| pending.contains(id));
        self.reported_unresolved = self
            .unresolved
            .iter()
            .filter(|id| reported.contains(id))
            .count();
    }

    /// Unresolved ids not yet reported; marks them reported
    pub fn take_unreported(&mut self) -> Vec<String> {
        let start = self.reported_unresolved.min(self.unresolved.len());
        let fresh = self.unresolved[start..].to_vec();
        self.reported_unresolved = self.unresolved.len();
        fresh
    }

    /// Bring a session found mid-turn back to `AwaitingUserInput`.
    ///
    /// Returns true when the record changed.
    pub fn normalize(&mut self) -> bool {
        if !self.state.is_active() && self.state != TurnState::Finalized {
            return false;
        }
        let interrupted = self.state.is_active();
        self.state = TurnState::AwaitingUserInput;
        if interrupted {
            let pending = self.pending_call_ids();
            self.mark_unresolved(pending);
        }
        self.touch();
        true
    }
}
