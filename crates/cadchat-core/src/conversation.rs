//! History invariants and reconciliation of client-posted histories.

use std::collections::HashSet;

use thiserror::Error;

use crate::agent::TurnState;
use crate::types::{Message, Part, Role, ToolCallRequest};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("illegal turn transition {from} -> {to}")]
    IllegalTransition { from: TurnState, to: TurnState },

    #[error("tool call id '{0}' is used more than once")]
    DuplicateCallId(String),

    #[error("tool result references unknown call id '{0}'")]
    UnknownCallId(String),

    #[error("tool call '{0}' is resolved more than once")]
    DuplicateResult(String),

    #[error("message {index} has role '{role}' which is not allowed here")]
    UnexpectedRole { index: usize, role: Role },

    #[error("message {index} carries a part its role cannot hold")]
    UnexpectedPart { index: usize },

    #[error("the last message must be a user text message")]
    MissingUserMessage,
}

/// Check the stored-history invariants: call ids are unique, every result
/// follows exactly one earlier request, and parts sit under the right role.
pub fn validate_history(messages: &[Message]) -> Result<(), ProtocolError> {
    let mut requested = HashSet::new();
    let mut resolved = HashSet::new();

    for (index, message) in messages.iter().enumerate() {
        if message.role == Role::System {
            return Err(ProtocolError::UnexpectedRole {
                index,
                role: message.role,
            });
        }
        for part in &message.parts {
            match part {
                Part::Text { .. } => {
                    if message.role == Role::Tool {
                        return Err(ProtocolError::UnexpectedPart { index });
                    }
                }
                Part::ToolCall(call) => {
                    if message.role != Role::Assistant {
                        return Err(ProtocolError::UnexpectedPart { index });
                    }
                    if !requested.insert(call.id.as_str()) {
                        return Err(ProtocolError::DuplicateCallId(call.id.clone()));
                    }
                }
                Part::ToolResult(result) => {
                    if message.role != Role::Tool {
                        return Err(ProtocolError::UnexpectedPart { index });
                    }
                    if !requested.contains(result.call_id.as_str()) {
                        return Err(ProtocolError::UnknownCallId(result.call_id.clone()));
                    }
                    if !resolved.insert(result.call_id.as_str()) {
                        return Err(ProtocolError::DuplicateResult(result.call_id.clone()));
                    }
                }
            }
        }
    }
    Ok(())
}

/// Tool calls that have no result yet, in request order
pub fn pending_calls(messages: &[Message]) -> Vec<&ToolCallRequest> {
    let resolved: HashSet<&str> = messages
        .iter()
        .flat_map(|m| m.results())
        .map(|r| r.call_id.as_str())
        .collect();
    messages
        .iter()
        .flat_map(|m| m.tool_calls())
        .filter(|call| !resolved.contains(call.id.as_str()))
        .collect()
}

/// All call ids used so far
pub fn call_ids(messages: &[Message]) -> HashSet<String> {
    messages
        .iter()
        .flat_map(|m| m.tool_calls())
        .map(|c| c.id.clone())
        .collect()
}

/// Outcome of merging a posted history with the stored one
#[derive(Debug, Clone)]
pub struct Reconciled {
    /// History preceding the new user message
    pub history: Vec<Message>,
    /// The user message that opens the turn
    pub user_message: Message,
    /// True when the posted history replaced the stored one
    pub replaced: bool,
}

/// Merge a client-posted full history into the stored history.
///
/// The last posted message opens the turn and must be user text. When the
/// stored history is an id-prefix of the posted one (or only the new message
/// is posted) and every extra posted message is user-authored, the stored
/// history is kept and the extras are appended. A text-only transcript of
/// the stored history is folded the same way (see [`fold_transcript`]).
/// Otherwise the client is authoritative and its history replaces the
/// stored one once it passes validation.
pub fn reconcile(stored: &[Message], mut posted: Vec<Message>) -> Result<Reconciled, ProtocolError> {
    let user_message = match posted.pop() {
        Some(last) if last.is_user_text() => last,
        _ => return Err(ProtocolError::MissingUserMessage),
    };

    let is_prefix = posted.len() >= stored.len()
        && stored.iter().zip(&posted).all(|(s, p)| s.id == p.id)
        && posted[stored.len()..].iter().all(|m| m.role == Role::User);

    if posted.is_empty() || (is_prefix && !stored.is_empty()) {
        let mut history = stored.to_vec();
        history.extend(posted.into_iter().skip(stored.len()));
        return Ok(Reconciled {
            history,
            user_message,
            replaced: false,
        });
    }

    if let Some(history) = fold_transcript(stored, &posted) {
        return Ok(Reconciled {
            history,
            user_message,
            replaced: false,
        });
    }

    validate_history(&posted)?;
    Ok(Reconciled {
        history: posted,
        user_message,
        replaced: true,
    })
}

/// Fold a text-only transcript onto the stored history.
///
/// Clients that render only user and assistant text post back exactly that,
/// with ids of their own. The transcript matches when its user messages
/// repeat every stored user message in order and each assistant message
/// echoes a stored reply from the same exchange. The stored history, tool
/// calls and results included, is then kept and only the user messages
/// after the matched ones are appended.
pub fn fold_transcript(stored: &[Message], posted: &[Message]) -> Option<Vec<Message>> {
    if stored.is_empty() {
        return None;
    }

    // replies[k] holds the assistant text that followed the k-th user message
    let mut users: Vec<String> = Vec::new();
    let mut replies: Vec<Vec<String>> = vec![Vec::new()];
    for message in stored {
        match message.role {
            Role::User => {
                users.push(normalized(&message.text()));
                replies.push(Vec::new());
            }
            Role::Assistant => {
                let text = normalized(&message.text());
                if !text.is_empty() {
                    replies[users.len()].push(text);
                }
            }
            _ => {}
        }
    }

    let mut matched = 0;
    let mut extras = Vec::new();
    for message in posted {
        if !message.parts.iter().all(|p| matches!(p, Part::Text { .. })) {
            return None;
        }
        match message.role {
            Role::User if matched < users.len() => {
                if normalized(&message.text()) != users[matched] {
                    return None;
                }
                matched += 1;
            }
            Role::User => extras.push(message.clone()),
            Role::Assistant if extras.is_empty() => {
                if !echoes(&replies[matched], &normalized(&message.text())) {
                    return None;
                }
            }
            _ => return None,
        }
    }
    if matched < users.len() {
        return None;
    }

    let mut history = stored.to_vec();
    history.extend(extras);
    Some(history)
}

fn normalized(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A posted reply may be one stored message or the whole exchange joined
fn echoes(replies: &[String], text: &str) -> bool {
    text.is_empty() || replies.iter().any(|r| r == text) || replies.join(" ") == text
}
