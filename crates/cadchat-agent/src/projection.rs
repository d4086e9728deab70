//! Outbound view of a session history.
//!
//! The model must never see a tool call without a result, so calls that never
//! resolved (cancelled turns, interrupted processes) are removed from the
//! assistant message that issued them and replaced by a short note.

use std::collections::HashSet;

use cadchat_core::conversation::pending_calls;
use cadchat_core::{Message, Part, Role};

pub fn unresolved_note(call_id: &str, tool_name: &str) -> String {
    format!(
        "[The {} call {} was cancelled before it finished. It has no result; do not assume it succeeded.]",
        tool_name, call_id
    )
}

/// System instruction followed by the history with unresolved calls elided
pub fn project(system_prompt: &str, messages: &[Message]) -> Vec<Message> {
    let pending: HashSet<String> = pending_calls(messages)
        .into_iter()
        .map(|call| call.id.clone())
        .collect();

    let mut projected = Vec::with_capacity(messages.len() + 1);
    projected.push(Message::system(system_prompt));

    for message in messages {
        if message.role != Role::Assistant || !message.tool_calls().any(|c| pending.contains(&c.id)) {
            projected.push(message.clone());
            continue;
        }

        let mut parts = Vec::with_capacity(message.parts.len());
        for part in &message.parts {
            match part {
                Part::ToolCall(call) if pending.contains(&call.id) => {
                    parts.push(Part::text(unresolved_note(&call.id, &call.name)));
                }
                other => parts.push(other.clone()),
            }
        }
        projected.push(Message::with_parts(Role::Assistant, parts).with_id(message.id.clone()));
    }

    projected
}
