//! Folds a model's chunk stream into ordered message parts

use std::collections::HashSet;

use cadchat_core::chat::{ChatChunk, FinishReason};
use cadchat_core::{Part, ToolCallRequest};

#[derive(Debug)]
enum Segment {
    Text(String),
    Call {
        index: usize,
        id: String,
        name: String,
        arguments: String,
    },
}

/// Collects streamed text and tool calls in emission order
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    segments: Vec<Segment>,
    finish: Option<FinishReason>,
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the text delta to forward to the client, if any
    pub fn push(&mut self, chunk: ChatChunk) -> Option<String> {
        match chunk {
            ChatChunk::Content { text } => {
                if text.is_empty() {
                    return None;
                }
                match self.segments.last_mut() {
                    Some(Segment::Text(existing)) => existing.push_str(&text),
                    _ => self.segments.push(Segment::Text(text.clone())),
                }
                Some(text)
            }
            ChatChunk::ToolCallStart {
                index,
                call_id,
                name,
            } => {
                let continued = self.call_position(index).and_then(|pos| {
                    match &mut self.segments[pos] {
                        // a later fragment of a call already under way
                        Segment::Call { id, name: existing, .. }
                            if id.is_empty() || existing.is_empty() || *id == call_id =>
                        {
                            Some((id, existing))
                        }
                        _ => None,
                    }
                });
                match continued {
                    Some((id, existing)) => {
                        if id.is_empty() {
                            *id = call_id;
                        }
                        if existing.is_empty() {
                            *existing = name;
                        }
                    }
                    None => self.segments.push(Segment::Call {
                        index,
                        id: call_id,
                        name,
                        arguments: String::new(),
                    }),
                }
                None
            }
            ChatChunk::ToolCallDelta {
                index,
                arguments_delta,
            } => {
                match self.call_position(index) {
                    Some(pos) => {
                        if let Segment::Call { arguments, .. } = &mut self.segments[pos] {
                            arguments.push_str(&arguments_delta);
                        }
                    }
                    None => self.segments.push(Segment::Call {
                        index,
                        id: String::new(),
                        name: String::new(),
                        arguments: arguments_delta,
                    }),
                }
                None
            }
            ChatChunk::Usage {
                input_tokens,
                output_tokens,
            } => {
                self.prompt_tokens = input_tokens;
                self.completion_tokens = output_tokens;
                None
            }
            ChatChunk::Finish { reason } => {
                self.finish = Some(reason);
                None
            }
        }
    }

    /// Position of the most recent call with this stream index
    fn call_position(&self, wanted: usize) -> Option<usize> {
        self.segments.iter().rposition(|segment| {
            matches!(segment, Segment::Call { index, .. } if *index == wanted)
        })
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finish
    }

    pub fn usage(&self) -> (u32, u32) {
        (self.prompt_tokens, self.completion_tokens)
    }

    pub fn has_tool_calls(&self) -> bool {
        self.segments
            .iter()
            .any(|segment| matches!(segment, Segment::Call { .. }))
    }

    /// Text streamed so far
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Text(text) => Some(text.as_str()),
                Segment::Call { .. } => None,
            })
            .collect()
    }

    /// Final parts. Call ids that are empty or already in `used_ids` are
    /// replaced by fresh `call_<uuid>` ids; every id handed out is added
    /// to `used_ids`.
    pub fn into_parts(self, used_ids: &mut HashSet<String>) -> Vec<Part> {
        self.segments
            .into_iter()
            .filter_map(|segment| match segment {
                Segment::Text(text) if text.is_empty() => None,
                Segment::Text(text) => Some(Part::text(text)),
                Segment::Call {
                    id,
                    name,
                    arguments,
                    ..
                } => {
                    let id = if id.is_empty() || used_ids.contains(&id) {
                        let fresh = format!("call_{}", uuid::Uuid::new_v4().simple());
                        tracing::debug!(original = %id, replacement = %fresh, "replacing tool call id");
                        fresh
                    } else {
                        id
                    };
                    used_ids.insert(id.clone());
                    Some(Part::tool_call(ToolCallRequest::from_raw_arguments(
                        id, name, &arguments,
                    )))
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn start(index: usize, id: &str) -> ChatChunk {
        ChatChunk::ToolCallStart {
            index,
            call_id: id.to_string(),
            name: "create_model".to_string(),
        }
    }

    fn delta(index: usize, args: &str) -> ChatChunk {
        ChatChunk::ToolCallDelta {
            index,
            arguments_delta: args.to_string(),
        }
    }

    #[test]
    fn test_text_and_calls_keep_emission_order() {
        let mut acc = ResponseAccumulator::new();
        assert_eq!(acc.push(ChatChunk::content("Building ")), Some("Building ".to_string()));
        acc.push(ChatChunk::content("it."));
        acc.push(start(0, "call_a"));
        acc.push(delta(0, "{\"geometrySource\":"));
        acc.push(delta(0, "\"cube(1);\"}"));
        acc.push(ChatChunk::content("Done"));
        acc.push(ChatChunk::finish(FinishReason::ToolCalls));

        assert_eq!(acc.text(), "Building it.Done");
        assert_eq!(acc.finish_reason(), Some(FinishReason::ToolCalls));

        let parts = acc.into_parts(&mut HashSet::new());
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].as_text(), Some("Building it."));
        let call = parts[1].as_tool_call().unwrap();
        assert_eq!(call.id, "call_a");
        assert_eq!(call.arguments, json!({"geometrySource": "cube(1);"}));
        assert_eq!(parts[2].as_text(), Some("Done"));
    }

    #[test]
    fn test_interleaved_calls_by_index() {
        let mut acc = ResponseAccumulator::new();
        acc.push(start(0, "a"));
        acc.push(start(1, "b"));
        acc.push(delta(1, "{\"geometrySource\":\"sphere(2);\"}"));
        acc.push(delta(0, "{\"geometrySource\":\"cube(2);\"}"));

        let parts = acc.into_parts(&mut HashSet::new());
        let calls: Vec<&ToolCallRequest> = parts.iter().filter_map(|p| p.as_tool_call()).collect();
        assert_eq!(calls[0].id, "a");
        assert_eq!(calls[0].arguments["geometrySource"], "cube(2);");
        assert_eq!(calls[1].id, "b");
        assert_eq!(calls[1].arguments["geometrySource"], "sphere(2);");
    }

    #[test]
    fn test_missing_and_duplicate_ids_replaced() {
        let mut acc = ResponseAccumulator::new();
        acc.push(start(0, ""));
        acc.push(start(1, "call_old"));
        acc.push(start(2, "call_new"));

        let mut used: HashSet<String> = ["call_old".to_string()].into_iter().collect();
        let parts = acc.into_parts(&mut used);
        let ids: Vec<&str> = parts
            .iter()
            .filter_map(|p| p.as_tool_call())
            .map(|c| c.id.as_str())
            .collect();

        assert!(ids[0].starts_with("call_") && ids[0].len() > 5);
        assert_ne!(ids[1], "call_old");
        assert!(ids[1].starts_with("call_"));
        assert_eq!(ids[2], "call_new");
        assert_eq!(used.len(), 4);
    }

    #[test]
    fn test_malformed_arguments_kept_raw() {
        let mut acc = ResponseAccumulator::new();
        acc.push(start(0, "a"));
        acc.push(delta(0, "{\"geometrySource\": "));

        let parts = acc.into_parts(&mut HashSet::new());
        let call = parts[0].as_tool_call().unwrap();
        assert_eq!(call.arguments, Value::String("{\"geometrySource\": ".to_string()));
    }

    #[test]
    fn test_usage_recorded() {
        let mut acc = ResponseAccumulator::new();
        acc.push(ChatChunk::Usage {
            input_tokens: 12,
            output_tokens: 5,
        });
        assert_eq!(acc.usage(), (12, 5));
        assert!(!acc.has_tool_calls());
    }
}
