use cadchat_core::chat::{ChatChunk, ChatRequest, FinishReason};
use cadchat_core::types::{Message, Role, ToolDefinition};
use serde_json::{json, Value};

use crate::error::ConversionError;
use crate::transformer::SchemaTransformer;

/// OpenAI chat-completions schema transformer.
/// Works with OpenAI and compatible endpoints.
#[derive(Debug, Default, Clone)]
pub struct OpenAiTransformer;

impl OpenAiTransformer {
    pub fn new() -> Self {
        Self
    }

    /// Convert one internal message to wire messages.
    ///
    /// Tool messages fan out into one `tool` message per result since the
    /// wire format carries a single `tool_call_id` per message.
    fn convert_message(&self, msg: &Message) -> Vec<Value> {
        match msg.role {
            Role::System | Role::User => vec![json!({
                "role": msg.role.as_str(),
                "content": msg.text(),
            })],
            Role::Assistant => {
                let text = msg.text();
                let content = if text.is_empty() { Value::Null } else { Value::String(text) };
                let mut json = json!({
                    "role": "assistant",
                    "content": content,
                });
                let tool_calls: Vec<Value> = msg
                    .tool_calls()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.name,
                                "arguments": tc.arguments_string(),
                            }
                        })
                    })
                    .collect();
                if !tool_calls.is_empty() {
                    json["tool_calls"] = json!(tool_calls);
                }
                vec![json]
            }
            Role::Tool => msg
                .results()
                .map(|result| {
                    json!({
                        "role": "tool",
                        "tool_call_id": result.call_id,
                        "content": result.content_for_model(),
                    })
                })
                .collect(),
        }
    }
}

impl SchemaTransformer for OpenAiTransformer {
    fn provider_id(&self) -> &str {
        "openai"
    }

    fn transform_request(&self, request: &ChatRequest) -> Result<Value, ConversionError> {
        if request.model.is_empty() {
            return Err(ConversionError::MissingField("model".to_string()));
        }

        let messages: Vec<Value> = request
            .messages
            .iter()
            .flat_map(|m| self.convert_message(m))
            .collect();

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        if !request.tools.is_empty() {
            body["tools"] = self.transform_tools(&request.tools)?;
        }

        if let Some(temp) = request.options.temperature {
            body["temperature"] = json!(temp);
        }

        if let Some(max_tokens) = request.options.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        Ok(body)
    }

    fn parse_stream_chunk(&self, data: &str) -> Result<Vec<ChatChunk>, ConversionError> {
        let data = data.trim();
        if data.is_empty() || data == "[DONE]" {
            return Ok(Vec::new());
        }

        let chunk: Value = serde_json::from_str(data)?;
        if let Some(error) = chunk.get("error") {
            let message = error["message"].as_str().unwrap_or("unknown provider error");
            return Err(ConversionError::InvalidFormat(message.to_string()));
        }

        let mut chunks = Vec::new();
        let choice = chunk["choices"].get(0);

        if let Some(content) = choice.and_then(|c| c["delta"]["content"].as_str()) {
            if !content.is_empty() {
                chunks.push(ChatChunk::content(content));
            }
        }

        if let Some(tool_calls) = choice.and_then(|c| c["delta"]["tool_calls"].as_array()) {
            for (position, tc) in tool_calls.iter().enumerate() {
                let index = tc["index"].as_u64().map(|i| i as usize).unwrap_or(position);
                let id = tc["id"].as_str();
                let name = tc["function"]["name"].as_str();

                if id.is_some() || name.is_some() {
                    chunks.push(ChatChunk::ToolCallStart {
                        index,
                        call_id: id.unwrap_or_default().to_string(),
                        name: name.unwrap_or_default().to_string(),
                    });
                }

                if let Some(arguments) = tc["function"]["arguments"].as_str() {
                    if !arguments.is_empty() {
                        chunks.push(ChatChunk::ToolCallDelta {
                            index,
                            arguments_delta: arguments.to_string(),
                        });
                    }
                }
            }
        }

        if let Some(reason) = choice.and_then(|c| c["finish_reason"].as_str()) {
            chunks.push(ChatChunk::finish(FinishReason::from_wire(reason)));
        }

        if let Some(usage) = chunk.get("usage").filter(|u| u.is_object()) {
            let input = usage["prompt_tokens"].as_u64().unwrap_or(0) as u32;
            let output = usage["completion_tokens"].as_u64().unwrap_or(0) as u32;
            chunks.push(ChatChunk::Usage {
                input_tokens: input,
                output_tokens: output,
            });
        }

        Ok(chunks)
    }

    fn transform_tools(&self, tools: &[ToolDefinition]) -> Result<Value, ConversionError> {
        let tools_json: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();

        Ok(json!(tools_json))
    }
}
