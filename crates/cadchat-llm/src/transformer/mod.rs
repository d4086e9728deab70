pub mod openai;

pub use openai::OpenAiTransformer;

use cadchat_core::chat::{ChatChunk, ChatRequest};
use cadchat_core::types::ToolDefinition;
use futures::Stream;
use serde_json::Value;
use std::pin::Pin;

use crate::error::ConversionError;

/// Stream of decoded chunks from one model response
pub type LLMStream = Pin<Box<dyn Stream<Item = Result<ChatChunk, crate::LLMError>> + Send>>;

/// Converts between the internal conversation model and a provider wire format
pub trait SchemaTransformer: Send + Sync {
    fn provider_id(&self) -> &str;

    /// Transform request to provider-specific format
    fn transform_request(&self, request: &ChatRequest) -> Result<Value, ConversionError>;

    /// Decode one SSE `data` payload; a payload may carry several chunks
    fn parse_stream_chunk(&self, data: &str) -> Result<Vec<ChatChunk>, ConversionError>;

    fn transform_tools(&self, tools: &[ToolDefinition]) -> Result<Value, ConversionError>;
}
