pub mod config;
pub mod base;

pub use config::ProviderConfig;
pub use base::BaseProvider;

use async_trait::async_trait;
use cadchat_core::chat::ChatRequest;

use crate::error::Result;
use crate::transformer::LLMStream;

/// A generative model that answers with a chunk stream
#[async_trait]
pub trait LLMProvider: Send + Sync {
    fn provider_id(&self) -> &str;

    /// Send a chat request and stream the response
    async fn chat_stream(&self, request: ChatRequest) -> Result<LLMStream>;
}
