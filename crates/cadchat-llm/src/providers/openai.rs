use async_trait::async_trait;
use cadchat_core::chat::ChatRequest;

use crate::error::Result;
use crate::provider::{BaseProvider, LLMProvider, ProviderConfig};
use crate::transformer::{LLMStream, OpenAiTransformer};

/// OpenAI Provider.
/// Uses the OpenAI API or any compatible endpoint.
pub struct OpenAiProvider {
    base: BaseProvider<OpenAiTransformer>,
}

impl OpenAiProvider {
    pub fn with_config(config: ProviderConfig) -> Result<Self> {
        let base = BaseProvider::new(config, OpenAiTransformer::new())?;
        Ok(Self { base })
    }

    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_config(ProviderConfig::default().with_api_key(api_key))
    }

    /// Create with custom base URL (Azure, local gateways, other compatible APIs)
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        Self::with_config(ProviderConfig::new("openai", base_url).with_api_key(api_key))
    }

    pub fn config(&self) -> &ProviderConfig {
        self.base.config()
    }
}

#[async_trait]
impl LLMProvider for OpenAiProvider {
    fn provider_id(&self) -> &str {
        self.base.provider_id()
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<LLMStream> {
        self.base.chat_stream(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_provider() {
        let provider = OpenAiProvider::new("test-key").unwrap();
        assert_eq!(provider.provider_id(), "openai");
    }

    #[test]
    fn test_with_base_url() {
        let provider = OpenAiProvider::with_base_url("test-key", "https://custom.openai.com/v1").unwrap();
        assert_eq!(
            provider.config().completions_url(),
            "https://custom.openai.com/v1/chat/completions"
        );
    }
}
