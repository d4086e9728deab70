use async_trait::async_trait;
use cadchat_core::chat::ChatRequest;
use eventsource_stream::Eventsource;
use futures::{future, stream, StreamExt};
use reqwest::{header, Client};
use std::sync::Arc;
use tracing::debug;

use crate::error::{LLMError, Result};
use crate::provider::{LLMProvider, ProviderConfig};
use crate::transformer::{LLMStream, SchemaTransformer};

/// Handles the HTTP and SSE plumbing and delegates schema work to `T`.
///
/// No retries happen here; a failed request surfaces to the caller.
pub struct BaseProvider<T: SchemaTransformer> {
    config: ProviderConfig,
    http_client: Client,
    transformer: Arc<T>,
}

impl<T: SchemaTransformer + 'static> BaseProvider<T> {
    pub fn new(config: ProviderConfig, transformer: T) -> Result<Self> {
        // The request timeout is applied to `send` only so long streams are not cut off.
        let http_client = Client::builder()
            .connect_timeout(config.timeout)
            .build()
            .map_err(|e| LLMError::Config(e.to_string()))?;

        Ok(Self {
            config,
            http_client,
            transformer: Arc::new(transformer),
        })
    }

    pub fn provider_id(&self) -> &str {
        &self.config.provider_id
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn build_headers(&self) -> Result<header::HeaderMap> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, header::HeaderValue::from_static("application/json"));
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("text/event-stream"));

        if let Some(key) = &self.config.api_key {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|e| LLMError::Config(format!("Invalid api key: {}", e)))?;
            headers.insert(header::AUTHORIZATION, value);
        }

        for (key, value) in &self.config.headers {
            let header_name = header::HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| LLMError::Config(format!("Invalid header name: {}", e)))?;
            let header_value = header::HeaderValue::from_str(value)
                .map_err(|e| LLMError::Config(format!("Invalid header value: {}", e)))?;
            headers.insert(header_name, header_value);
        }

        Ok(headers)
    }

    /// Send a streaming request
    pub async fn send_stream_request(&self, request: ChatRequest) -> Result<LLMStream> {
        let body = self.transformer.transform_request(&request)?;
        let headers = self.build_headers()?;
        let url = self.config.completions_url();

        debug!(
            provider = %self.config.provider_id,
            model = %request.model,
            messages = request.messages.len(),
            "Sending streaming chat request"
        );

        let send = self.http_client.post(&url).headers(headers).json(&body).send();
        let response = tokio::time::timeout(self.config.timeout, send)
            .await
            .map_err(|_| LLMError::Timeout(self.config.timeout.as_secs()))?
            .map_err(|e| LLMError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(60);
            let error_text = response.text().await.unwrap_or_default();

            return Err(match status.as_u16() {
                401 | 403 => LLMError::Auth(error_text),
                429 => LLMError::RateLimited { retry_after },
                code => LLMError::Api {
                    status: code,
                    message: error_text,
                },
            });
        }

        let transformer = self.transformer.clone();
        let stream = response
            .bytes_stream()
            .eventsource()
            .take_while(|event| {
                future::ready(!matches!(event, Ok(e) if e.data.trim() == "[DONE]"))
            })
            .map(move |event| -> Vec<Result<_>> {
                match event {
                    Ok(event) => match transformer.parse_stream_chunk(&event.data) {
                        Ok(chunks) => chunks.into_iter().map(Ok).collect(),
                        Err(e) => vec![Err(LLMError::Transform(e))],
                    },
                    Err(e) => vec![Err(LLMError::Stream(e.to_string()))],
                }
            })
            .flat_map(stream::iter);

        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl<T: SchemaTransformer + 'static> LLMProvider for BaseProvider<T> {
    fn provider_id(&self) -> &str {
        self.provider_id()
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<LLMStream> {
        self.send_stream_request(request).await
    }
}
