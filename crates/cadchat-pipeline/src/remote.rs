use async_trait::async_trait;
use cadchat_core::types::ErrorCode;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::error::{PipelineError, PipelineFailure, PipelineStep};
use crate::types::ConversionRequest;
use crate::{ConversionPipeline, ModelReference};

/// Client for a conversion service reachable over HTTP.
///
/// `POST <url>` with `{geometrySource, displayName?}`; a 2xx body is the
/// model reference, anything else is a failure.
pub struct HttpPipeline {
    client: Client,
    url: String,
    timeout: Duration,
}

/// Error object returned by a conversion service
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteErrorBody {
    error_code: ErrorCode,
    message: String,
    #[serde(default)]
    document_id: Option<String>,
    #[serde(default)]
    step: Option<PipelineStep>,
}

impl From<RemoteErrorBody> for PipelineFailure {
    fn from(body: RemoteErrorBody) -> Self {
        PipelineFailure {
            step: body.step.unwrap_or(PipelineStep::Remote),
            error_code: body.error_code,
            message: body.message,
            document_id: body.document_id,
        }
    }
}

impl HttpPipeline {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ConversionPipeline for HttpPipeline {
    #[instrument(name = "conversion", skip_all)]
    async fn convert(&self, request: ConversionRequest) -> Result<ModelReference, PipelineFailure> {
        let timeout_secs = self.timeout.as_secs();
        let failure = |e: PipelineError| PipelineFailure::new(PipelineStep::Remote, e);

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| failure(PipelineError::from_reqwest(e, timeout_secs)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| failure(PipelineError::from_reqwest(e, timeout_secs)))?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "Conversion service returned an error");
            return Err(match serde_json::from_str::<RemoteErrorBody>(&text) {
                Ok(body) => body.into(),
                Err(_) => PipelineFailure {
                    step: PipelineStep::Remote,
                    error_code: ErrorCode::PipelineError,
                    message: format!("conversion service returned {}: {}", status.as_u16(), text.trim()),
                    document_id: None,
                },
            });
        }

        if let Ok(body) = serde_json::from_str::<RemoteErrorBody>(&text) {
            return Err(body.into());
        }

        let reference: ModelReference = serde_json::from_str(&text)
            .map_err(|e| failure(PipelineError::Parse(e.to_string())))?;
        debug!(document_id = %reference.document_id, "Conversion service created document");
        Ok(reference)
    }
}
