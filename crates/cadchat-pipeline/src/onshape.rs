use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::header::{HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{multipart, Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::error::PipelineError;
use crate::types::MeshArtifact;

/// A document and the workspace new content goes into
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentHandle {
    pub document_id: String,
    pub workspace_id: String,
}

/// Remote CAD platform operations used by the pipeline
#[async_trait]
pub trait CadPlatform: Send + Sync {
    async fn create_document(&self, name: &str) -> Result<DocumentHandle, PipelineError>;

    /// Upload a mesh as a blob element, returning the element id
    async fn upload_mesh(&self, document: &DocumentHandle, mesh: &MeshArtifact) -> Result<String, PipelineError>;

    /// Import an uploaded blob into the document's part studio
    async fn import_mesh(&self, document: &DocumentHandle, blob_element_id: &str) -> Result<(), PipelineError>;

    /// User-facing link to a document
    fn document_url(&self, document_id: &str) -> String;
}

#[derive(Debug, Clone)]
pub struct OnshapeSettings {
    /// REST base, e.g. `https://cad.onshape.com/api/v12`
    pub api_url: String,
    /// Web app base used for document links
    pub app_url: String,
    pub access_key: String,
    pub secret_key: String,
    pub timeout: Duration,
}

impl OnshapeSettings {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            api_url: "https://cad.onshape.com/api/v12".to_string(),
            app_url: "https://cad.onshape.com".to_string(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub fn with_app_url(mut self, url: impl Into<String>) -> Self {
        self.app_url = url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Onshape REST client authenticated with an API key pair (HTTP Basic)
pub struct OnshapeClient {
    client: Client,
    settings: OnshapeSettings,
    auth_header: HeaderValue,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentResponse {
    id: String,
    default_workspace: WorkspaceRef,
}

#[derive(Deserialize)]
struct WorkspaceRef {
    id: String,
}

#[derive(Deserialize)]
struct BlobElementResponse {
    id: String,
}

impl OnshapeClient {
    pub fn new(settings: OnshapeSettings) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| PipelineError::Transport(e.to_string()))?;

        let credentials = STANDARD.encode(format!("{}:{}", settings.access_key, settings.secret_key));
        let mut auth_header = HeaderValue::from_str(&format!("Basic {}", credentials))
            .map_err(|e| PipelineError::InvalidInput(format!("invalid Onshape credentials: {}", e)))?;
        auth_header.set_sensitive(true);

        Ok(Self {
            client,
            settings,
            auth_header,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.settings.api_url.trim_end_matches('/'), path)
    }

    /// Send an authenticated request and decode the JSON body
    async fn send(&self, builder: RequestBuilder) -> Result<Value, PipelineError> {
        let timeout_secs = self.settings.timeout.as_secs();
        let response = builder
            .header(AUTHORIZATION, self.auth_header.clone())
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| PipelineError::from_reqwest(e, timeout_secs))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| PipelineError::from_reqwest(e, timeout_secs))?;

        if !status.is_success() {
            return Err(PipelineError::Remote {
                status: status.as_u16(),
                message: format!("Onshape API error {}: {}", status.as_u16(), text.trim()),
            });
        }

        if text.trim().is_empty() {
            return Ok(json!({}));
        }
        serde_json::from_str(&text).map_err(|e| PipelineError::Parse(e.to_string()))
    }

    fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, PipelineError> {
        serde_json::from_value(value).map_err(|e| PipelineError::Parse(e.to_string()))
    }
}

#[async_trait]
impl CadPlatform for OnshapeClient {
    async fn create_document(&self, name: &str) -> Result<DocumentHandle, PipelineError> {
        let body = json!({ "name": name, "public": false });
        let value = self
            .send(self.client.post(self.endpoint("/documents")).json(&body))
            .await?;
        let doc: DocumentResponse = Self::decode(value)?;
        debug!(document_id = %doc.id, "Created Onshape document");
        Ok(DocumentHandle {
            document_id: doc.id,
            workspace_id: doc.default_workspace.id,
        })
    }

    async fn upload_mesh(&self, document: &DocumentHandle, mesh: &MeshArtifact) -> Result<String, PipelineError> {
        let part = multipart::Part::bytes(mesh.bytes.clone())
            .file_name(mesh.file_name.clone())
            .mime_str("application/octet-stream")
            .map_err(|e| PipelineError::Transport(e.to_string()))?;
        let form = multipart::Form::new().part("file", part);

        let path = format!(
            "/blobelements/d/{}/w/{}",
            document.document_id, document.workspace_id
        );
        let builder = self
            .client
            .post(self.endpoint(&path))
            .query(&[("encodedFilename", mesh.file_name.as_str())])
            .multipart(form);
        let blob: BlobElementResponse = Self::decode(self.send(builder).await?)?;
        debug!(document_id = %document.document_id, blob_element_id = %blob.id, "Uploaded mesh");
        Ok(blob.id)
    }

    async fn import_mesh(&self, document: &DocumentHandle, blob_element_id: &str) -> Result<(), PipelineError> {
        let path = format!(
            "/partstudios/d/{}/w/{}/import",
            document.document_id, document.workspace_id
        );
        let body = json!({
            "format": "STL",
            "blobElementId": blob_element_id,
            "importIntoPartStudio": true,
            "createNewPartStudio": false,
        });
        self.send(self.client.post(self.endpoint(&path)).json(&body)).await?;
        Ok(())
    }

    fn document_url(&self, document_id: &str) -> String {
        format!("{}/documents/{}", self.settings.app_url.trim_end_matches('/'), document_id)
    }
}
