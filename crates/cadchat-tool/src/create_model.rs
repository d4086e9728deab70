//! The `create_model` capability

use crate::error::{Result, ToolError};
use crate::tool::Tool;
use async_trait::async_trait;
use cadchat_core::types::{DocumentTracker, ModelReference, ToolDefinition};
use cadchat_pipeline::{ConversionPipeline, ConversionRequest};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::Mutex;

pub const CREATE_MODEL: &str = "create_model";

pub const DEFAULT_MAX_SOURCE_LENGTH: usize = 100_000;

const DESCRIPTION: &str = "Compile an OpenSCAD program and import the resulting solid into a new \
Onshape document. Pass the complete program; units are millimetres. Returns the document id, \
a link to the document and a short summary.";

/// What happens when the same source and name are submitted twice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Every call creates a new document
    #[default]
    AlwaysCreate,
    /// Identical source and name return the earlier reference
    ContentHash,
}

/// Arguments accepted by `create_model`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateModelInput {
    pub geometry_source: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl CreateModelInput {
    pub fn from_arguments(arguments: &Value, max_source_length: usize) -> Result<Self> {
        let object = match arguments {
            Value::Object(_) => arguments,
            Value::String(raw) => {
                return Err(ToolError::InvalidInput(format!(
                    "arguments are not a JSON object: {}",
                    raw
                )))
            }
            other => {
                return Err(ToolError::InvalidInput(format!(
                    "arguments must be a JSON object, got {}",
                    other
                )))
            }
        };

        let mut input: CreateModelInput = serde_json::from_value(object.clone())
            .map_err(|e| ToolError::InvalidInput(e.to_string()))?;

        if input.geometry_source.trim().is_empty() {
            return Err(ToolError::InvalidInput(
                "geometrySource must be a non-empty OpenSCAD program".to_string(),
            ));
        }

        let length = input.geometry_source.chars().count();
        if length > max_source_length {
            return Err(ToolError::InvalidInput(format!(
                "geometrySource is {} characters; the limit is {}",
                length, max_source_length
            )));
        }

        input.display_name = input
            .display_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());

        Ok(input)
    }

    /// SHA-256 over source and name
    pub fn content_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.geometry_source.as_bytes());
        hasher.update([0u8]);
        if let Some(name) = &self.display_name {
            hasher.update(name.as_bytes());
        }
        hasher
            .finalize()
            .iter()
            .map(|byte| format!("{:02x}", byte))
            .collect()
    }

    fn into_request(self) -> ConversionRequest {
        let request = ConversionRequest::new(self.geometry_source);
        match self.display_name {
            Some(name) => request.with_display_name(name),
            None => request,
        }
    }
}

pub fn create_model_definition() -> ToolDefinition {
    ToolDefinition::new(
        CREATE_MODEL,
        DESCRIPTION,
        json!({
            "type": "object",
            "properties": {
                "geometrySource": {
                    "type": "string",
                    "minLength": 1,
                    "description": "Complete OpenSCAD program describing the solid"
                },
                "displayName": {
                    "type": "string",
                    "description": "Name for the new Onshape document"
                }
            },
            "required": ["geometrySource"],
            "additionalProperties": false
        }),
    )
}

/// Per content key; holding the lock covers the whole conversion, so
/// concurrent identical calls wait for the first instead of converting too.
type CreatedSlot = Arc<Mutex<Option<ModelReference>>>;

/// Validates input, then hands it to the conversion pipeline.
///
/// Invalid input never reaches the pipeline.
pub struct CreateModelTool {
    pipeline: Arc<dyn ConversionPipeline>,
    max_source_length: usize,
    dedup: DedupPolicy,
    created: DashMap<String, CreatedSlot>,
}

impl CreateModelTool {
    pub fn new(pipeline: Arc<dyn ConversionPipeline>) -> Self {
        Self {
            pipeline,
            max_source_length: DEFAULT_MAX_SOURCE_LENGTH,
            dedup: DedupPolicy::default(),
            created: DashMap::new(),
        }
    }

    pub fn with_max_source_length(mut self, max_source_length: usize) -> Self {
        self.max_source_length = max_source_length;
        self
    }

    pub fn with_dedup(mut self, dedup: DedupPolicy) -> Self {
        self.dedup = dedup;
        self
    }

    pub fn dedup(&self) -> DedupPolicy {
        self.dedup
    }
}

#[async_trait]
impl Tool for CreateModelTool {
    fn definition(&self) -> ToolDefinition {
        create_model_definition()
    }

    async fn invoke(&self, arguments: &Value) -> Result<ModelReference> {
        self.invoke_tracked(arguments, &DocumentTracker::new()).await
    }

    async fn invoke_tracked(&self, arguments: &Value, tracker: &DocumentTracker) -> Result<ModelReference> {
        let input = CreateModelInput::from_arguments(arguments, self.max_source_length)?;

        if self.dedup == DedupPolicy::AlwaysCreate {
            return Ok(self.pipeline.convert_tracked(input.into_request(), tracker).await?);
        }

        let slot = self.created.entry(input.content_key()).or_default().value().clone();
        let mut cached = slot.lock().await;
        if let Some(existing) = cached.as_ref() {
            tracing::info!(
                document_id = %existing.document_id,
                "identical model already created, returning existing document"
            );
            return Ok(existing.clone());
        }

        let reference = self.pipeline.convert_tracked(input.into_request(), tracker).await?;
        *cached = Some(reference.clone());
        Ok(reference)
    }
}
