use serde::{Deserialize, Serialize};

/// Input to one conversion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionRequest {
    pub geometry_source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl ConversionRequest {
    pub fn new(geometry_source: impl Into<String>) -> Self {
        Self {
            geometry_source: geometry_source.into(),
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Provided name, or `AI Model <UTC timestamp>`
    pub fn document_name(&self) -> String {
        match self.display_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!(
                "AI Model {}",
                chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
            ),
        }
    }
}

/// Tessellated mesh produced by the compiler. Never persisted.
#[derive(Debug, Clone)]
pub struct MeshArtifact {
    pub bytes: Vec<u8>,
    pub file_name: String,
}

impl MeshArtifact {
    pub fn stl(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            file_name: "model.stl".to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
