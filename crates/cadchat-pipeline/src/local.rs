use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::compiler::GeometryCompiler;
use crate::error::{PipelineError, PipelineFailure, PipelineStep};
use crate::onshape::CadPlatform;
use crate::types::ConversionRequest;
use crate::{ConversionPipeline, DocumentTracker, ModelReference};

/// In-process pipeline: compile, tessellate, create document, upload, import
pub struct LocalPipeline {
    compiler: Arc<dyn GeometryCompiler>,
    platform: Arc<dyn CadPlatform>,
}

impl LocalPipeline {
    pub fn new(compiler: Arc<dyn GeometryCompiler>, platform: Arc<dyn CadPlatform>) -> Self {
        Self { compiler, platform }
    }
}

#[async_trait]
impl ConversionPipeline for LocalPipeline {
    async fn convert(&self, request: ConversionRequest) -> Result<ModelReference, PipelineFailure> {
        self.convert_tracked(request, &DocumentTracker::new()).await
    }

    #[instrument(name = "conversion", skip_all, fields(source_len = request.geometry_source.len()))]
    async fn convert_tracked(
        &self,
        request: ConversionRequest,
        tracker: &DocumentTracker,
    ) -> Result<ModelReference, PipelineFailure> {
        if request.geometry_source.trim().is_empty() {
            return Err(PipelineFailure::new(
                PipelineStep::Validate,
                PipelineError::InvalidInput("geometrySource must not be empty".to_string()),
            ));
        }

        // Compile failures stop here, before anything is written remotely.
        let mesh = self
            .compiler
            .compile(&request.geometry_source)
            .await
            .map_err(|e| {
                let step = match e {
                    PipelineError::Tessellation(_) => PipelineStep::Tessellate,
                    _ => PipelineStep::Compile,
                };
                warn!(%step, error = %e, "Conversion failed before import");
                PipelineFailure::new(step, e)
            })?;

        let name = request.document_name();
        let document = self
            .platform
            .create_document(&name)
            .await
            .map_err(|e| PipelineFailure::new(PipelineStep::CreateDocument, e))?;
        let document_id = document.document_id.clone();
        tracker.record(&document_id);

        let blob_id = self
            .platform
            .upload_mesh(&document, &mesh)
            .await
            .map_err(|e| {
                warn!(%document_id, error = %e, "Upload failed after document creation");
                PipelineFailure::new(PipelineStep::UploadMesh, e).with_document(&document_id)
            })?;

        self.platform
            .import_mesh(&document, &blob_id)
            .await
            .map_err(|e| {
                warn!(%document_id, error = %e, "Import failed after document creation");
                PipelineFailure::new(PipelineStep::ImportMesh, e).with_document(&document_id)
            })?;

        let url = self.platform.document_url(&document_id);
        info!(%document_id, mesh_bytes = mesh.len(), "Model imported");

        Ok(ModelReference {
            summary: format!(
                "Created Onshape document \"{}\" (ID: {}). View the model at {}",
                name, document_id, url
            ),
            document_id,
            url,
        })
    }
}
