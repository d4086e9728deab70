//! Conversion & import pipeline: OpenSCAD source to an STL mesh to an
//! Onshape document.

pub mod error;
pub mod types;
pub mod compiler;
pub mod onshape;
pub mod local;
pub mod remote;

pub use cadchat_core::types::{DocumentTracker, ModelReference};
pub use compiler::{GeometryCompiler, OpenScadCompiler};
pub use error::{PipelineError, PipelineFailure, PipelineStep};
pub use local::LocalPipeline;
pub use onshape::{CadPlatform, DocumentHandle, OnshapeClient, OnshapeSettings};
pub use remote::HttpPipeline;
pub use types::{ConversionRequest, MeshArtifact};

use async_trait::async_trait;

/// Turns geometry source into a remote document.
///
/// Implementations perform no retries: each call is at most one conversion
/// and one remote write.
#[async_trait]
pub trait ConversionPipeline: Send + Sync {
    async fn convert(&self, request: ConversionRequest) -> Result<ModelReference, PipelineFailure>;

    /// Same as `convert`, recording the document id in `tracker` as soon as
    /// the document exists.
    async fn convert_tracked(
        &self,
        request: ConversionRequest,
        _tracker: &DocumentTracker,
    ) -> Result<ModelReference, PipelineFailure> {
        self.convert(request).await
    }
}
