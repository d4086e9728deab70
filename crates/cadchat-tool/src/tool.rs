use async_trait::async_trait;
use cadchat_core::types::{DocumentTracker, ModelReference, ToolDefinition};
use serde_json::Value;

use crate::error::Result;

/// A capability the model may call
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name, description and argument schema advertised to the model
    fn definition(&self) -> ToolDefinition;

    /// Validate `arguments` and perform the call
    async fn invoke(&self, arguments: &Value) -> Result<ModelReference>;

    /// Same as `invoke`, recording any document the call creates in `tracker`
    async fn invoke_tracked(&self, arguments: &Value, _tracker: &DocumentTracker) -> Result<ModelReference> {
        self.invoke(arguments).await
    }
}
