//! Resolves tool calls into results

use crate::error::ToolError;
use crate::registry::ToolRegistry;
use async_trait::async_trait;
use cadchat_core::types::{
    DocumentTracker, ErrorCode, ModelReference, ToolCallRequest, ToolCallResult, ToolDefinition,
    ToolFailure,
};
use std::time::{Duration, Instant};
use tokio::time::timeout;

/// What the orchestrator dispatches tool calls through
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Tools to advertise on every model request
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Execute one call. Always yields exactly one result carrying the
    /// request's id; failures are values, never errors.
    async fn execute(&self, call: &ToolCallRequest) -> ToolCallResult;

    /// Same as `execute`; `tracker` receives the id of any document the
    /// call creates, even if this future is dropped before it resolves.
    async fn execute_tracked(&self, call: &ToolCallRequest, _tracker: &DocumentTracker) -> ToolCallResult {
        self.execute(call).await
    }
}

/// Default executor over a capability table with a per-call deadline
#[derive(Debug, Clone)]
pub struct ToolGateway {
    registry: ToolRegistry,
    call_timeout: Duration,
}

impl ToolGateway {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry,
            call_timeout: Duration::from_secs(180),
        }
    }

    /// Set the per-call deadline
    pub fn with_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    async fn run(&self, call: &ToolCallRequest, tracker: &DocumentTracker) -> Result<ModelReference, ToolError> {
        let tool = self
            .registry
            .get(&call.name)
            .ok_or_else(|| ToolError::UnknownTool(call.name.clone()))?;

        match timeout(self.call_timeout, tool.invoke_tracked(&call.arguments, tracker)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout {
                millis: self.call_timeout.as_millis() as u64,
                document_id: tracker.document_id(),
            }),
        }
    }
}

#[async_trait]
impl ToolExecutor for ToolGateway {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.registry.definitions()
    }

    async fn execute(&self, call: &ToolCallRequest) -> ToolCallResult {
        self.execute_tracked(call, &DocumentTracker::new()).await
    }

    async fn execute_tracked(&self, call: &ToolCallRequest, tracker: &DocumentTracker) -> ToolCallResult {
        let start = Instant::now();
        tracing::debug!(call_id = %call.id, tool = %call.name, "executing tool call");

        match self.run(call, tracker).await {
            Ok(reference) => {
                tracing::info!(
                    call_id = %call.id,
                    tool = %call.name,
                    document_id = %reference.document_id,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "tool call succeeded"
                );
                ToolCallResult::success(call.id.clone(), reference)
            }
            Err(error) => {
                let mut failure = ToolFailure::from(error);
                if failure.error_code == ErrorCode::UnknownTool {
                    failure.message = format!(
                        "{}; available tools: {}",
                        failure.message,
                        self.registry.names().join(", ")
                    );
                }
                tracing::warn!(
                    call_id = %call.id,
                    tool = %call.name,
                    code = %failure.error_code,
                    document_id = ?failure.document_id,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "tool call failed: {}",
                    failure.message
                );
                ToolCallResult::failure(call.id.clone(), failure)
            }
        }
    }
}
