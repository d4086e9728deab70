use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::types::MeshArtifact;

/// Largest diagnostic kept from the compiler's stderr
const MAX_DIAGNOSTIC_SIZE: usize = 8 * 1024;

/// Compiles geometry source into a mesh
#[async_trait]
pub trait GeometryCompiler: Send + Sync {
    async fn compile(&self, source: &str) -> Result<MeshArtifact, PipelineError>;
}

/// Runs the OpenSCAD executable: `<exe> -o model.stl model.scad`.
///
/// Facet counts and units are whatever the compiler produces.
#[derive(Debug, Clone)]
pub struct OpenScadCompiler {
    executable: PathBuf,
    timeout: Duration,
}

impl OpenScadCompiler {
    pub fn new(executable: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            executable: executable.into(),
            timeout,
        }
    }

    pub fn executable(&self) -> &std::path::Path {
        &self.executable
    }
}

impl Default for OpenScadCompiler {
    fn default() -> Self {
        Self::new("openscad", Duration::from_secs(30))
    }
}

/// Cut diagnostics to a bounded size on a char boundary
fn truncate_diagnostic(output: &str) -> String {
    let output = output.trim();
    if output.len() <= MAX_DIAGNOSTIC_SIZE {
        return output.to_string();
    }
    let mut end = MAX_DIAGNOSTIC_SIZE;
    while !output.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n[diagnostic truncated]", &output[..end])
}

#[async_trait]
impl GeometryCompiler for OpenScadCompiler {
    async fn compile(&self, source: &str) -> Result<MeshArtifact, PipelineError> {
        // Private working directory, removed when `workdir` drops.
        let workdir = tempfile::tempdir()?;
        let input = workdir.path().join("model.scad");
        let output = workdir.path().join("model.stl");
        tokio::fs::write(&input, source).await?;

        let mut command = Command::new(&self.executable);
        command
            .arg("-o")
            .arg(&output)
            .arg(&input)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!(executable = %self.executable.display(), "Running geometry compiler");

        let result = timeout(self.timeout, command.output())
            .await
            .map_err(|_| PipelineError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| {
                PipelineError::CompilerUnavailable(format!(
                    "failed to execute '{}': {}",
                    self.executable.display(),
                    e
                ))
            })?;

        let stderr = String::from_utf8_lossy(&result.stderr);
        if !result.status.success() {
            let diagnostic = truncate_diagnostic(&stderr);
            let diagnostic = if diagnostic.is_empty() {
                format!("compiler exited with {}", result.status)
            } else {
                diagnostic
            };
            warn!(status = %result.status, "Geometry compiler rejected source");
            return Err(PipelineError::Compile(diagnostic));
        }

        let bytes = match tokio::fs::read(&output).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        if bytes.is_empty() {
            let detail = truncate_diagnostic(&stderr);
            return Err(PipelineError::Tessellation(if detail.is_empty() {
                "compiler produced no mesh output".to_string()
            } else {
                format!("compiler produced no mesh output: {}", detail)
            }));
        }

        debug!(bytes = bytes.len(), "Mesh produced");
        Ok(MeshArtifact::stl(bytes))
    }
}
