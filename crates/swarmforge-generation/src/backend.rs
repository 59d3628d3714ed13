//! Backend capability traits.
//!
//! One trait per asset kind, all sharing [`Backend`] for identity and
//! cancellation. Primary operations return `Ok(None)` when the backend could
//! not produce anything; that is reported as a generation failure, distinct
//! from an `Err`, which means the backend itself broke.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use swarmforge_client::ClientError;
use swarmforge_core::{
    ImageParams, MeshOperation, Parameters, PrimitiveParams, ProceduralParams, ProgressEvent,
    ScriptParams, ScriptSpec, Vec3,
};
use thiserror::Error;
use tokio::sync::broadcast;

/// Backend failure.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("`{operation}` is not supported by {backend}")]
    Unsupported {
        backend: String,
        operation: &'static str,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("{0}")]
    Failed(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Progress sink scoped to one correlation id.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    request_id: String,
    tx: broadcast::Sender<ProgressEvent>,
}

impl ProgressReporter {
    pub fn new(request_id: impl Into<String>, tx: broadcast::Sender<ProgressEvent>) -> Self {
        Self {
            request_id: request_id.into(),
            tx,
        }
    }

    /// A reporter nobody listens to.
    pub fn detached(request_id: impl Into<String>) -> Self {
        let (tx, _) = broadcast::channel(1);
        Self::new(request_id, tx)
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn report(&self, fraction: f32, status_text: impl Into<String>) {
        let _ = self
            .tx
            .send(ProgressEvent::new(self.request_id.clone(), fraction, status_text));
    }
}

/// A transient scene object produced by a primitive or procedural backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedObject {
    pub name: String,
    /// Mesh the object was built from, e.g. `Cube` or `Capsule`.
    pub shape: String,
    pub scale: Vec3,
    #[serde(default)]
    pub applied_operations: Vec<String>,
    #[serde(default)]
    pub properties: Parameters,
}

impl GeneratedObject {
    pub fn new(name: impl Into<String>, shape: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shape: shape.into(),
            scale: Vec3::ONE,
            applied_operations: Vec::new(),
            properties: Parameters::new(),
        }
    }
}

impl fmt::Display for GeneratedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A transient texture produced by an image backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Dominant RGBA color.
    pub fill: [u8; 4],
}

impl fmt::Display for GeneratedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Shared by every backend.
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    /// Best effort. `true` means a cancellation signal was sent, not that the
    /// work stopped.
    async fn cancel(&self, correlation_id: &str) -> bool;
}

#[async_trait]
pub trait PrimitiveBackend: Backend {
    async fn create_primitive(
        &self,
        params: &PrimitiveParams,
        progress: &ProgressReporter,
    ) -> BackendResult<Option<GeneratedObject>>;

    /// Apply mesh edits in order. `false` when the backend rejected them.
    async fn modify_mesh(
        &self,
        object: &mut GeneratedObject,
        operations: &[MeshOperation],
        progress: &ProgressReporter,
    ) -> BackendResult<bool>;

    /// Persist `object` at `asset_path` and return its locator.
    async fn export(
        &self,
        object: &GeneratedObject,
        asset_path: &str,
        progress: &ProgressReporter,
    ) -> BackendResult<Option<String>>;

    /// Release a transient object once it has been persisted.
    async fn discard(&self, _object: GeneratedObject) {}
}

#[async_trait]
pub trait ScriptingBackend: Backend {
    /// Run a script in the external tool. Returns the produced asset locator.
    async fn execute_script(
        &self,
        params: &ScriptParams,
        progress: &ProgressReporter,
    ) -> BackendResult<Option<String>>;

    async fn import_file(
        &self,
        path: &str,
        progress: &ProgressReporter,
    ) -> BackendResult<Option<String>>;
}

/// Authors source scripts, as opposed to running them.
#[async_trait]
pub trait ScriptGenerator: Backend {
    /// Write the script described by `spec`. Returns where it was saved.
    async fn generate_script(
        &self,
        spec: &ScriptSpec,
        progress: &ProgressReporter,
    ) -> BackendResult<Option<String>>;

    /// `false` when the script was checked and rejected.
    async fn validate_script(
        &self,
        script_content: &str,
        progress: &ProgressReporter,
    ) -> BackendResult<bool>;
}

#[async_trait]
pub trait ImageBackend: Backend {
    async fn generate_image(
        &self,
        params: &ImageParams,
        progress: &ProgressReporter,
    ) -> BackendResult<Option<GeneratedImage>>;

    async fn available_styles(&self) -> BackendResult<Vec<String>>;

    /// Persist `image` at `asset_path`. `Ok(None)` when the backend cannot.
    async fn save_image(
        &self,
        _image: &GeneratedImage,
        _asset_path: &str,
        _progress: &ProgressReporter,
    ) -> BackendResult<Option<String>> {
        Ok(None)
    }
}

#[async_trait]
pub trait ProceduralBackend: Backend {
    async fn generate(
        &self,
        params: &ProceduralParams,
        progress: &ProgressReporter,
    ) -> BackendResult<Option<GeneratedObject>>;

    async fn available_generators(&self) -> BackendResult<Vec<String>>;

    /// Persist `object` at `asset_path`. `Ok(None)` when the backend cannot.
    async fn materialize(
        &self,
        _object: &GeneratedObject,
        _asset_path: &str,
        _progress: &ProgressReporter,
    ) -> BackendResult<Option<String>> {
        Ok(None)
    }

    async fn discard(&self, _object: GeneratedObject) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reporter_tags_events_with_its_request_id() {
        let (tx, mut rx) = broadcast::channel(4);
        let reporter = ProgressReporter::new("req-9", tx);
        reporter.report(0.5, "halfway");
        reporter.report(2.0, "done");

        let first = rx.recv().await.unwrap();
        assert_eq!(first.request_id, "req-9");
        assert_eq!(first.fraction, 0.5);
        assert_eq!(rx.recv().await.unwrap().fraction, 1.0);
    }

    #[test]
    fn detached_reporter_does_not_fail() {
        ProgressReporter::detached("nobody").report(0.1, "ignored");
    }

    #[test]
    fn unsupported_message_names_backend_and_operation() {
        let error = BackendError::Unsupported {
            backend: "remote".to_string(),
            operation: "import_file",
        };
        assert_eq!(error.to_string(), "`import_file` is not supported by remote");
    }
}
