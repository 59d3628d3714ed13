//! Generation dispatch.
//!
//! [`DispatchEngine::dispatch`] validates a request, resolves the backend for
//! its asset kind, runs the primary operation and, for objects and images
//! with a name, persists the result. Failures of every sort come back as a
//! [`GenerationResult`]; nothing a backend does can escape as an error or a
//! panic.

use crate::backend::{
    Backend, BackendError, ImageBackend, PrimitiveBackend, ProceduralBackend, ProgressReporter,
    ScriptGenerator, ScriptingBackend,
};
use crate::stubs::{
    StubImageBackend, StubPrimitiveBackend, StubProceduralBackend, StubScriptingBackend,
};
use futures_util::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use swarmforge_core::{
    AssetKind, ErrorRecord, GenerationErrorKind, GenerationRequest, GenerationResult,
    ProgressEvent, SCRIPT_ASSET_TYPE, ScriptSpec,
};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// The backend slot for each registry entry. `None` means not configured.
#[derive(Clone, Default)]
pub struct Backends {
    pub primitive: Option<Arc<dyn PrimitiveBackend>>,
    pub scripting: Option<Arc<dyn ScriptingBackend>>,
    pub image: Option<Arc<dyn ImageBackend>>,
    pub procedural: Option<Arc<dyn ProceduralBackend>>,
    /// Script authoring, outside the asset kind registry.
    pub scripts: Option<Arc<dyn ScriptGenerator>>,
}

impl Backends {
    /// Simulated backends in every slot.
    pub fn stubs() -> Self {
        Self {
            primitive: Some(Arc::new(StubPrimitiveBackend)),
            scripting: Some(Arc::new(StubScriptingBackend)),
            image: Some(Arc::new(StubImageBackend)),
            procedural: Some(Arc::new(StubProceduralBackend)),
            scripts: Some(Arc::new(StubScriptingBackend)),
        }
    }

    pub fn with_primitive(mut self, backend: Arc<dyn PrimitiveBackend>) -> Self {
        self.primitive = Some(backend);
        self
    }

    pub fn with_scripting(mut self, backend: Arc<dyn ScriptingBackend>) -> Self {
        self.scripting = Some(backend);
        self
    }

    pub fn with_image(mut self, backend: Arc<dyn ImageBackend>) -> Self {
        self.image = Some(backend);
        self
    }

    pub fn with_procedural(mut self, backend: Arc<dyn ProceduralBackend>) -> Self {
        self.procedural = Some(backend);
        self
    }

    pub fn with_scripts(mut self, backend: Arc<dyn ScriptGenerator>) -> Self {
        self.scripts = Some(backend);
        self
    }

    /// Name of the backend configured for `kind`.
    pub fn name_of(&self, kind: AssetKind) -> Option<&str> {
        match kind {
            AssetKind::Primitive => self.primitive.as_deref().map(|b| b.name()),
            AssetKind::Scripting => self.scripting.as_deref().map(|b| b.name()),
            AssetKind::Image => self.image.as_deref().map(|b| b.name()),
            AssetKind::Procedural => self.procedural.as_deref().map(|b| b.name()),
        }
    }
}

/// Outcome of one guarded backend call.
enum Attempt<T> {
    Done(T),
    Failed(BackendError),
    Panicked(String),
}

/// Run a backend future, catching both errors and panics.
async fn attempt<T>(fut: impl Future<Output = Result<T, BackendError>>) -> Attempt<T> {
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(value)) => Attempt::Done(value),
        Ok(Err(error)) => Attempt::Failed(error),
        Err(payload) => Attempt::Panicked(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Convert a failed or panicked attempt into an execution error result.
fn execution_error<T>(
    backend: &str,
    operation: &str,
    attempt: Attempt<T>,
) -> Result<T, GenerationResult> {
    let detail = match attempt {
        Attempt::Done(value) => return Ok(value),
        Attempt::Failed(error) => error.to_string(),
        Attempt::Panicked(message) => format!("panicked: {message}"),
    };
    error!(backend, operation, error = %detail, "backend operation failed");
    Err(GenerationResult::failure(
        GenerationErrorKind::BackendExecutionError,
        format!("{backend} failed during {operation}: {detail}"),
    ))
}

/// What the persist step produced.
enum Persisted {
    Saved(String),
    Placeholder,
}

/// Run a persist step. Backend errors and `None` fall back to the placeholder;
/// a panic is still an execution error.
async fn persist(
    backend: &str,
    operation: &str,
    fut: impl Future<Output = Result<Option<String>, BackendError>>,
) -> Result<Persisted, GenerationResult> {
    match attempt(fut).await {
        Attempt::Done(Some(locator)) => Ok(Persisted::Saved(locator)),
        Attempt::Done(None) => {
            info!(backend, operation, "backend has no persist step, returning placeholder");
            Ok(Persisted::Placeholder)
        }
        Attempt::Failed(error) => {
            warn!(backend, operation, %error, "persist failed, returning placeholder");
            Ok(Persisted::Placeholder)
        }
        Attempt::Panicked(message) => {
            execution_error::<Persisted>(backend, operation, Attempt::Panicked(message))
        }
    }
}

/// Drop a transient object once it has been persisted. A panic here is
/// logged; the asset is already saved.
async fn release(backend: &str, fut: impl Future<Output = ()>) {
    if let Err(payload) = AssertUnwindSafe(fut).catch_unwind().await {
        error!(
            backend,
            operation = "discard",
            panic = %panic_message(payload.as_ref()),
            "backend panicked while discarding"
        );
    }
}

fn object_path(name: &str) -> String {
    format!("Assets/Generated/{name}.prefab")
}

fn texture_path(name: &str) -> String {
    format!("Assets/Generated/Textures/{name}.png")
}

fn unavailable(kind: AssetKind) -> GenerationResult {
    warn!(asset_type = %kind, "no backend configured");
    GenerationResult::failure(
        GenerationErrorKind::BackendUnavailable,
        format!("no backend is configured for `{kind}`"),
    )
}

fn produced_nothing(backend: &str, operation: &str) -> GenerationResult {
    warn!(backend, operation, "backend returned no result");
    GenerationResult::failure(
        GenerationErrorKind::GenerationFailed,
        format!("{backend} could not generate the asset ({operation} returned nothing)"),
    )
}

/// Check a request without contacting any backend.
///
/// Unknown tags pass; they are rejected later as unsupported.
pub fn check_request(request: &GenerationRequest) -> Result<(), String> {
    if request.asset_type.trim().is_empty() {
        return Err("asset type must be specified".to_string());
    }
    let Some(kind) = AssetKind::from_tag(&request.asset_type) else {
        return Ok(());
    };
    let populated = request.populated_kinds();
    if !populated.contains(&kind) {
        return Err(format!("`{kind}` requests need {} parameters", block_name(kind)));
    }
    if let Some(other) = populated.iter().find(|other| **other != kind) {
        return Err(format!(
            "`{kind}` request also carries {} parameters",
            block_name(*other)
        ));
    }
    Ok(())
}

fn block_name(kind: AssetKind) -> &'static str {
    match kind {
        AssetKind::Primitive => "primitive",
        AssetKind::Scripting => "script",
        AssetKind::Image => "image",
        AssetKind::Procedural => "procedural",
    }
}

/// Routes generation requests to the configured backends.
///
/// Holds no per-request state; concurrent dispatches are independent.
pub struct DispatchEngine {
    backends: Backends,
    progress: broadcast::Sender<ProgressEvent>,
}

impl DispatchEngine {
    pub fn new(backends: Backends) -> Self {
        Self::with_progress_capacity(backends, 256)
    }

    pub fn with_progress_capacity(backends: Backends, capacity: usize) -> Self {
        let (progress, _) = broadcast::channel(capacity.max(1));
        Self { backends, progress }
    }

    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    /// Progress from every dispatch. Late subscribers miss earlier events.
    pub fn subscribe_progress(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress.subscribe()
    }

    pub fn validate(&self, request: &GenerationRequest) -> bool {
        check_request(request).is_ok()
    }

    pub async fn dispatch(
        &self,
        request: &GenerationRequest,
        correlation_id: &str,
    ) -> GenerationResult {
        if let Err(message) = check_request(request) {
            warn!(
                correlation_id,
                asset_type = %request.asset_type,
                %message,
                "invalid generation request"
            );
            return GenerationResult::failure(GenerationErrorKind::InvalidParameters, message);
        }
        let Some(kind) = AssetKind::from_tag(&request.asset_type) else {
            warn!(correlation_id, asset_type = %request.asset_type, "unsupported asset type");
            return GenerationResult::failure(
                GenerationErrorKind::UnsupportedAssetType,
                format!("unsupported asset type `{}`", request.asset_type),
            );
        };

        info!(
            correlation_id,
            asset_type = %kind,
            asset_name = %request.asset_name,
            "dispatching generation request"
        );
        let progress = ProgressReporter::new(correlation_id, self.progress.clone());
        let outcome = match kind {
            AssetKind::Primitive => self.run_primitive(request, &progress).await,
            AssetKind::Scripting => self.run_scripting(request, &progress).await,
            AssetKind::Image => self.run_image(request, &progress).await,
            AssetKind::Procedural => self.run_procedural(request, &progress).await,
        };
        let result = outcome.unwrap_or_else(|failure| failure);
        if result.is_success() {
            info!(
                correlation_id,
                locator = result.asset_locator().unwrap_or(""),
                "generation finished"
            );
        }
        result
    }

    /// Forward a cancellation to the backend for `asset_type`.
    pub async fn cancel(&self, asset_type: &str, correlation_id: &str) -> bool {
        if asset_type.eq_ignore_ascii_case(SCRIPT_ASSET_TYPE) {
            let Some(backend) = self.backends.scripts.as_deref() else {
                warn!(correlation_id, "cancel with no script generator configured");
                return false;
            };
            let cancel = backend.cancel(correlation_id);
            return AssertUnwindSafe(cancel).catch_unwind().await.unwrap_or(false);
        }
        let Some(kind) = AssetKind::from_tag(asset_type) else {
            warn!(asset_type, correlation_id, "cancel for unsupported asset type");
            return false;
        };
        let slots = &self.backends;
        let cancel = match kind {
            AssetKind::Primitive => slots.primitive.as_deref().map(|b| b.cancel(correlation_id)),
            AssetKind::Scripting => slots.scripting.as_deref().map(|b| b.cancel(correlation_id)),
            AssetKind::Image => slots.image.as_deref().map(|b| b.cancel(correlation_id)),
            AssetKind::Procedural => slots.procedural.as_deref().map(|b| b.cancel(correlation_id)),
        };
        let Some(cancel) = cancel else {
            warn!(asset_type = %kind, correlation_id, "cancel with no backend configured");
            return false;
        };
        let sent = AssertUnwindSafe(cancel).catch_unwind().await.unwrap_or(false);
        info!(asset_type = %kind, correlation_id, sent, "cancel forwarded");
        sent
    }

    /// Have the script generator write the script described by `spec`.
    pub async fn generate_script(
        &self,
        spec: &ScriptSpec,
        correlation_id: &str,
    ) -> GenerationResult {
        let progress = ProgressReporter::new(correlation_id, self.progress.clone());
        let result = self
            .run_generate_script(spec, &progress)
            .await
            .unwrap_or_else(|failure| failure);
        if result.is_success() {
            info!(correlation_id, locator = result.asset_locator().unwrap_or(""), "script written");
        }
        result
    }

    /// Check a script's source. `Ok(false)` when the generator rejected it.
    pub async fn validate_script(
        &self,
        script_content: &str,
        correlation_id: &str,
    ) -> Result<bool, ErrorRecord> {
        let backend = self.script_generator().map_err(into_record)?;
        let progress = ProgressReporter::new(correlation_id, self.progress.clone());
        let checked = attempt(backend.validate_script(script_content, &progress)).await;
        execution_error(backend.name(), "validate_script", checked).map_err(into_record)
    }

    fn script_generator(&self) -> Result<Arc<dyn ScriptGenerator>, GenerationResult> {
        self.backends.scripts.clone().ok_or_else(|| {
            warn!("no script generator configured");
            GenerationResult::failure(
                GenerationErrorKind::BackendUnavailable,
                "no script generator is configured",
            )
        })
    }

    async fn run_generate_script(
        &self,
        spec: &ScriptSpec,
        progress: &ProgressReporter,
    ) -> Result<GenerationResult, GenerationResult> {
        if spec.name.trim().is_empty() {
            warn!(correlation_id = progress.request_id(), "script request without a name");
            return Err(GenerationResult::failure(
                GenerationErrorKind::InvalidParameters,
                "script name must be specified",
            ));
        }
        let backend = self.script_generator()?;
        let name = backend.name();

        let written = attempt(backend.generate_script(spec, progress)).await;
        match execution_error(name, "generate_script", written)? {
            Some(locator) => Ok(GenerationResult::success(locator)),
            None => Err(produced_nothing(name, "generate_script")),
        }
    }

    async fn run_primitive(
        &self,
        request: &GenerationRequest,
        progress: &ProgressReporter,
    ) -> Result<GenerationResult, GenerationResult> {
        let backend = self
            .backends
            .primitive
            .clone()
            .ok_or_else(|| unavailable(AssetKind::Primitive))?;
        let params = request
            .primitive
            .as_ref()
            .ok_or_else(|| missing_block(AssetKind::Primitive))?;
        let name = backend.name();

        let created = attempt(backend.create_primitive(params, progress)).await;
        let Some(mut object) = execution_error(name, "create_primitive", created)? else {
            return Err(produced_nothing(name, "create_primitive"));
        };

        if !params.operations.is_empty() {
            let modified =
                attempt(backend.modify_mesh(&mut object, &params.operations, progress)).await;
            if !execution_error(name, "modify_mesh", modified)? {
                return Err(GenerationResult::failure(
                    GenerationErrorKind::GenerationFailed,
                    format!("{name} rejected the mesh operations for {object}"),
                ));
            }
        }

        let asset_name = request.asset_name.trim();
        if asset_name.is_empty() {
            return Ok(object_placeholder(&object));
        }
        let path = object_path(asset_name);
        match persist(name, "export", backend.export(&object, &path, progress)).await? {
            Persisted::Saved(locator) => {
                release(name, backend.discard(object)).await;
                Ok(GenerationResult::success(locator))
            }
            Persisted::Placeholder => Ok(object_placeholder(&object)),
        }
    }

    async fn run_scripting(
        &self,
        request: &GenerationRequest,
        progress: &ProgressReporter,
    ) -> Result<GenerationResult, GenerationResult> {
        let backend = self
            .backends
            .scripting
            .clone()
            .ok_or_else(|| unavailable(AssetKind::Scripting))?;
        let params = request
            .script
            .as_ref()
            .ok_or_else(|| missing_block(AssetKind::Scripting))?;
        let name = backend.name();

        let executed = attempt(backend.execute_script(params, progress)).await;
        match execution_error(name, "execute_script", executed)? {
            Some(locator) => Ok(GenerationResult::success(locator)),
            None => Err(produced_nothing(name, "execute_script")),
        }
    }

    async fn run_image(
        &self,
        request: &GenerationRequest,
        progress: &ProgressReporter,
    ) -> Result<GenerationResult, GenerationResult> {
        let backend = self
            .backends
            .image
            .clone()
            .ok_or_else(|| unavailable(AssetKind::Image))?;
        let params = request
            .image
            .as_ref()
            .ok_or_else(|| missing_block(AssetKind::Image))?;
        let name = backend.name();

        let generated = attempt(backend.generate_image(params, progress)).await;
        let Some(image) = execution_error(name, "generate_image", generated)? else {
            return Err(produced_nothing(name, "generate_image"));
        };

        let placeholder = GenerationResult::success(format!("In-memory Texture: {image}"));
        let asset_name = request.asset_name.trim();
        if asset_name.is_empty() {
            return Ok(placeholder);
        }
        let path = texture_path(asset_name);
        match persist(name, "save_image", backend.save_image(&image, &path, progress)).await? {
            Persisted::Saved(locator) => Ok(GenerationResult::success(locator)),
            Persisted::Placeholder => Ok(placeholder),
        }
    }

    async fn run_procedural(
        &self,
        request: &GenerationRequest,
        progress: &ProgressReporter,
    ) -> Result<GenerationResult, GenerationResult> {
        let backend = self
            .backends
            .procedural
            .clone()
            .ok_or_else(|| unavailable(AssetKind::Procedural))?;
        let params = request
            .procedural
            .as_ref()
            .ok_or_else(|| missing_block(AssetKind::Procedural))?;
        let name = backend.name();

        let generated = attempt(backend.generate(params, progress)).await;
        let Some(object) = execution_error(name, "generate", generated)? else {
            return Err(produced_nothing(name, "generate"));
        };

        let asset_name = request.asset_name.trim();
        if asset_name.is_empty() {
            return Ok(object_placeholder(&object));
        }
        let path = object_path(asset_name);
        match persist(name, "materialize", backend.materialize(&object, &path, progress)).await? {
            Persisted::Saved(locator) => {
                release(name, backend.discard(object)).await;
                Ok(GenerationResult::success(locator))
            }
            Persisted::Placeholder => Ok(object_placeholder(&object)),
        }
    }
}

fn into_record(failure: GenerationResult) -> ErrorRecord {
    failure.into_error().unwrap_or(ErrorRecord {
        kind: GenerationErrorKind::GenerationFailed,
        message: "unknown failure".to_string(),
    })
}

fn object_placeholder(object: &impl std::fmt::Display) -> GenerationResult {
    GenerationResult::success(format!("In-memory GameObject: {object}"))
}

// Guarded by `check_request`.
fn missing_block(kind: AssetKind) -> GenerationResult {
    GenerationResult::failure(
        GenerationErrorKind::InvalidParameters,
        format!("`{kind}` requests need {} parameters", block_name(kind)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendResult, GeneratedObject};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use swarmforge_core::{ImageParams, MeshOperation, PrimitiveParams, ScriptParams, Vec3};

    #[derive(Clone, Copy, PartialEq)]
    enum Mode {
        Succeed,
        ReturnNothing,
        Fail,
        Panic,
        ExportFails,
        DiscardPanics,
    }

    /// Primitive backend that counts calls and misbehaves on demand.
    struct CountingPrimitive {
        mode: Mode,
        calls: AtomicUsize,
        discarded: AtomicUsize,
    }

    impl CountingPrimitive {
        fn new(mode: Mode) -> Arc<Self> {
            Arc::new(Self {
                mode,
                calls: AtomicUsize::new(0),
                discarded: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Backend for CountingPrimitive {
        fn name(&self) -> &str {
            "counting"
        }

        async fn cancel(&self, _correlation_id: &str) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    #[async_trait]
    impl PrimitiveBackend for CountingPrimitive {
        async fn create_primitive(
            &self,
            params: &PrimitiveParams,
            progress: &ProgressReporter,
        ) -> BackendResult<Option<GeneratedObject>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            progress.report(0.5, "building");
            match self.mode {
                Mode::ReturnNothing => Ok(None),
                Mode::Fail => Err(BackendError::Failed("mesh kernel crashed".to_string())),
                Mode::Panic => panic!("probuilder exploded"),
                Mode::Succeed | Mode::ExportFails | Mode::DiscardPanics => {
                    Ok(Some(GeneratedObject::new("Cube_Counting", &params.primitive_type)))
                }
            }
        }

        async fn modify_mesh(
            &self,
            object: &mut GeneratedObject,
            operations: &[MeshOperation],
            _progress: &ProgressReporter,
        ) -> BackendResult<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            object
                .applied_operations
                .extend(operations.iter().map(|op| op.operation_type.clone()));
            Ok(true)
        }

        async fn export(
            &self,
            _object: &GeneratedObject,
            asset_path: &str,
            _progress: &ProgressReporter,
        ) -> BackendResult<Option<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.mode == Mode::ExportFails {
                return Err(BackendError::Failed("disk full".to_string()));
            }
            Ok(Some(asset_path.to_string()))
        }

        async fn discard(&self, _object: GeneratedObject) {
            self.discarded.fetch_add(1, Ordering::SeqCst);
            if self.mode == Mode::DiscardPanics {
                panic!("scene already unloaded");
            }
        }
    }

    fn cube(name: &str) -> GenerationRequest {
        GenerationRequest::new("3dmodel_probuilder", name).with_primitive(PrimitiveParams {
            primitive_type: "Cube".to_string(),
            dimensions: Vec3::ONE,
            operations: Vec::new(),
        })
    }

    fn engine_with(backend: Arc<CountingPrimitive>) -> DispatchEngine {
        DispatchEngine::new(Backends::default().with_primitive(backend))
    }

    #[tokio::test]
    async fn cube_is_exported_under_generated_assets() {
        let backend = CountingPrimitive::new(Mode::Succeed);
        let engine = engine_with(backend.clone());

        let result = engine.dispatch(&cube("MyCube"), "req-1").await;

        assert!(result.is_success());
        assert_eq!(result.asset_locator(), Some("Assets/Generated/MyCube.prefab"));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
        assert_eq!(backend.discarded.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_discard_keeps_the_saved_asset() {
        let backend = CountingPrimitive::new(Mode::DiscardPanics);
        let engine = engine_with(backend.clone());

        let result = engine.dispatch(&cube("MyCube"), "req-1b").await;

        assert_eq!(result.asset_locator(), Some("Assets/Generated/MyCube.prefab"));
        assert_eq!(backend.discarded.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn padded_tags_are_unsupported() {
        let engine = DispatchEngine::new(Backends::stubs());
        let texture = GenerationRequest::new(" texture_ai\t", "Moss").with_image(ImageParams {
            prompt: "moss".to_string(),
            ..ImageParams::default()
        });

        let result = engine.dispatch(&texture, "req-1c").await;
        assert_eq!(result.error_kind(), Some(GenerationErrorKind::UnsupportedAssetType));
        assert!(!engine.cancel(" texture_ai", "req-1c").await);
    }

    #[tokio::test]
    async fn unnamed_object_returns_placeholder() {
        let backend = CountingPrimitive::new(Mode::Succeed);
        let engine = engine_with(backend.clone());

        let result = engine.dispatch(&cube("  "), "req-2").await;

        assert_eq!(result.asset_locator(), Some("In-memory GameObject: Cube_Counting"));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert_eq!(backend.discarded.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_export_returns_placeholder() {
        let backend = CountingPrimitive::new(Mode::ExportFails);
        let engine = engine_with(backend.clone());

        let result = engine.dispatch(&cube("MyCube"), "req-3").await;

        assert!(result.is_success());
        assert_eq!(result.asset_locator(), Some("In-memory GameObject: Cube_Counting"));
        assert_eq!(backend.discarded.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn mesh_operations_are_applied_before_export() {
        let backend = CountingPrimitive::new(Mode::Succeed);
        let engine = engine_with(backend.clone());
        let mut request = cube("Beveled");
        if let Some(primitive) = request.primitive.as_mut() {
            primitive.operations.push(MeshOperation {
                operation_type: "Bevel".to_string(),
                parameters: Default::default(),
            });
        }

        let result = engine.dispatch(&request, "req-4").await;

        assert_eq!(result.asset_locator(), Some("Assets/Generated/Beveled.prefab"));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn backend_failures_become_results() {
        let cases = [
            (Mode::ReturnNothing, GenerationErrorKind::GenerationFailed),
            (Mode::Fail, GenerationErrorKind::BackendExecutionError),
            (Mode::Panic, GenerationErrorKind::BackendExecutionError),
        ];
        for (mode, expected) in cases {
            let engine = engine_with(CountingPrimitive::new(mode));
            let result = engine.dispatch(&cube("MyCube"), "req-5").await;
            assert!(!result.is_success());
            assert!(result.asset_locator().is_none());
            assert_eq!(result.error_kind(), Some(expected));
        }

        let engine = engine_with(CountingPrimitive::new(Mode::Panic));
        let result = engine.dispatch(&cube("MyCube"), "req-6").await;
        let message = &result.error().unwrap().message;
        assert!(message.contains("counting"));
        assert!(message.contains("create_primitive"));
        assert!(message.contains("probuilder exploded"));
    }

    #[tokio::test]
    async fn invalid_requests_never_reach_a_backend() {
        let backend = CountingPrimitive::new(Mode::Succeed);
        let engine = engine_with(backend.clone());

        let no_tag = GenerationRequest::new("", "Thing");
        let no_block = GenerationRequest::new("3dmodel_probuilder", "Thing");
        let wrong_block = cube("Thing").with_image(ImageParams::default());
        let image_without_block = GenerationRequest::new("texture_ai", "Moss");

        for request in [&no_tag, &no_block, &wrong_block, &image_without_block] {
            assert!(!engine.validate(request));
            let result = engine.dispatch(request, "req-7").await;
            assert_eq!(result.error_kind(), Some(GenerationErrorKind::InvalidParameters));
        }
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn tags_match_exactly_ignoring_case() {
        let backend = CountingPrimitive::new(Mode::Succeed);
        let engine = engine_with(backend.clone());

        let mut shouting = cube("Loud");
        shouting.asset_type = "3DMODEL_PROBUILDER".to_string();
        assert!(engine.dispatch(&shouting, "req-8").await.is_success());

        let tags = [
            "3dmodel",
            "3dmodel_probuilder_v2",
            "mesh",
            " 3dmodel_probuilder",
            "3dmodel_probuilder\t",
        ];
        for tag in tags {
            let mut request = cube("Nope");
            request.asset_type = tag.to_string();
            assert!(engine.validate(&request));
            let result = engine.dispatch(&request, "req-9").await;
            assert_eq!(result.error_kind(), Some(GenerationErrorKind::UnsupportedAssetType));
        }
    }

    #[tokio::test]
    async fn missing_backend_is_unavailable() {
        let engine = DispatchEngine::new(Backends::default());
        let request = GenerationRequest::new("3dmodel_blender", "Ship").with_script(ScriptParams {
            script_path: "scripts/ship.py".to_string(),
            ..ScriptParams::default()
        });

        let result = engine.dispatch(&request, "req-10").await;
        assert_eq!(result.error_kind(), Some(GenerationErrorKind::BackendUnavailable));
        assert!(!engine.cancel("3dmodel_blender", "req-10").await);
    }

    #[tokio::test]
    async fn cancel_routes_by_tag() {
        let backend = CountingPrimitive::new(Mode::Succeed);
        let engine = engine_with(backend.clone());

        assert!(engine.cancel("3dmodel_probuilder", "req-11").await);
        assert!(!engine.cancel("unknown", "req-11").await);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn progress_is_keyed_by_correlation_id() {
        let engine = engine_with(CountingPrimitive::new(Mode::Succeed));
        let mut progress = engine.subscribe_progress();

        engine.dispatch(&cube("MyCube"), "corr-42").await;

        let event = progress.recv().await.unwrap();
        assert_eq!(event.request_id, "corr-42");
        assert_eq!(event.fraction, 0.5);
    }

    #[tokio::test]
    async fn scripts_go_through_their_own_slot() {
        let engine = DispatchEngine::new(Backends::stubs());
        let spec = swarmforge_core::ScriptSpec {
            name: "DoorOpener".to_string(),
            description: "opens on approach".to_string(),
            target_game_object: None,
        };

        let result = engine.generate_script(&spec, "s-1").await;
        assert_eq!(result.asset_locator(), Some("Assets/Scripts/DoorOpener.cs"));
        assert_eq!(engine.validate_script("class Door {}", "s-2").await, Ok(true));

        let unnamed = engine.generate_script(&Default::default(), "s-3").await;
        assert_eq!(unnamed.error_kind(), Some(GenerationErrorKind::InvalidParameters));
        assert!(engine.cancel("SCRIPT", "s-1").await);

        let bare = DispatchEngine::new(Backends::default());
        let result = bare.generate_script(&spec, "s-4").await;
        assert_eq!(result.error_kind(), Some(GenerationErrorKind::BackendUnavailable));
        let err = bare.validate_script("x", "s-5").await.unwrap_err();
        assert_eq!(err.kind, GenerationErrorKind::BackendUnavailable);
        assert!(!bare.cancel("script", "s-4").await);
    }

    #[tokio::test]
    async fn stub_backends_cover_every_kind() {
        let engine = DispatchEngine::new(Backends::stubs());

        let texture = GenerationRequest::new("texture_ai", "Moss").with_image(ImageParams {
            prompt: "mossy stone".to_string(),
            width: 512,
            height: 512,
            ..ImageParams::default()
        });
        assert_eq!(
            engine.dispatch(&texture, "a").await.asset_locator(),
            Some("Assets/Generated/Textures/Moss.png")
        );

        let terrain = GenerationRequest::new("procedural_unity", "Hills").with_procedural(
            swarmforge_core::ProceduralParams {
                generator_type: "Terrain".to_string(),
                ..Default::default()
            },
        );
        assert_eq!(
            engine.dispatch(&terrain, "b").await.asset_locator(),
            Some("In-memory GameObject: Procedural_Terrain_Stub")
        );

        let script = GenerationRequest::new("3dmodel_blender", "Ship").with_script(ScriptParams {
            script_path: "scripts/ship.py".to_string(),
            ..ScriptParams::default()
        });
        assert_eq!(
            engine.dispatch(&script, "c").await.asset_locator(),
            Some("Generated/BlenderAsset.fbx")
        );
        assert_eq!(engine.backends().name_of(AssetKind::Image), Some("stub-image"));
    }
}
