//! In-process simulated backends.
//!
//! They never touch an external tool; each logs the call, reports completion
//! on the progress channel and returns a deterministic result. Useful for
//! offline runs and as a baseline in tests.

use crate::backend::{
    Backend, BackendResult, GeneratedImage, GeneratedObject, ImageBackend, PrimitiveBackend,
    ProceduralBackend, ProgressReporter, ScriptGenerator, ScriptingBackend,
};
use async_trait::async_trait;
use std::path::Path;
use swarmforge_core::{
    ImageParams, MeshOperation, PrimitiveParams, ProceduralParams, ScriptParams, ScriptSpec,
};
use tracing::{debug, info};

/// Shapes the primitive stub can build.
const SHAPES: [&str; 6] = ["Cube", "Sphere", "Capsule", "Cylinder", "Plane", "Quad"];

fn parse_shape(primitive_type: &str) -> Option<&'static str> {
    SHAPES
        .into_iter()
        .find(|shape| shape.eq_ignore_ascii_case(primitive_type.trim()))
}

#[derive(Debug, Default)]
pub struct StubPrimitiveBackend;

#[async_trait]
impl Backend for StubPrimitiveBackend {
    fn name(&self) -> &str {
        "stub-primitive"
    }

    async fn cancel(&self, correlation_id: &str) -> bool {
        debug!(backend = self.name(), correlation_id, "cancel requested");
        true
    }
}

#[async_trait]
impl PrimitiveBackend for StubPrimitiveBackend {
    async fn create_primitive(
        &self,
        params: &PrimitiveParams,
        progress: &ProgressReporter,
    ) -> BackendResult<Option<GeneratedObject>> {
        info!(backend = self.name(), primitive_type = %params.primitive_type, "creating primitive");
        let object = match parse_shape(&params.primitive_type) {
            Some(shape) => {
                let mut object =
                    GeneratedObject::new(format!("{}_Stub", params.primitive_type), shape);
                if !params.dimensions.is_zero() {
                    object.scale = params.dimensions;
                }
                object
            }
            None => GeneratedObject::new("DefaultCube_Stub", "Cube"),
        };
        progress.report(1.0, "Primitive created (simulated)");
        Ok(Some(object))
    }

    async fn modify_mesh(
        &self,
        object: &mut GeneratedObject,
        operations: &[MeshOperation],
        progress: &ProgressReporter,
    ) -> BackendResult<bool> {
        info!(backend = self.name(), object = %object, count = operations.len(), "modifying mesh");
        object
            .applied_operations
            .extend(operations.iter().map(|op| op.operation_type.clone()));
        progress.report(1.0, "Mesh modified (simulated)");
        Ok(true)
    }

    async fn export(
        &self,
        object: &GeneratedObject,
        asset_path: &str,
        progress: &ProgressReporter,
    ) -> BackendResult<Option<String>> {
        info!(backend = self.name(), object = %object, asset_path, "exporting");
        progress.report(1.0, "Exported (simulated)");
        Ok(Some(asset_path.to_string()))
    }
}

#[derive(Debug, Default)]
pub struct StubScriptingBackend;

#[async_trait]
impl Backend for StubScriptingBackend {
    fn name(&self) -> &str {
        "stub-scripting"
    }

    async fn cancel(&self, correlation_id: &str) -> bool {
        debug!(backend = self.name(), correlation_id, "cancel requested");
        true
    }
}

#[async_trait]
impl ScriptingBackend for StubScriptingBackend {
    async fn execute_script(
        &self,
        params: &ScriptParams,
        progress: &ProgressReporter,
    ) -> BackendResult<Option<String>> {
        info!(backend = self.name(), script = %params.script_path, "executing script");
        progress.report(1.0, "Script executed (simulated)");
        Ok(Some("Generated/BlenderAsset.fbx".to_string()))
    }

    async fn import_file(
        &self,
        path: &str,
        progress: &ProgressReporter,
    ) -> BackendResult<Option<String>> {
        info!(backend = self.name(), path, "importing file");
        let stem = Path::new(path)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("Imported");
        progress.report(1.0, "File imported (simulated)");
        Ok(Some(format!("Generated/{stem}.fbx")))
    }
}

#[async_trait]
impl ScriptGenerator for StubScriptingBackend {
    async fn generate_script(
        &self,
        spec: &ScriptSpec,
        progress: &ProgressReporter,
    ) -> BackendResult<Option<String>> {
        let name = spec.name.trim();
        if name.is_empty() {
            return Ok(None);
        }
        info!(
            backend = self.name(),
            script = name,
            target = ?spec.target_game_object,
            "writing script"
        );
        progress.report(1.0, "Script written (simulated)");
        Ok(Some(format!("Assets/Scripts/{name}.cs")))
    }

    async fn validate_script(
        &self,
        script_content: &str,
        progress: &ProgressReporter,
    ) -> BackendResult<bool> {
        progress.report(1.0, "Script checked (simulated)");
        Ok(!script_content.trim().is_empty())
    }
}

#[derive(Debug, Default)]
pub struct StubImageBackend;

impl StubImageBackend {
    fn fill_for(style: Option<&str>) -> [u8; 4] {
        let style = style.map(str::to_ascii_lowercase).unwrap_or_default();
        if style.contains("blue") {
            [0, 0, 255, 255]
        } else if style.contains("green") {
            [0, 255, 0, 255]
        } else {
            [255, 0, 255, 255]
        }
    }
}

#[async_trait]
impl Backend for StubImageBackend {
    fn name(&self) -> &str {
        "stub-image"
    }

    async fn cancel(&self, correlation_id: &str) -> bool {
        debug!(backend = self.name(), correlation_id, "cancel requested");
        true
    }
}

#[async_trait]
impl ImageBackend for StubImageBackend {
    async fn generate_image(
        &self,
        params: &ImageParams,
        progress: &ProgressReporter,
    ) -> BackendResult<Option<GeneratedImage>> {
        info!(backend = self.name(), prompt = %params.prompt, "generating image");
        let prefix: String = params.prompt.chars().take(10).collect();
        let image = GeneratedImage {
            name: format!("StubTexture_{prefix}"),
            width: if params.width == 0 { 256 } else { params.width },
            height: if params.height == 0 { 256 } else { params.height },
            fill: Self::fill_for(params.style.as_deref()),
        };
        progress.report(1.0, "Image generated (simulated)");
        Ok(Some(image))
    }

    async fn available_styles(&self) -> BackendResult<Vec<String>> {
        Ok(["Cartoon", "Photorealistic", "Impressionistic_Blue", "PixelArt_Green"]
            .into_iter()
            .map(String::from)
            .collect())
    }

    async fn save_image(
        &self,
        image: &GeneratedImage,
        asset_path: &str,
        progress: &ProgressReporter,
    ) -> BackendResult<Option<String>> {
        info!(backend = self.name(), image = %image, asset_path, "saving image");
        progress.report(1.0, "Image saved (simulated)");
        Ok(Some(asset_path.to_string()))
    }
}

/// Procedural stub. Builds a capsule stand-in and has no persist step.
#[derive(Debug, Default)]
pub struct StubProceduralBackend;

#[async_trait]
impl Backend for StubProceduralBackend {
    fn name(&self) -> &str {
        "stub-procedural"
    }

    async fn cancel(&self, correlation_id: &str) -> bool {
        debug!(backend = self.name(), correlation_id, "cancel requested");
        true
    }
}

#[async_trait]
impl ProceduralBackend for StubProceduralBackend {
    async fn generate(
        &self,
        params: &ProceduralParams,
        progress: &ProgressReporter,
    ) -> BackendResult<Option<GeneratedObject>> {
        info!(
            backend = self.name(),
            generator = %params.generator_type,
            "generating procedural asset"
        );
        let generator = if params.generator_type.is_empty() {
            "Default"
        } else {
            params.generator_type.as_str()
        };
        let mut object = GeneratedObject::new(format!("Procedural_{generator}_Stub"), "Capsule");
        object.properties = params.parameters.clone();
        progress.report(1.0, "Procedural asset generated (simulated)");
        Ok(Some(object))
    }

    async fn available_generators(&self) -> BackendResult<Vec<String>> {
        Ok(["Terrain", "LSystemTree", "Building"]
            .into_iter()
            .map(String::from)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarmforge_core::Vec3;

    #[tokio::test]
    async fn script_stub_names_the_file_after_the_script() {
        let progress = ProgressReporter::detached("r");
        let spec = ScriptSpec {
            name: "DoorOpener".to_string(),
            description: "opens the door on approach".to_string(),
            target_game_object: Some("Door".to_string()),
        };

        let path = StubScriptingBackend.generate_script(&spec, &progress).await.unwrap();
        assert_eq!(path.as_deref(), Some("Assets/Scripts/DoorOpener.cs"));
        let unnamed = ScriptSpec::default();
        assert_eq!(StubScriptingBackend.generate_script(&unnamed, &progress).await.unwrap(), None);

        assert!(StubScriptingBackend.validate_script("class Door {}", &progress).await.unwrap());
        assert!(!StubScriptingBackend.validate_script("  ", &progress).await.unwrap());
    }

    #[tokio::test]
    async fn primitive_type_is_case_insensitive_with_cube_fallback() {
        let backend = StubPrimitiveBackend;
        let progress = ProgressReporter::detached("r");

        let sphere = PrimitiveParams {
            primitive_type: "sPhErE".to_string(),
            dimensions: Vec3::new(2.0, 2.0, 2.0),
            operations: Vec::new(),
        };
        let object = backend
            .create_primitive(&sphere, &progress)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(object.shape, "Sphere");
        assert_eq!(object.name, "sPhErE_Stub");
        assert_eq!(object.scale, Vec3::new(2.0, 2.0, 2.0));

        let unknown = PrimitiveParams {
            primitive_type: "Dodecahedron".to_string(),
            ..PrimitiveParams::default()
        };
        let object = backend
            .create_primitive(&unknown, &progress)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(object.shape, "Cube");
        assert_eq!(object.name, "DefaultCube_Stub");
        assert_eq!(object.scale, Vec3::ONE);
    }

    #[tokio::test]
    async fn image_fill_follows_style() {
        let backend = StubImageBackend;
        let params = ImageParams {
            prompt: "weathered copper plates".to_string(),
            width: 64,
            height: 32,
            style: Some("Impressionistic_Blue".to_string()),
            ..ImageParams::default()
        };
        let image = backend
            .generate_image(&params, &ProgressReporter::detached("r"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(image.name, "StubTexture_weathered ");
        assert_eq!((image.width, image.height), (64, 32));
        assert_eq!(image.fill, [0, 0, 255, 255]);
    }

    #[tokio::test]
    async fn secondary_capabilities() {
        assert_eq!(StubImageBackend.available_styles().await.unwrap().len(), 4);
        assert_eq!(
            StubProceduralBackend.available_generators().await.unwrap(),
            vec!["Terrain", "LSystemTree", "Building"]
        );
        let located = StubScriptingBackend
            .import_file("models/ship.blend", &ProgressReporter::detached("r"))
            .await
            .unwrap();
        assert_eq!(located.as_deref(), Some("Generated/ship.fbx"));
    }
}
