//! Asset generation data model.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Free-form parameter map.
pub type Parameters = BTreeMap<String, serde_json::Value>;

/// The fixed registry of asset kinds the dispatcher knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    /// Primitive meshes built in-editor.
    Primitive,
    /// Scripts executed by an external 3D tool.
    Scripting,
    /// Synthesized textures.
    Image,
    /// Procedurally generated objects.
    Procedural,
}

impl AssetKind {
    pub const ALL: [AssetKind; 4] = [
        AssetKind::Primitive,
        AssetKind::Scripting,
        AssetKind::Image,
        AssetKind::Procedural,
    ];

    /// Registry key on the wire.
    pub fn tag(self) -> &'static str {
        match self {
            AssetKind::Primitive => "3dmodel_probuilder",
            AssetKind::Scripting => "3dmodel_blender",
            AssetKind::Image => "texture_ai",
            AssetKind::Procedural => "procedural_unity",
        }
    }

    /// Exact, case-insensitive lookup. No prefix or fuzzy matching.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.tag().eq_ignore_ascii_case(tag))
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ONE: Vec3 = Vec3::new(1.0, 1.0, 1.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn is_zero(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.z == 0.0
    }
}

/// A mesh edit such as `Extrude` or `Bevel`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshOperation {
    pub operation_type: String,
    #[serde(default)]
    pub parameters: Parameters,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrimitiveParams {
    /// `Cube`, `Sphere`, ...
    pub primitive_type: String,
    #[serde(default)]
    pub dimensions: Vec3,
    #[serde(default)]
    pub operations: Vec<MeshOperation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptParams {
    /// Template file the tool opens before running the script.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blend_file_path: Option<String>,
    pub script_path: String,
    #[serde(default)]
    pub parameters: Parameters,
}

/// A source script for the orchestrator to write, rather than run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptSpec {
    pub name: String,
    /// What the script should do.
    #[serde(default)]
    pub description: String,
    /// Scene object the script gets attached to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_game_object: Option<String>,
}

/// `asset_type` the orchestrator uses for script authoring.
pub const SCRIPT_ASSET_TYPE: &str = "script";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageParams {
    pub prompt: String,
    pub width: u32,
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    /// Sampler knobs such as `cfg_scale` or `steps`.
    #[serde(default)]
    pub parameters: BTreeMap<String, f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProceduralParams {
    /// `Terrain`, `LSystemTree`, `Building`, ...
    pub generator_type: String,
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// A generation request as supplied by the caller.
///
/// `asset_type` selects the backend; exactly the matching parameter block is
/// expected to be set. The blocks are independent options rather than an enum
/// because requests arrive from untrusted callers and must be validated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub asset_type: String,
    #[serde(default)]
    pub asset_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primitive: Option<PrimitiveParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<ScriptParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub procedural: Option<ProceduralParams>,
    #[serde(default)]
    pub custom_properties: Parameters,
    #[serde(default)]
    pub metadata: AssetMetadata,
}

impl GenerationRequest {
    pub fn new(asset_type: impl Into<String>, asset_name: impl Into<String>) -> Self {
        Self {
            asset_type: asset_type.into(),
            asset_name: asset_name.into(),
            ..Self::default()
        }
    }

    pub fn with_primitive(mut self, params: PrimitiveParams) -> Self {
        self.primitive = Some(params);
        self
    }

    pub fn with_script(mut self, params: ScriptParams) -> Self {
        self.script = Some(params);
        self
    }

    pub fn with_image(mut self, params: ImageParams) -> Self {
        self.image = Some(params);
        self
    }

    pub fn with_procedural(mut self, params: ProceduralParams) -> Self {
        self.procedural = Some(params);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Kinds whose parameter block is populated.
    pub fn populated_kinds(&self) -> Vec<AssetKind> {
        let mut kinds = Vec::new();
        if self.primitive.is_some() {
            kinds.push(AssetKind::Primitive);
        }
        if self.script.is_some() {
            kinds.push(AssetKind::Scripting);
        }
        if self.image.is_some() {
            kinds.push(AssetKind::Image);
        }
        if self.procedural.is_some() {
            kinds.push(AssetKind::Procedural);
        }
        kinds
    }
}

/// Failure classes reported on a [`GenerationResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationErrorKind {
    InvalidParameters,
    UnsupportedAssetType,
    BackendUnavailable,
    /// The backend ran but produced nothing.
    GenerationFailed,
    BackendExecutionError,
}

impl GenerationErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            GenerationErrorKind::InvalidParameters => "invalid_parameters",
            GenerationErrorKind::UnsupportedAssetType => "unsupported_asset_type",
            GenerationErrorKind::BackendUnavailable => "backend_unavailable",
            GenerationErrorKind::GenerationFailed => "generation_failed",
            GenerationErrorKind::BackendExecutionError => "backend_execution_error",
        }
    }
}

impl fmt::Display for GenerationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: GenerationErrorKind,
    /// Suitable for direct display.
    pub message: String,
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Outcome of one dispatch.
///
/// Success carries a locator and no error; failure carries an error and no
/// locator. The constructors are the only way to build one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationResult {
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    asset_locator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<ErrorRecord>,
}

impl GenerationResult {
    pub fn success(asset_locator: impl Into<String>) -> Self {
        Self {
            success: true,
            asset_locator: Some(asset_locator.into()),
            error: None,
        }
    }

    pub fn failure(kind: GenerationErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            asset_locator: None,
            error: Some(ErrorRecord {
                kind,
                message: message.into(),
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn asset_locator(&self) -> Option<&str> {
        self.asset_locator.as_deref()
    }

    pub fn error(&self) -> Option<&ErrorRecord> {
        self.error.as_ref()
    }

    pub fn error_kind(&self) -> Option<GenerationErrorKind> {
        self.error.as_ref().map(|error| error.kind)
    }

    pub fn into_error(self) -> Option<ErrorRecord> {
        self.error
    }
}

/// Progress of one request. `fraction` is clamped to `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub request_id: String,
    pub fraction: f32,
    pub status_text: String,
}

impl ProgressEvent {
    pub fn new(
        request_id: impl Into<String>,
        fraction: f32,
        status_text: impl Into<String>,
    ) -> Self {
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        Self {
            request_id: request_id.into(),
            fraction,
            status_text: status_text.into(),
        }
    }
}
