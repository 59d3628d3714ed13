//! Core types for the SwarmForge orchestrator protocol.
//!
//! This crate provides the framing and the data model. It knows nothing about
//! sockets; the client crate moves these types over the wire and the
//! generation crate consumes the asset model.

mod asset;
pub mod codec;
mod envelope;
mod message;

pub use asset::{
    AssetKind, AssetMetadata, ErrorRecord, GenerationErrorKind, GenerationRequest,
    GenerationResult, ImageParams, MeshOperation, Parameters, PrimitiveParams, ProceduralParams,
    ProgressEvent, SCRIPT_ASSET_TYPE, ScriptParams, ScriptSpec, Vec3,
};
pub use codec::{CodecError, EnvelopeHeader};
pub use envelope::{Envelope, now_timestamp};
pub use message::{
    CancelTask, CustomModeInfo, CustomModes, ErrorData, GenerateAsset, GetCustomModes,
    Inbound, InboundMessage, Outbound, Payload, Plan, RunCustomMode, TaskItem, TaskList,
    TaskOutcome, TaskUpdate, ValidateScript,
};

/// Default orchestrator host.
pub const DEFAULT_HOST: &str = "localhost";

/// Default orchestrator port.
pub const DEFAULT_PORT: u16 = 8765;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Socket open, listen loop running.
    Open,
    /// Close handshake in progress.
    Closing,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
