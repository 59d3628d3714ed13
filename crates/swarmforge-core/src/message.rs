//! Protocol payloads.
//!
//! Each payload type is bound to its wire tag through [`Payload::TYPE`]. The
//! [`Inbound`] and [`Outbound`] markers split them by direction so a request
//! type can never be registered as an inbound handler.

use crate::codec::{self, CodecError};
use crate::envelope::Envelope;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A payload with a fixed wire tag.
pub trait Payload: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE: &'static str;
}

/// Server -> client payloads.
pub trait Inbound: Payload {}

/// Client -> server payloads.
pub trait Outbound: Payload {}

macro_rules! payload {
    ($ty:ty, $tag:literal, Inbound) => {
        impl Payload for $ty {
            const TYPE: &'static str = $tag;
        }
        impl Inbound for $ty {}
    };
    ($ty:ty, $tag:literal, Outbound) => {
        impl Payload for $ty {
            const TYPE: &'static str = $tag;
        }
        impl Outbound for $ty {}
    };
}

// Client -> server

/// Request for the list of named modes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetCustomModes {}

/// Run a named mode on the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCustomMode {
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

/// Ask the orchestrator to plan work for a prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

/// Remote asset generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateAsset {
    pub asset_type: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// Cancel a previously issued request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelTask {
    pub target_request_id: String,
}

/// Ask the orchestrator to check a script's source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateScript {
    pub script_content: String,
}

payload!(GetCustomModes, "get_custom_modes", Outbound);
payload!(RunCustomMode, "run_custom_mode", Outbound);
payload!(Plan, "plan", Outbound);
payload!(GenerateAsset, "generate_asset", Outbound);
payload!(CancelTask, "cancel_task", Outbound);
payload!(ValidateScript, "validate_script", Outbound);

// Server -> client

/// Status change of an orchestrator task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub task_id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Where a task is in its lifecycle, derived from the free-form status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskOutcome {
    pub fn is_terminal(self) -> bool {
        self != TaskOutcome::InProgress
    }
}

impl TaskUpdate {
    /// Classify the status string. The server emits variants such as
    /// `CompletedSuccessfully_CreatePrimitive`, so matching is by prefix.
    pub fn outcome(&self) -> TaskOutcome {
        let status = self.status.trim().to_ascii_lowercase();
        if status.starts_with("completed") {
            TaskOutcome::Completed
        } else if status.starts_with("failed") || status.starts_with("error") {
            TaskOutcome::Failed
        } else if status.starts_with("cancelled") || status.starts_with("canceled") {
            TaskOutcome::Cancelled
        } else {
            TaskOutcome::InProgress
        }
    }
}

/// A named mode advertised by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomModeInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomModes {
    #[serde(default)]
    pub modes: Vec<CustomModeInfo>,
}

/// Error reported by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorData {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// One entry of a planned task batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskItem {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskList {
    #[serde(default)]
    pub tasks: Vec<TaskItem>,
}

payload!(TaskUpdate, "task_update", Inbound);
payload!(CustomModes, "custom_modes", Inbound);
payload!(ErrorData, "error", Inbound);
payload!(TaskList, "tasks", Inbound);

/// Every inbound message this client understands.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    TaskUpdate(Envelope<TaskUpdate>),
    CustomModes(Envelope<CustomModes>),
    Error(Envelope<ErrorData>),
    Tasks(Envelope<TaskList>),
}

impl InboundMessage {
    /// Tags of the closed inbound table.
    pub const TYPES: [&'static str; 4] = [
        TaskUpdate::TYPE,
        CustomModes::TYPE,
        ErrorData::TYPE,
        TaskList::TYPE,
    ];

    /// Decode a frame into the matching variant.
    ///
    /// Fails with [`CodecError::UnknownType`] for tags outside the table.
    pub fn decode(text: &str) -> Result<Self, CodecError> {
        let tag = codec::decode_type_tag(text)?;
        match tag.as_str() {
            TaskUpdate::TYPE => codec::decode(text).map(InboundMessage::TaskUpdate),
            CustomModes::TYPE => codec::decode(text).map(InboundMessage::CustomModes),
            ErrorData::TYPE => codec::decode(text).map(InboundMessage::Error),
            TaskList::TYPE => codec::decode(text).map(InboundMessage::Tasks),
            _ => Err(CodecError::UnknownType(tag)),
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            InboundMessage::TaskUpdate(envelope) => envelope.kind(),
            InboundMessage::CustomModes(envelope) => envelope.kind(),
            InboundMessage::Error(envelope) => envelope.kind(),
            InboundMessage::Tasks(envelope) => envelope.kind(),
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        match self {
            InboundMessage::TaskUpdate(envelope) => envelope.request_id(),
            InboundMessage::CustomModes(envelope) => envelope.request_id(),
            InboundMessage::Error(envelope) => envelope.request_id(),
            InboundMessage::Tasks(envelope) => envelope.request_id(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(status: &str) -> TaskUpdate {
        TaskUpdate {
            task_id: "t1".to_string(),
            status: status.to_string(),
            description: None,
            agent: None,
            timestamp: None,
            details: None,
        }
    }

    #[test]
    fn status_classification() {
        assert_eq!(update("running").outcome(), TaskOutcome::InProgress);
        assert_eq!(update("Queued").outcome(), TaskOutcome::InProgress);
        assert_eq!(
            update("CompletedSuccessfully_CreatePrimitive").outcome(),
            TaskOutcome::Completed
        );
        assert_eq!(update("completed").outcome(), TaskOutcome::Completed);
        assert_eq!(update("FAILED").outcome(), TaskOutcome::Failed);
        assert_eq!(update("error: out of memory").outcome(), TaskOutcome::Failed);
        assert_eq!(update("Canceled").outcome(), TaskOutcome::Cancelled);
        assert!(!TaskOutcome::InProgress.is_terminal());
        assert!(TaskOutcome::Cancelled.is_terminal());
    }

    #[test]
    fn decode_each_inbound_kind() {
        let frames = [
            r#"{"type":"task_update","timestamp":"t","data":{"task_id":"1","status":"running"},"request_id":"r1"}"#,
            r#"{"type":"custom_modes","timestamp":"t","data":{"modes":[{"name":"architect"}]}}"#,
            r#"{"type":"error","timestamp":"t","data":{"message":"boom","code":"E1"}}"#,
            r#"{"type":"tasks","timestamp":"t","data":{"tasks":[{"id":1,"type":"code","agent":"coder"}]}}"#,
        ];

        let decoded: Vec<InboundMessage> = frames
            .iter()
            .map(|frame| InboundMessage::decode(frame).unwrap())
            .collect();

        assert!(matches!(
            &decoded[0],
            InboundMessage::TaskUpdate(e) if e.data().status == "running"
        ));
        assert_eq!(decoded[0].request_id(), Some("r1"));
        assert!(matches!(
            &decoded[1],
            InboundMessage::CustomModes(e) if e.data().modes[0].name == "architect"
        ));
        assert!(matches!(
            &decoded[2],
            InboundMessage::Error(e) if e.data().code.as_deref() == Some("E1")
        ));
        assert!(matches!(
            &decoded[3],
            InboundMessage::Tasks(e) if e.data().tasks[0].kind == "code"
        ));
        for (message, tag) in decoded.iter().zip(InboundMessage::TYPES) {
            assert_eq!(message.kind(), tag);
        }
    }

    #[test]
    fn decode_unknown_tag() {
        let err = InboundMessage::decode(r#"{"type":"telemetry","timestamp":"t","data":{}}"#)
            .unwrap_err();
        assert!(matches!(err, CodecError::UnknownType(tag) if tag == "telemetry"));
    }

    #[test]
    fn outbound_tags() {
        assert_eq!(GetCustomModes::TYPE, "get_custom_modes");
        assert_eq!(RunCustomMode::TYPE, "run_custom_mode");
        assert_eq!(Plan::TYPE, "plan");
        assert_eq!(GenerateAsset::TYPE, "generate_asset");
        assert_eq!(CancelTask::TYPE, "cancel_task");
    }
}
