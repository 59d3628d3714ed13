//! The typed envelope.
//!
//! Every frame on the wire is one envelope: a type tag, a UTC timestamp, the
//! payload, and an optional request id. Envelopes are immutable; a new one is
//! built for each send.

use crate::message::Payload;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// A message envelope carrying a payload of type `T`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    #[serde(rename = "type")]
    kind: String,
    timestamp: String,
    data: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    request_id: Option<String>,
}

impl<T: Payload> Envelope<T> {
    /// Build an unsolicited envelope (no request id) tagged with `T::TYPE`.
    pub fn new(data: T) -> Self {
        Self::from_parts(T::TYPE, now_timestamp(), data, None)
    }

    /// Build an envelope tagged with `T::TYPE` that carries a request id.
    pub fn correlated(data: T, request_id: impl Into<String>) -> Self {
        Self::from_parts(T::TYPE, now_timestamp(), data, Some(request_id.into()))
    }
}

impl<T> Envelope<T> {
    /// Build an envelope from raw parts.
    ///
    /// Used for payloads without a compile-time tag (e.g. `serde_json::Value`).
    pub fn from_parts(
        kind: impl Into<String>,
        timestamp: impl Into<String>,
        data: T,
        request_id: Option<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            timestamp: timestamp.into(),
            data,
            request_id,
        }
    }

    /// The type tag.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// ISO-8601 UTC timestamp set when the envelope was built.
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn into_data(self) -> T {
        self.data
    }

    /// Request id, present on requests and on responses that echo one.
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }
}

/// Current UTC time in RFC 3339 form with a `Z` suffix.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{GetCustomModes, Plan};

    #[test]
    fn new_uses_payload_tag() {
        let envelope = Envelope::new(GetCustomModes::default());
        assert_eq!(envelope.kind(), "get_custom_modes");
        assert!(envelope.request_id().is_none());
        assert!(envelope.timestamp().ends_with('Z'));
    }

    #[test]
    fn correlated_carries_request_id() {
        let envelope = Envelope::correlated(
            Plan {
                prompt: "build a castle".to_string(),
                system_prompt: None,
            },
            "req-1",
        );
        assert_eq!(envelope.kind(), "plan");
        assert_eq!(envelope.request_id(), Some("req-1"));
    }

    #[test]
    fn absent_request_id_is_omitted() {
        let envelope = Envelope::new(GetCustomModes::default());
        let json = serde_json::to_value(&envelope).unwrap();
        assert!(json.get("request_id").is_none());
        assert_eq!(json["type"], "get_custom_modes");
        assert_eq!(json["data"], serde_json::json!({}));
    }
}
