//! Envelope encoding and two-phase decoding.
//!
//! [`decode_header`] reads only the tag and request id so a router can pick the
//! payload type before committing to a full parse with [`decode`].

use crate::envelope::Envelope;
use crate::message::Payload;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Codec failure.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("expected message type `{expected}`, got `{found}`")]
    TypeMismatch {
        expected: &'static str,
        found: String,
    },

    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Routing fields of an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EnvelopeHeader {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub request_id: Option<String>,
}

/// Serialize an envelope into one text frame.
pub fn encode<T: Serialize>(envelope: &Envelope<T>) -> Result<String, CodecError> {
    serde_json::to_string(envelope).map_err(CodecError::Encode)
}

/// Read the tag and request id without decoding `data`.
pub fn decode_header(text: &str) -> Result<EnvelopeHeader, CodecError> {
    let header: EnvelopeHeader = serde_json::from_str(text)
        .map_err(|error| CodecError::Malformed(format!("invalid envelope: {error}")))?;
    if header.kind.trim().is_empty() {
        return Err(CodecError::Malformed("missing message type".to_string()));
    }
    Ok(header)
}

/// Read only the type tag.
pub fn decode_type_tag(text: &str) -> Result<String, CodecError> {
    decode_header(text).map(|header| header.kind)
}

/// Decode a frame whose tag must be `T::TYPE`.
pub fn decode<T: Payload>(text: &str) -> Result<Envelope<T>, CodecError> {
    let tag = decode_type_tag(text)?;
    if tag != T::TYPE {
        return Err(CodecError::TypeMismatch {
            expected: T::TYPE,
            found: tag,
        });
    }
    decode_any(text)
}

/// Decode a frame with any tag into payload type `T`.
pub fn decode_any<T: DeserializeOwned>(text: &str) -> Result<Envelope<T>, CodecError> {
    let envelope: Envelope<T> = serde_json::from_str(text)
        .map_err(|error| CodecError::Malformed(format!("invalid payload: {error}")))?;
    if envelope.kind().trim().is_empty() {
        return Err(CodecError::Malformed("missing message type".to_string()));
    }
    Ok(envelope)
}
