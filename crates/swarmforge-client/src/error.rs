//! Client error types.

use swarmforge_core::CodecError;
use thiserror::Error;

/// Client error type.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not connected")]
    NotConnected,

    #[error("invalid state: {0}")]
    State(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("connection closed before a response arrived")]
    Closed,
}

/// Client result type.
pub type Result<T> = std::result::Result<T, ClientError>;
