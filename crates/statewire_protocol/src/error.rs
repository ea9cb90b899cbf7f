//! Error types for envelope decoding.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while decoding or encoding an envelope.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The envelope has no string `type` field.
    #[error("message has no type")]
    MissingType,

    /// The `type` tag is not one this server understands.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// The envelope is not a JSON object, or a required field is missing.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// JSON syntax or encoding failure.
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
}
