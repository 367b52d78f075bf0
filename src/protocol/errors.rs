//! # Protocol Errors

use thiserror::Error;

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Protocol errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Scope is null, false, or otherwise not an id / `true` / filter object
    #[error("Invalid scope: {0}")]
    InvalidScope(String),

    /// Event list is empty or contains an empty name
    #[error("Invalid events: {0}")]
    InvalidEvents(String),

    /// Resource type is empty
    #[error("Invalid resource type: {0:?}")]
    InvalidResourceType(String),

    /// Payload could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ProtocolError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::InvalidScope(_) => "LIVE_INVALID_SCOPE",
            ProtocolError::InvalidEvents(_) => "LIVE_INVALID_EVENTS",
            ProtocolError::InvalidResourceType(_) => "LIVE_INVALID_RESOURCE_TYPE",
            ProtocolError::Serialization(_) => "LIVE_SERIALIZATION",
        }
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::Serialization(err.to_string())
    }
}
