//! # Transport Errors

use thiserror::Error;

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Transport errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Channel name is empty or malformed
    #[error("Invalid channel: {0}")]
    InvalidChannel(String),

    /// Publish could not be handed to the transport
    #[error("Publish failed: {0}")]
    PublishFailed(String),
}

impl TransportError {
    /// Whether retrying the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::PublishFailed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(TransportError::PublishFailed("down".into()).is_retryable());
        assert!(!TransportError::InvalidChannel("".into()).is_retryable());
    }
}
