//! # Subscription Errors
//!
//! Error types for the client subscription manager.

use thiserror::Error;

use crate::config::ConfigError;
use crate::protocol::ProtocolError;

/// Result type for subscription operations
pub type SubscriptionResult<T> = Result<T, SubscriptionError>;

/// Subscription errors
#[derive(Debug, Clone, Error)]
pub enum SubscriptionError {
    // ==================
    // Input Errors
    // ==================
    /// Scope, events or resource type rejected before any network call
    #[error(transparent)]
    InvalidInput(#[from] ProtocolError),

    /// Configuration rejected at construction
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // ==================
    // Network Errors
    // ==================
    /// Registration call failed
    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    /// Renewal call failed as a whole
    #[error("Renewal failed: {0}")]
    RenewalFailed(String),

    /// Backend unsubscribe call failed
    #[error("Unsubscribe failed: {0}")]
    UnsubscribeFailed(String),

    // ==================
    // Lifecycle Errors
    // ==================
    /// Manager has been disposed
    #[error("Subscription manager disposed")]
    Disposed,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SubscriptionError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            SubscriptionError::InvalidInput(err) => err.code(),
            SubscriptionError::ConfigError(_) => "LIVE_CONFIG",
            SubscriptionError::RegistrationFailed(_) => "LIVE_REGISTRATION_FAILED",
            SubscriptionError::RenewalFailed(_) => "LIVE_RENEWAL_FAILED",
            SubscriptionError::UnsubscribeFailed(_) => "LIVE_UNSUBSCRIBE_FAILED",
            SubscriptionError::Disposed => "LIVE_DISPOSED",
            SubscriptionError::Internal(_) => "LIVE_INTERNAL",
        }
    }

    /// Network failures are worth retrying on the next tick or refresh
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SubscriptionError::RegistrationFailed(_)
                | SubscriptionError::RenewalFailed(_)
                | SubscriptionError::UnsubscribeFailed(_)
        )
    }
}

impl From<ConfigError> for SubscriptionError {
    fn from(err: ConfigError) -> Self {
        SubscriptionError::ConfigError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err: SubscriptionError = ProtocolError::InvalidScope("null".into()).into();
        assert_eq!(err.code(), "LIVE_INVALID_SCOPE");
        assert_eq!(SubscriptionError::Disposed.code(), "LIVE_DISPOSED");
    }

    #[test]
    fn test_retryable() {
        assert!(SubscriptionError::RenewalFailed("timeout".into()).is_retryable());
        assert!(!SubscriptionError::Disposed.is_retryable());
        assert!(!SubscriptionError::InvalidInput(ProtocolError::InvalidScope("null".into())).is_retryable());
    }
}
