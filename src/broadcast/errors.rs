//! # Broadcast Errors
//!
//! Error types for the server-side broadcast resolver and subscription
//! service.

use thiserror::Error;

use crate::protocol::ProtocolError;
use crate::transport::TransportError;

/// Result type for broadcast operations
pub type BroadcastResult<T> = Result<T, BroadcastError>;

/// Broadcast errors
#[derive(Debug, Clone, Error)]
pub enum BroadcastError {
    // ==================
    // Request Errors
    // ==================
    /// Malformed scope, events or resource type
    #[error(transparent)]
    InvalidRequest(#[from] ProtocolError),

    /// Record carries no usable `id`
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Subscription id unknown or owned by someone else
    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    // ==================
    // Cache Errors
    // ==================
    /// Cache read or write failed
    #[error("Cache error: {0}")]
    Cache(String),

    /// Pattern scan failed
    #[error("Cache scan failed: {0}")]
    ScanFailed(String),

    /// Glob could not be compiled
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    // ==================
    // Filter Errors
    // ==================
    /// Filter uses an operator the evaluator does not know
    #[error("Unknown filter operator: {0}")]
    UnknownOperator(String),

    /// Filter definition is not an object
    #[error("Invalid filter definition: {0}")]
    InvalidFilter(String),

    // ==================
    // Delivery Errors
    // ==================
    /// Transport rejected the publish
    #[error("Publish failed: {0}")]
    Publish(#[from] TransportError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BroadcastError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            BroadcastError::InvalidRequest(err) => err.code(),
            BroadcastError::InvalidRecord(_) => "LIVE_INVALID_RECORD",
            BroadcastError::SubscriptionNotFound(_) => "LIVE_SUBSCRIPTION_NOT_FOUND",
            BroadcastError::Cache(_) => "LIVE_CACHE",
            BroadcastError::ScanFailed(_) => "LIVE_SCAN_FAILED",
            BroadcastError::InvalidPattern(_) => "LIVE_INVALID_PATTERN",
            BroadcastError::UnknownOperator(_) => "LIVE_UNKNOWN_OPERATOR",
            BroadcastError::InvalidFilter(_) => "LIVE_INVALID_FILTER",
            BroadcastError::Publish(_) => "LIVE_PUBLISH_FAILED",
            BroadcastError::Internal(_) => "LIVE_INTERNAL",
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            BroadcastError::Cache(_) | BroadcastError::ScanFailed(_) => true,
            BroadcastError::Publish(err) => err.is_retryable(),
            _ => false,
        }
    }
}
