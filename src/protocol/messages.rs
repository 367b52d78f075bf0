//! # Wire Messages
//!
//! Request and response bodies of the subscription API, plus the event
//! envelope carried by the transport. Internally events are dispatched as
//! [`ModelEvent`] with a typed [`EventKind`]; raw strings only exist at
//! the transport boundary.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::keys::ModelId;

/// Registration request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub subscription_id: String,
    pub resource_type: String,
    pub events: Vec<String>,
    /// `true`, a single id, or a filter object
    pub model_id_or_filter: Value,
}

/// Server-assigned registration details
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredSubscription {
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub cache_key: String,
}

/// Registration response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub subscription: RegisteredSubscription,
}

/// Renewal request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenewRequest {
    pub subscription_ids: Vec<String>,
}

/// Outcome of renewing one backend subscription id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenewalStatus {
    pub success: bool,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Renewal response, keyed by backend subscription id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenewResponse {
    #[serde(default)]
    pub subscriptions: HashMap<String, RenewalStatus>,
}

/// Unsubscribe request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsubscribeRequest {
    pub resource_type: String,
    pub events: Vec<String>,
    pub model_id_or_filter: Value,
}

/// Kind of change carried by an event
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
    /// Caller-defined event name
    Custom(String),
}

impl EventKind {
    /// Parse a transport event name
    pub fn from_name(name: &str) -> Self {
        match name {
            "created" => EventKind::Created,
            "updated" => EventKind::Updated,
            "deleted" => EventKind::Deleted,
            other => EventKind::Custom(other.to_string()),
        }
    }

    /// Transport event name
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Created => "created",
            EventKind::Updated => "updated",
            EventKind::Deleted => "deleted",
            EventKind::Custom(name) => name,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Event as carried by the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event: String,
    /// The changed record; its `id` field identifies the model
    pub payload: Value,
}

impl EventEnvelope {
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }

    /// Id of the record carried in the payload, if any
    pub fn model_id(&self) -> Option<ModelId> {
        self.payload.get("id").and_then(ModelId::from_value)
    }
}

/// Event dispatched to listeners
#[derive(Debug, Clone, PartialEq)]
pub struct ModelEvent {
    pub resource_type: String,
    pub kind: EventKind,
    pub model_id: Option<ModelId>,
    pub record: Value,
    pub received_at: DateTime<Utc>,
}

impl ModelEvent {
    /// Decode a transport envelope received on a channel of `resource_type`
    pub fn from_envelope(resource_type: &str, envelope: EventEnvelope) -> Self {
        let model_id = envelope.model_id();
        Self {
            resource_type: resource_type.to_string(),
            kind: EventKind::from_name(&envelope.event),
            model_id,
            record: envelope.payload,
            received_at: Utc::now(),
        }
    }

    /// Re-encode for the transport
    pub fn to_envelope(&self) -> EventEnvelope {
        EventEnvelope::new(self.kind.as_str(), self.record.clone())
    }
}
