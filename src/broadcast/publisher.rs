//! # Change Broadcaster
//!
//! Publishes a changed record on the team channel when, and only when,
//! the resolver finds at least one subscriber.

use std::sync::Arc;

use serde_json::Value;

use super::errors::{BroadcastError, BroadcastResult};
use super::resolver::BroadcastTargetResolver;
use crate::observability::{log_event_with_fields, Event};
use crate::protocol::{EventEnvelope, EventKind, ModelId};
use crate::transport::EventPublisher;

/// What one broadcast did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    /// Users that passed the gate
    pub users: Vec<String>,
    /// Channels published on
    pub channels: Vec<String>,
    /// Handlers reached, when the transport reports it
    pub delivered: usize,
}

impl BroadcastOutcome {
    pub fn is_published(&self) -> bool {
        !self.channels.is_empty()
    }
}

/// Resolver plus publisher
pub struct ChangeBroadcaster {
    resolver: Arc<BroadcastTargetResolver>,
    publisher: Arc<dyn EventPublisher>,
}

impl ChangeBroadcaster {
    pub fn new(resolver: Arc<BroadcastTargetResolver>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { resolver, publisher }
    }

    pub fn resolver(&self) -> &Arc<BroadcastTargetResolver> {
        &self.resolver
    }

    /// Broadcast `kind` for `record`, whose `id` field identifies it
    pub fn broadcast(
        &self,
        resource_type: &str,
        team_id: Option<&str>,
        kind: &EventKind,
        record: &Value,
    ) -> BroadcastResult<BroadcastOutcome> {
        let model_id = record
            .get("id")
            .and_then(ModelId::from_value)
            .ok_or_else(|| BroadcastError::InvalidRecord("record has no id".into()))?;

        let users = self.resolver.get_subscribed_users(resource_type, team_id, &model_id);
        let channels = self.resolver.get_subscribed_channels(resource_type, team_id, &users);
        if channels.is_empty() {
            return Ok(BroadcastOutcome {
                users,
                ..Default::default()
            });
        }

        let envelope = EventEnvelope::new(kind.as_str(), record.clone());
        let mut delivered = 0;
        for channel in &channels {
            delivered += self.publisher.publish(channel, &envelope)?;
            self.resolver.metrics().increment_broadcasts_published();
            log_event_with_fields(
                Event::BroadcastPublished,
                &[
                    ("channel", channel),
                    ("event", kind.as_str()),
                    ("model_id", &model_id.to_string()),
                    ("users", &users.len().to_string()),
                ],
            );
        }

        Ok(BroadcastOutcome {
            users,
            channels,
            delivered,
        })
    }
}
