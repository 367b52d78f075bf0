//! # Transport Boundary
//!
//! The delivering transport is an external collaborator. This module only
//! names the capabilities the subscription subsystem needs from it:
//!
//! - [`Transport::subscribe`] returns a [`Channel`] for a channel name
//! - [`Channel::bind`] attaches a handler for one event name
//! - [`EventPublisher::publish`] pushes an envelope onto a channel (server)
//!
//! [`LocalTransport`] implements all three in-process.

pub mod errors;
pub mod local;

use std::sync::Arc;

use crate::protocol::EventEnvelope;

pub use errors::{TransportError, TransportResult};
pub use local::{LocalChannel, LocalTransport};

/// Handler invoked for every envelope pushed on a bound event
pub type EventCallback = Arc<dyn Fn(EventEnvelope) + Send + Sync>;

/// A named transport channel
pub trait Channel: Send + Sync {
    /// Channel name, including any private prefix
    fn name(&self) -> &str;

    /// Attach a handler for one event name
    fn bind(&self, event: &str, callback: EventCallback);

    /// Detach every handler
    fn unbind_all(&self);
}

/// Client side of the delivering transport
pub trait Transport: Send + Sync {
    /// Join a channel, returning a handle to bind events on
    fn subscribe(&self, channel_name: &str) -> Arc<dyn Channel>;

    /// Leave a channel
    fn unsubscribe(&self, channel_name: &str);
}

/// Server side of the delivering transport
pub trait EventPublisher: Send + Sync {
    /// Publish an envelope, returning the number of handlers reached when
    /// the transport can tell
    fn publish(&self, channel_name: &str, envelope: &EventEnvelope) -> TransportResult<usize>;
}
