//! # In-Process Transport
//!
//! Channels live in a map keyed by name; publishing invokes every handler
//! bound to the event synchronously. Used by tests and single-process
//! deployments where client and server share memory.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::errors::{TransportError, TransportResult};
use super::{Channel, EventCallback, EventPublisher, Transport};
use crate::protocol::EventEnvelope;

/// In-process channel
pub struct LocalChannel {
    name: String,
    handlers: Mutex<HashMap<String, Vec<EventCallback>>>,
}

impl LocalChannel {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            handlers: Mutex::new(HashMap::new()),
        }
    }

    /// Invoke every handler bound to the envelope's event
    pub fn emit(&self, envelope: &EventEnvelope) -> usize {
        // Clone handlers out so callbacks may bind further events
        let handlers: Vec<EventCallback> = match self.handlers.lock() {
            Ok(map) => map.get(&envelope.event).cloned().unwrap_or_default(),
            Err(_) => return 0,
        };

        for handler in &handlers {
            handler(envelope.clone());
        }
        handlers.len()
    }

    /// Number of handlers bound to an event
    pub fn handler_count(&self, event: &str) -> usize {
        self.handlers
            .lock()
            .map(|map| map.get(event).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }
}

impl Channel for LocalChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&self, event: &str, callback: EventCallback) {
        if let Ok(mut map) = self.handlers.lock() {
            map.entry(event.to_string()).or_default().push(callback);
        }
    }

    fn unbind_all(&self) {
        if let Ok(mut map) = self.handlers.lock() {
            map.clear();
        }
    }
}

/// In-process transport
#[derive(Default)]
pub struct LocalTransport {
    channels: Mutex<HashMap<String, Arc<LocalChannel>>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a joined channel
    pub fn channel(&self, channel_name: &str) -> Option<Arc<LocalChannel>> {
        self.channels.lock().ok()?.get(channel_name).cloned()
    }

    /// Names of joined channels, sorted
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .channels
            .lock()
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Push an envelope to a channel, returning handlers reached
    pub fn emit(&self, channel_name: &str, envelope: &EventEnvelope) -> usize {
        match self.channel(channel_name) {
            Some(channel) => channel.emit(envelope),
            None => 0,
        }
    }
}

impl Transport for LocalTransport {
    fn subscribe(&self, channel_name: &str) -> Arc<dyn Channel> {
        let channel: Arc<LocalChannel> = match self.channels.lock() {
            Ok(mut map) => Arc::clone(
                map.entry(channel_name.to_string())
                    .or_insert_with(|| Arc::new(LocalChannel::new(channel_name))),
            ),
            // A poisoned map still hands out a usable, unregistered channel
            Err(_) => Arc::new(LocalChannel::new(channel_name)),
        };
        channel
    }

    fn unsubscribe(&self, channel_name: &str) {
        if let Ok(mut map) = self.channels.lock() {
            if let Some(channel) = map.remove(channel_name) {
                channel.unbind_all();
            }
        }
    }
}

impl EventPublisher for LocalTransport {
    fn publish(&self, channel_name: &str, envelope: &EventEnvelope) -> TransportResult<usize> {
        if channel_name.is_empty() {
            return Err(TransportError::InvalidChannel("channel name is empty".into()));
        }
        Ok(self.emit(channel_name, envelope))
    }
}
