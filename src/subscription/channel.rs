//! # Channel and Event Registry
//!
//! Binds transport channels once and fans pushed events out to listeners.
//!
//! Every pushed event is stored (latest record per id), counted and kept in
//! a bounded diagnostics ring before any listener runs, whether or not a
//! listener matches. Listeners come in two kinds:
//!
//! - **generic**: one resource type and event, any record
//! - **model-scoped**: one resource type, one id, a set of events, keyed by
//!   a caller tag so register/unregister pairs are idempotent
//!
//! Team channels are shared, so model-scoped listeners also filter out
//! records for other ids.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::observability::{log_event_with_fields, Event, LiveMetrics};
use crate::protocol::{EventEnvelope, EventKind, ModelEvent, ModelId};
use crate::transport::{Channel, EventCallback, Transport};

/// Listener callback
pub type Listener = Arc<dyn Fn(&ModelEvent) + Send + Sync>;

/// Handle returned for generic listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Identity of a model-scoped listener
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelListenerKey {
    pub resource_type: String,
    pub model_id: ModelId,
    /// Sorted event names; empty matches every event
    pub events: Vec<String>,
    /// Caller-chosen identity of the callback
    pub tag: String,
}

impl ModelListenerKey {
    pub fn new<S: AsRef<str>>(
        resource_type: &str,
        model_id: impl Into<ModelId>,
        events: &[S],
        tag: &str,
    ) -> Self {
        let mut events: Vec<String> = events.iter().map(|e| e.as_ref().to_string()).collect();
        events.sort();
        events.dedup();
        Self {
            resource_type: resource_type.to_string(),
            model_id: model_id.into(),
            events,
            tag: tag.to_string(),
        }
    }

    fn matches(&self, event: &ModelEvent) -> bool {
        self.resource_type == event.resource_type
            && event.model_id.as_ref() == Some(&self.model_id)
            && (self.events.is_empty() || self.events.iter().any(|e| e == event.kind.as_str()))
    }
}

struct GenericListener {
    id: ListenerId,
    resource_type: String,
    kind: EventKind,
    listener: Listener,
}

struct BoundChannel {
    resource_type: String,
    channel: Arc<dyn Channel>,
    events: HashSet<String>,
}

#[derive(Default)]
struct ListenerTable {
    generic: Vec<GenericListener>,
    model: HashMap<ModelListenerKey, Listener>,
}

struct RegistryState {
    bound: Mutex<HashMap<String, BoundChannel>>,
    listeners: Mutex<ListenerTable>,
    records: Mutex<HashMap<(String, ModelId), Value>>,
    recent: Mutex<VecDeque<ModelEvent>>,
    capacity: usize,
    metrics: Arc<LiveMetrics>,
}

impl RegistryState {
    fn handle(&self, resource_type: &str, envelope: EventEnvelope) {
        let event = ModelEvent::from_envelope(resource_type, envelope);

        if let Some(id) = &event.model_id {
            if let Ok(mut records) = self.records.lock() {
                records.insert((resource_type.to_string(), id.clone()), event.record.clone());
            }
        }
        if self.capacity > 0 {
            if let Ok(mut recent) = self.recent.lock() {
                if recent.len() >= self.capacity {
                    recent.pop_front();
                }
                recent.push_back(event.clone());
            }
        }
        self.metrics.increment_events_received();
        let model_id = event.model_id.as_ref().map(ToString::to_string).unwrap_or_default();
        log_event_with_fields(
            Event::EventReceived,
            &[
                ("resource_type", resource_type),
                ("event", event.kind.as_str()),
                ("model_id", &model_id),
            ],
        );

        // Listeners run outside the lock so they may register or unregister
        let targets: Vec<Listener> = match self.listeners.lock() {
            Ok(table) => table
                .generic
                .iter()
                .filter(|l| l.resource_type == event.resource_type && l.kind == event.kind)
                .map(|l| Arc::clone(&l.listener))
                .chain(
                    table
                        .model
                        .iter()
                        .filter(|(key, _)| key.matches(&event))
                        .map(|(_, l)| Arc::clone(l)),
                )
                .collect(),
            Err(_) => return,
        };

        for listener in targets {
            listener(&event);
        }
    }
}

/// Channel binding and listener dispatch
pub struct ChannelRegistry {
    transport: Arc<dyn Transport>,
    channel_prefix: String,
    next_listener: AtomicU64,
    state: Arc<RegistryState>,
}

impl ChannelRegistry {
    pub fn new(
        transport: Arc<dyn Transport>,
        channel_prefix: &str,
        diagnostics_capacity: usize,
        metrics: Arc<LiveMetrics>,
    ) -> Self {
        Self {
            transport,
            channel_prefix: channel_prefix.to_string(),
            next_listener: AtomicU64::new(1),
            state: Arc::new(RegistryState {
                bound: Mutex::new(HashMap::new()),
                listeners: Mutex::new(ListenerTable::default()),
                records: Mutex::new(HashMap::new()),
                recent: Mutex::new(VecDeque::new()),
                capacity: diagnostics_capacity,
                metrics,
            }),
        }
    }

    /// `{prefix}{resource_type}.{scope_id}`
    pub fn channel_name(&self, resource_type: &str, scope_id: &str) -> String {
        format!("{}{}.{}", self.channel_prefix, resource_type, scope_id)
    }

    /// Join `{resource_type}.{scope_id}` and bind one handler per event.
    ///
    /// The channel is joined once; events already bound on it are skipped.
    /// Returns whether anything new was bound.
    pub fn subscribe_to_channel(&self, resource_type: &str, scope_id: &str, events: &[String]) -> bool {
        let name = self.channel_name(resource_type, scope_id);

        let mut bound = match self.state.bound.lock() {
            Ok(bound) => bound,
            Err(_) => return false,
        };

        let newly_joined = !bound.contains_key(&name);
        let entry = bound.entry(name.clone()).or_insert_with(|| BoundChannel {
            resource_type: resource_type.to_string(),
            channel: self.transport.subscribe(&name),
            events: HashSet::new(),
        });

        let mut newly_bound = Vec::new();
        for event in events {
            if entry.events.insert(event.clone()) {
                entry.channel.bind(event, self.handler(&entry.resource_type));
                newly_bound.push(event.as_str());
            }
        }

        if newly_joined || !newly_bound.is_empty() {
            log_event_with_fields(
                Event::ChannelBound,
                &[("channel", &name), ("events", &newly_bound.join(","))],
            );
        }
        newly_joined || !newly_bound.is_empty()
    }

    fn handler(&self, resource_type: &str) -> EventCallback {
        let state = Arc::downgrade(&self.state);
        let resource_type = resource_type.to_string();
        Arc::new(move |envelope| {
            if let Some(state) = state.upgrade() {
                state.handle(&resource_type, envelope);
            }
        })
    }

    pub fn is_bound(&self, channel_name: &str) -> bool {
        self.state
            .bound
            .lock()
            .map(|bound| bound.contains_key(channel_name))
            .unwrap_or(false)
    }

    /// Events bound on a channel, sorted
    pub fn bound_events(&self, channel_name: &str) -> Vec<String> {
        let mut events: Vec<String> = self
            .state
            .bound
            .lock()
            .ok()
            .and_then(|bound| bound.get(channel_name).map(|c| c.events.iter().cloned().collect()))
            .unwrap_or_default();
        events.sort();
        events
    }

    /// Names of bound channels, sorted
    pub fn bound_channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .state
            .bound
            .lock()
            .map(|bound| bound.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Listen to one event of a resource type, for any record
    pub fn on_event(&self, resource_type: &str, event: &str, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut table) = self.state.listeners.lock() {
            table.generic.push(GenericListener {
                id,
                resource_type: resource_type.to_string(),
                kind: EventKind::from_name(event),
                listener,
            });
        }
        id
    }

    /// Remove a generic listener. Returns whether it existed.
    pub fn off_event(&self, id: ListenerId) -> bool {
        match self.state.listeners.lock() {
            Ok(mut table) => {
                let before = table.generic.len();
                table.generic.retain(|l| l.id != id);
                table.generic.len() != before
            }
            Err(_) => false,
        }
    }

    /// Listen to events of one record. Returns false when a listener with
    /// the same key is already registered.
    pub fn on_model_event(&self, key: ModelListenerKey, listener: Listener) -> bool {
        match self.state.listeners.lock() {
            Ok(mut table) => {
                if table.model.contains_key(&key) {
                    return false;
                }
                table.model.insert(key, listener);
                true
            }
            Err(_) => false,
        }
    }

    /// Remove a model-scoped listener. Returns whether it existed.
    pub fn off_model_event(&self, key: &ModelListenerKey) -> bool {
        self.state
            .listeners
            .lock()
            .map(|mut table| table.model.remove(key).is_some())
            .unwrap_or(false)
    }

    pub fn listener_count(&self) -> usize {
        self.state
            .listeners
            .lock()
            .map(|table| table.generic.len() + table.model.len())
            .unwrap_or(0)
    }

    /// Latest record pushed for an id
    pub fn latest_record(&self, resource_type: &str, model_id: &ModelId) -> Option<Value> {
        self.state
            .records
            .lock()
            .ok()?
            .get(&(resource_type.to_string(), model_id.clone()))
            .cloned()
    }

    /// Recently received events, oldest first
    pub fn recent_events(&self) -> Vec<ModelEvent> {
        self.state
            .recent
            .lock()
            .map(|recent| recent.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Unbind every channel and drop listeners and stored records
    pub fn clear(&self) {
        if let Ok(mut bound) = self.state.bound.lock() {
            for (name, entry) in bound.drain() {
                entry.channel.unbind_all();
                self.transport.unsubscribe(&name);
            }
        }
        if let Ok(mut table) = self.state.listeners.lock() {
            table.generic.clear();
            table.model.clear();
        }
        if let Ok(mut records) = self.state.records.lock() {
            records.clear();
        }
        if let Ok(mut recent) = self.state.recent.lock() {
            recent.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LocalTransport;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn setup(capacity: usize) -> (Arc<LocalTransport>, ChannelRegistry) {
        let transport = Arc::new(LocalTransport::new());
        let registry = ChannelRegistry::new(
            Arc::clone(&transport) as Arc<dyn Transport>,
            "private-",
            capacity,
            Arc::new(LiveMetrics::new()),
        );
        (transport, registry)
    }

    fn events(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn counter() -> (Arc<AtomicUsize>, Listener) {
        let hits = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&hits);
        let listener: Listener = Arc::new(move |_| {
            inner.fetch_add(1, Ordering::SeqCst);
        });
        (hits, listener)
    }

    #[test]
    fn test_binds_channel_once() {
        let (transport, registry) = setup(10);

        assert!(registry.subscribe_to_channel("Post", "9", &events(&["updated"])));
        assert!(!registry.subscribe_to_channel("Post", "9", &events(&["updated"])));

        let channel = transport.channel("private-Post.9").unwrap();
        assert_eq!(channel.handler_count("updated"), 1);
        assert!(registry.is_bound("private-Post.9"));
    }

    #[test]
    fn test_new_events_bind_on_existing_channel() {
        let (transport, registry) = setup(10);

        registry.subscribe_to_channel("Post", "9", &events(&["updated"]));
        assert!(registry.subscribe_to_channel("Post", "9", &events(&["updated", "deleted"])));

        let channel = transport.channel("private-Post.9").unwrap();
        assert_eq!(channel.handler_count("updated"), 1);
        assert_eq!(channel.handler_count("deleted"), 1);
        assert_eq!(registry.bound_events("private-Post.9"), vec!["deleted", "updated"]);
    }

    #[test]
    fn test_events_recorded_without_listeners() {
        let (transport, registry) = setup(10);
        registry.subscribe_to_channel("Post", "9", &events(&["updated"]));

        transport.emit("private-Post.9", &EventEnvelope::new("updated", json!({"id": 5, "title": "a"})));

        assert_eq!(registry.recent_events().len(), 1);
        assert_eq!(
            registry.latest_record("Post", &ModelId::Int(5)),
            Some(json!({"id": 5, "title": "a"}))
        );
    }

    #[test]
    fn test_diagnostics_ring_is_bounded() {
        let (transport, registry) = setup(2);
        registry.subscribe_to_channel("Post", "9", &events(&["updated"]));

        for id in 1..=3 {
            transport.emit("private-Post.9", &EventEnvelope::new("updated", json!({"id": id})));
        }

        let recent = registry.recent_events();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].model_id, Some(ModelId::Int(2)));
        assert_eq!(recent[1].model_id, Some(ModelId::Int(3)));
    }

    #[test]
    fn test_generic_listener_dispatch() {
        let (transport, registry) = setup(10);
        registry.subscribe_to_channel("Post", "9", &events(&["updated", "deleted"]));

        let (hits, listener) = counter();
        let id = registry.on_event("Post", "updated", listener);

        transport.emit("private-Post.9", &EventEnvelope::new("updated", json!({"id": 1})));
        transport.emit("private-Post.9", &EventEnvelope::new("deleted", json!({"id": 1})));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(registry.off_event(id));
        assert!(!registry.off_event(id));
        transport.emit("private-Post.9", &EventEnvelope::new("updated", json!({"id": 1})));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_model_listener_filters_other_ids() {
        let (transport, registry) = setup(10);
        registry.subscribe_to_channel("Post", "9", &events(&["updated"]));

        let (hits, listener) = counter();
        registry.on_model_event(ModelListenerKey::new("Post", 5, &["updated"], "card"), listener);

        transport.emit("private-Post.9", &EventEnvelope::new("updated", json!({"id": 5})));
        transport.emit("private-Post.9", &EventEnvelope::new("updated", json!({"id": 6})));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_model_listener_registration_is_idempotent() {
        let (transport, registry) = setup(10);
        registry.subscribe_to_channel("Post", "9", &events(&["updated"]));

        let key = ModelListenerKey::new("Post", 5, &["updated"], "card");
        let (hits, listener) = counter();

        assert!(registry.on_model_event(key.clone(), Arc::clone(&listener)));
        assert!(!registry.on_model_event(key.clone(), Arc::clone(&listener)));
        assert_eq!(registry.listener_count(), 1);

        transport.emit("private-Post.9", &EventEnvelope::new("updated", json!({"id": 5})));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(registry.off_model_event(&key));
        assert!(!registry.off_model_event(&key));
        assert!(registry.on_model_event(key, listener));
    }

    #[test]
    fn test_clear_unbinds_everything() {
        let (transport, registry) = setup(10);
        registry.subscribe_to_channel("Post", "9", &events(&["updated"]));
        let (hits, listener) = counter();
        registry.on_event("Post", "updated", listener);

        registry.clear();

        assert!(registry.bound_channels().is_empty());
        assert_eq!(registry.listener_count(), 0);
        transport.emit("private-Post.9", &EventEnvelope::new("updated", json!({"id": 1})));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
