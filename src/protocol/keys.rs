//! # Scope Keys and Content Hashes
//!
//! Deterministic identities for subscription targets.
//!
//! | Scope | Canonical key |
//! |-------|---------------|
//! | everyone | `{type}:all` |
//! | one id | `{type}:id:{id}` |
//! | filter | `{type}:filter:{hash}` |
//!
//! The filter hash is the SHA-256 of the canonical JSON form of the filter,
//! where object keys are sorted recursively and array order is preserved.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::errors::{ProtocolError, ProtocolResult};

/// Identifier of a single record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelId {
    Int(i64),
    Str(String),
}

impl ModelId {
    /// Parse from a JSON value (integer or non-empty string)
    pub fn from_value(value: &Value) -> Option<ModelId> {
        match value {
            Value::Number(n) => n.as_i64().map(ModelId::Int),
            Value::String(s) if !s.is_empty() => Some(ModelId::Str(s.clone())),
            _ => None,
        }
    }

    /// JSON representation
    pub fn to_value(&self) -> Value {
        match self {
            ModelId::Int(n) => Value::from(*n),
            ModelId::Str(s) => Value::from(s.clone()),
        }
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelId::Int(n) => write!(f, "{}", n),
            ModelId::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for ModelId {
    fn from(id: i64) -> Self {
        ModelId::Int(id)
    }
}

impl From<&str> for ModelId {
    fn from(id: &str) -> Self {
        ModelId::Str(id.to_string())
    }
}

impl From<String> for ModelId {
    fn from(id: String) -> Self {
        ModelId::Str(id)
    }
}

const FILTER_ENVELOPE: &str = "filter";

/// Inner filter of a `{"filter": {...}}` envelope
fn unwrap_filter(map: &Map<String, Value>) -> Option<&Map<String, Value>> {
    if map.len() != 1 {
        return None;
    }
    map.get(FILTER_ENVELOPE).and_then(Value::as_object)
}

/// Target of a subscription
#[derive(Debug, Clone, PartialEq)]
pub enum Scope {
    /// Every record of the resource type (wire form `true`)
    All,
    /// A single record
    Id(ModelId),
    /// Every record matching a filter object
    Filter(Map<String, Value>),
}

impl Scope {
    /// Interpret a caller-supplied or wire scope value.
    ///
    /// `true` means everyone, numbers and strings are ids, objects are
    /// filters, either bare or in the wire envelope `{"filter": {...}}`.
    /// `null`, `false` and arrays are rejected.
    pub fn from_value(value: &Value) -> ProtocolResult<Scope> {
        match value {
            Value::Null => Err(ProtocolError::InvalidScope("scope must not be null".into())),
            Value::Bool(true) => Ok(Scope::All),
            Value::Bool(false) => Err(ProtocolError::InvalidScope("false is not a scope".into())),
            Value::Object(map) => match unwrap_filter(map) {
                Some(inner) => Ok(Scope::Filter(inner.clone())),
                None => Ok(Scope::Filter(map.clone())),
            },
            Value::Array(_) => Err(ProtocolError::InvalidScope("arrays are not a scope".into())),
            other => ModelId::from_value(other)
                .map(Scope::Id)
                .ok_or_else(|| ProtocolError::InvalidScope(other.to_string())),
        }
    }

    /// Wire representation (`model_id_or_filter`). Filters travel as
    /// `{"filter": {...}}`.
    pub fn to_value(&self) -> Value {
        match self {
            Scope::All => Value::Bool(true),
            Scope::Id(id) => id.to_value(),
            Scope::Filter(map) => {
                let mut envelope = Map::new();
                envelope.insert(FILTER_ENVELOPE.to_string(), Value::Object(map.clone()));
                Value::Object(envelope)
            }
        }
    }

    /// Only single-id scopes are coalesced into batched registrations
    pub fn is_batchable(&self) -> bool {
        matches!(self, Scope::Id(_))
    }

    /// Filter matching any of the given ids, used for merged registrations
    pub fn id_filter(ids: &[ModelId]) -> Scope {
        let mut map = Map::new();
        map.insert(
            "id".to_string(),
            Value::Array(ids.iter().map(ModelId::to_value).collect()),
        );
        Scope::Filter(map)
    }
}

/// Recursively sort object keys. Array element order is preserved.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// SHA-256 hex digest of the canonical JSON encoding
pub fn content_hash(value: &Value) -> String {
    let canonical = canonicalize(value).to_string();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Scope-only identity of a subscription within one resource type
pub fn canonical_scope_key(resource_type: &str, scope: &Scope) -> String {
    match scope {
        Scope::All => format!("{}:all", resource_type),
        Scope::Id(id) => format!("{}:id:{}", resource_type, id),
        Scope::Filter(map) => format!(
            "{}:filter:{}",
            resource_type,
            content_hash(&Value::Object(map.clone()))
        ),
    }
}

/// Debounce window key for id subscriptions. Independent of the id.
pub fn batch_key(resource_type: &str, events: &[String]) -> String {
    let mut sorted: Vec<&str> = events.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    format!("{}:{}", resource_type, sorted.join(","))
}

/// Sort and de-duplicate event names, rejecting empty input
pub fn normalize_events<S: AsRef<str>>(events: &[S]) -> ProtocolResult<Vec<String>> {
    if events.is_empty() {
        return Err(ProtocolError::InvalidEvents("at least one event is required".into()));
    }

    let mut normalized = Vec::with_capacity(events.len());
    for event in events {
        let name = event.as_ref().trim();
        if name.is_empty() {
            return Err(ProtocolError::InvalidEvents("event names must not be empty".into()));
        }
        normalized.push(name.to_string());
    }
    normalized.sort();
    normalized.dedup();
    Ok(normalized)
}

/// Server-side cache keys for one (resource type, team) subscriber set
#[derive(Debug, Clone)]
pub struct SubscriberKeys<'a> {
    prefix: &'a str,
    resource_type: &'a str,
    team_id: &'a str,
}

impl<'a> SubscriberKeys<'a> {
    pub fn new(prefix: &'a str, resource_type: &'a str, team_id: &'a str) -> Self {
        Self {
            prefix,
            resource_type,
            team_id,
        }
    }

    /// `{prefix}{type}:{team}:all`
    pub fn all(&self) -> String {
        format!("{}{}:{}:all", self.prefix, self.resource_type, self.team_id)
    }

    /// `{prefix}{type}:{team}:id:{id}`
    pub fn id(&self, id: &ModelId) -> String {
        format!("{}{}:{}:id:{}", self.prefix, self.resource_type, self.team_id, id)
    }

    /// `{prefix}{type}:{team}:filter:{hash}`
    pub fn filter(&self, hash: &str) -> String {
        format!("{}{}:{}:filter:{}", self.prefix, self.resource_type, self.team_id, hash)
    }

    /// Glob matching every filter subscriber list (and its definitions)
    pub fn filter_pattern(&self) -> String {
        format!("{}{}:{}:filter:*", self.prefix, self.resource_type, self.team_id)
    }

    /// Key holding the subscriber list for a scope
    pub fn for_scope(&self, scope: &Scope) -> String {
        match scope {
            Scope::All => self.all(),
            Scope::Id(id) => self.id(id),
            Scope::Filter(map) => self.filter(&content_hash(&Value::Object(map.clone()))),
        }
    }
}

/// Paired key holding the raw filter definition of a filter subscriber list
pub fn definition_key(filter_key: &str) -> String {
    format!("{}:definition", filter_key)
}

/// Whether a scanned key is a filter definition rather than a subscriber list
pub fn is_definition_key(key: &str) -> bool {
    key.ends_with(":definition")
}
