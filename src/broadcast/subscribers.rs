//! # Subscriber Sets
//!
//! Writes the cached sets read by the broadcast resolver.
//!
//! Per (resource type, team):
//!
//! - `{prefix}{type}:{team}:all` → user ids subscribed to every record
//! - `{prefix}{type}:{team}:id:{id}` → user ids subscribed to one record
//! - `{prefix}{type}:{team}:filter:{hash}` → user ids of one filter, with
//!   the filter object stored under the paired `:definition` key
//!
//! Lists are JSON arrays of user ids, without duplicates. An emptied list
//! is deleted along with its definition. Stores that cannot scan also get
//! every list key recorded in the `{prefix}_index` key.

use std::sync::Arc;

use serde_json::{Map, Value};

use super::cache::CacheStore;
use super::errors::{BroadcastError, BroadcastResult};
use crate::protocol::{definition_key, Scope, SubscriberKeys};

/// Reads and writes subscriber lists
#[derive(Clone)]
pub struct SubscriberSets {
    cache: Arc<dyn CacheStore>,
    prefix: String,
}

impl SubscriberSets {
    pub fn new(cache: Arc<dyn CacheStore>, prefix: &str) -> Self {
        Self {
            cache,
            prefix: prefix.to_string(),
        }
    }

    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.cache
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn index_key(&self) -> String {
        format!("{}_index", self.prefix)
    }

    /// Key holding the list for (resource type, team, scope)
    pub fn key_for(&self, resource_type: &str, team_id: &str, scope: &Scope) -> String {
        SubscriberKeys::new(&self.prefix, resource_type, team_id).for_scope(scope)
    }

    /// Add `user_id` to the list for a scope, returning the list key
    pub fn subscribe(&self, resource_type: &str, team_id: &str, scope: &Scope, user_id: &str) -> BroadcastResult<String> {
        let key = self.key_for(resource_type, team_id, scope);
        let definition = match scope {
            Scope::Filter(map) => Some(map),
            _ => None,
        };
        self.add_member(&key, user_id, definition)?;
        Ok(key)
    }

    /// Remove `user_id` from the list for a scope. Returns whether it was
    /// a member.
    pub fn unsubscribe(&self, resource_type: &str, team_id: &str, scope: &Scope, user_id: &str) -> BroadcastResult<bool> {
        let key = self.key_for(resource_type, team_id, scope);
        self.remove_member(&key, user_id)
    }

    pub fn add_member(&self, key: &str, user_id: &str, definition: Option<&Map<String, Value>>) -> BroadcastResult<()> {
        let mut members = self.members(key)?;
        if !members.iter().any(|m| m == user_id) {
            members.push(user_id.to_string());
            self.cache.put(key, to_list(&members))?;
        }
        if let Some(definition) = definition {
            self.cache.put(&definition_key(key), Value::Object(definition.clone()))?;
        }
        if !self.cache.supports_scan() {
            self.index_insert(key)?;
        }
        Ok(())
    }

    pub fn remove_member(&self, key: &str, user_id: &str) -> BroadcastResult<bool> {
        let mut members = self.members(key)?;
        let before = members.len();
        members.retain(|m| m != user_id);
        if members.len() == before {
            return Ok(false);
        }

        if members.is_empty() {
            self.cache.delete(key)?;
            self.cache.delete(&definition_key(key))?;
            if !self.cache.supports_scan() {
                self.index_remove(key)?;
            }
        } else {
            self.cache.put(key, to_list(&members))?;
        }
        Ok(true)
    }

    /// User ids in a list; missing keys read as empty
    pub fn members(&self, key: &str) -> BroadcastResult<Vec<String>> {
        match self.cache.get(key)? {
            None => Ok(Vec::new()),
            Some(value) => from_list(key, &value),
        }
    }

    /// Stored filter object for a filter list key
    pub fn definition(&self, key: &str) -> BroadcastResult<Option<Map<String, Value>>> {
        match self.cache.get(&definition_key(key))? {
            None => Ok(None),
            Some(Value::Object(map)) => Ok(Some(map)),
            Some(other) => Err(BroadcastError::InvalidFilter(format!("{} holds {}", key, other))),
        }
    }

    /// Every list key recorded in the index
    pub fn index_keys(&self) -> BroadcastResult<Vec<String>> {
        self.members(&self.index_key())
    }

    fn index_insert(&self, key: &str) -> BroadcastResult<()> {
        let index_key = self.index_key();
        let mut keys = self.members(&index_key)?;
        if !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
            self.cache.put(&index_key, to_list(&keys))?;
        }
        Ok(())
    }

    fn index_remove(&self, key: &str) -> BroadcastResult<()> {
        let index_key = self.index_key();
        let mut keys = self.members(&index_key)?;
        let before = keys.len();
        keys.retain(|k| k != key);
        if keys.len() != before {
            self.cache.put(&index_key, to_list(&keys))?;
        }
        Ok(())
    }
}

fn to_list(items: &[String]) -> Value {
    Value::Array(items.iter().cloned().map(Value::String).collect())
}

fn from_list(key: &str, value: &Value) -> BroadcastResult<Vec<String>> {
    let items = value
        .as_array()
        .ok_or_else(|| BroadcastError::Cache(format!("{} is not a list", key)))?;
    Ok(items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect())
}
