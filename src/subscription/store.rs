//! # Subscription Store
//!
//! Local bookkeeping of live subscriptions.
//!
//! - `by_key`: canonical scope key → [`Subscription`] (at most one each)
//! - `backends`: backend subscription id → member scope keys, so
//!   reference counts for batched registrations never require a scan
//! - `pending`: keys whose registration is queued or in flight, each tagged
//!   with the subscription id of the attempt that owns it; they count as
//!   present for de-duplication. An attempt only settles the key while it
//!   still owns the marker, so a cancelled attempt that resolves late never
//!   touches a newer subscription of the same scope.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::protocol::{Scope, UnsubscribeRequest};

/// A live subscription held by this client
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    /// Client-generated token
    pub id: String,
    pub resource_type: String,
    /// Sorted, unique event names
    pub events: Vec<String>,
    pub scope: Scope,
    /// Canonical scope key
    pub scope_key: String,
    /// Server-assigned expiry
    pub expires_at: Option<DateTime<Utc>>,
    /// Server correlation token
    pub cache_key: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Backend id shared with batch siblings
    pub batched_with: Option<String>,
}

impl Subscription {
    /// Id the backend knows this subscription by
    pub fn backend_id(&self) -> &str {
        self.batched_with.as_deref().unwrap_or(&self.id)
    }

    pub fn is_batched(&self) -> bool {
        self.batched_with.is_some()
    }

    /// Wire form of this subscription's own scope
    pub fn model_id_or_filter(&self) -> Value {
        self.scope.to_value()
    }
}

/// Backend registration shared by one or more local subscriptions
#[derive(Debug, Clone)]
struct BackendEntry {
    resource_type: String,
    events: Vec<String>,
    /// Scope the backend registered, e.g. a merged id filter
    scope: Scope,
    members: HashSet<String>,
}

/// Result of removing one local subscription
#[derive(Debug, Clone)]
pub struct Removal {
    pub subscription: Subscription,
    /// Set when the removed entry was the last member of its backend id
    pub release: Option<UnsubscribeRequest>,
}

/// Local subscription bookkeeping
#[derive(Debug, Default)]
pub struct SubscriptionStore {
    by_key: HashMap<String, Subscription>,
    backends: HashMap<String, BackendEntry>,
    pending: HashMap<String, String>,
}

impl SubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live or pending
    pub fn contains(&self, scope_key: &str) -> bool {
        self.by_key.contains_key(scope_key) || self.pending.contains_key(scope_key)
    }

    pub fn get(&self, scope_key: &str) -> Option<&Subscription> {
        self.by_key.get(scope_key)
    }

    /// Mark `scope_key` as owned by the attempt `subscription_id`
    pub fn mark_pending(&mut self, scope_key: &str, subscription_id: &str) {
        self.pending.insert(scope_key.to_string(), subscription_id.to_string());
    }

    /// Whether any attempt holds `scope_key`
    pub fn is_pending(&self, scope_key: &str) -> bool {
        self.pending.contains_key(scope_key)
    }

    /// Whether `scope_key` is still held by the attempt `subscription_id`
    pub fn is_pending_for(&self, scope_key: &str, subscription_id: &str) -> bool {
        self.pending.get(scope_key).map(String::as_str) == Some(subscription_id)
    }

    /// Drop the marker whoever holds it. Returns whether the key was pending.
    pub fn clear_pending(&mut self, scope_key: &str) -> bool {
        self.pending.remove(scope_key).is_some()
    }

    /// Drop the marker only if `subscription_id` still holds it
    pub fn clear_pending_for(&mut self, scope_key: &str, subscription_id: &str) -> bool {
        if !self.is_pending_for(scope_key, subscription_id) {
            return false;
        }
        self.pending.remove(scope_key).is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Insert a registered subscription.
    ///
    /// `backend_scope` is the scope the backend registered under the
    /// subscription's backend id; it differs from the subscription's own
    /// scope for batched entries.
    pub fn insert(&mut self, subscription: Subscription, backend_scope: Scope) {
        let backend_id = subscription.backend_id().to_string();
        let scope_key = subscription.scope_key.clone();

        if self.is_pending_for(&scope_key, &subscription.id) {
            self.pending.remove(&scope_key);
        }
        self.backends
            .entry(backend_id)
            .or_insert_with(|| BackendEntry {
                resource_type: subscription.resource_type.clone(),
                events: subscription.events.clone(),
                scope: backend_scope,
                members: HashSet::new(),
            })
            .members
            .insert(scope_key.clone());
        self.by_key.insert(scope_key, subscription);
    }

    /// Remove a subscription by key, releasing its backend id when it was
    /// the last member
    pub fn remove(&mut self, scope_key: &str) -> Option<Removal> {
        let subscription = self.by_key.remove(scope_key)?;
        let backend_id = subscription.backend_id().to_string();

        let mut release = None;
        if let Some(entry) = self.backends.get_mut(&backend_id) {
            entry.members.remove(scope_key);
            if entry.members.is_empty() {
                if let Some(entry) = self.backends.remove(&backend_id) {
                    release = Some(UnsubscribeRequest {
                        resource_type: entry.resource_type,
                        events: entry.events,
                        model_id_or_filter: entry.scope.to_value(),
                    });
                }
            }
        }

        Some(Removal {
            subscription,
            release,
        })
    }

    /// Number of local subscriptions sharing a backend id
    pub fn member_count(&self, backend_id: &str) -> usize {
        self.backends.get(backend_id).map(|e| e.members.len()).unwrap_or(0)
    }

    /// Distinct backend ids, sorted
    pub fn backend_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.backends.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Set `expires_at` on every subscription sharing `backend_id`.
    /// Returns the number updated.
    pub fn apply_expiry(&mut self, backend_id: &str, expires_at: Option<DateTime<Utc>>) -> usize {
        let members = match self.backends.get(backend_id) {
            Some(entry) => entry.members.clone(),
            None => return 0,
        };

        let mut updated = 0;
        for key in members {
            if let Some(subscription) = self.by_key.get_mut(&key) {
                if expires_at.is_some() {
                    subscription.expires_at = expires_at;
                }
                updated += 1;
            }
        }
        updated
    }

    /// Drop every subscription sharing `backend_id`, returning them
    pub fn expire_backend(&mut self, backend_id: &str) -> Vec<Subscription> {
        let Some(entry) = self.backends.remove(backend_id) else {
            return Vec::new();
        };

        let mut removed: Vec<Subscription> = entry
            .members
            .iter()
            .filter_map(|key| self.by_key.remove(key))
            .collect();
        removed.sort_by(|a, b| a.scope_key.cmp(&b.scope_key));
        removed
    }

    /// Snapshot of all subscriptions ordered by scope key
    pub fn list(&self) -> Vec<Subscription> {
        let ordered: BTreeMap<&String, &Subscription> = self.by_key.iter().collect();
        ordered.into_values().cloned().collect()
    }

    /// Drop everything, including pending markers
    pub fn clear(&mut self) {
        self.by_key.clear();
        self.backends.clear();
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}
