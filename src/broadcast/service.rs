//! # Subscription Service
//!
//! Server-side handling of registration, renewal and unsubscribe requests
//! for an authenticated principal.
//!
//! Registration adds the principal to the subscriber set for its scope and
//! records a ledger entry `subscription_id → expiry`. Renewal extends live
//! entries owned by the principal; anything else is reported as failed.
//! [`SubscriptionService::purge_expired`] sweeps stale entries and the set
//! memberships they held.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use super::cache::CacheStore;
use super::errors::{BroadcastError, BroadcastResult};
use super::subscribers::SubscriberSets;
use crate::config::LiveConfig;
use crate::observability::{log_event_with_fields, Event};
use crate::protocol::{
    normalize_events, ProtocolError, RegisterRequest, RegisterResponse, RegisteredSubscription, RenewRequest,
    RenewResponse, RenewalStatus, Scope, UnsubscribeRequest,
};
use crate::subscription::{ApiFuture, SubscriptionApi, SubscriptionError};

/// Authenticated caller
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Principal {
    pub user_id: String,
    pub team_id: String,
}

impl Principal {
    pub fn new(user_id: impl Into<String>, team_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            team_id: team_id.into(),
        }
    }
}

/// One registered subscription
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub principal: Principal,
    pub resource_type: String,
    pub events: Vec<String>,
    /// Subscriber list key the principal was added to
    pub set_key: String,
    pub expires_at: DateTime<Utc>,
}

/// Server-side subscription bookkeeping
pub struct SubscriptionService {
    sets: SubscriberSets,
    ttl: chrono::Duration,
    ledger: RwLock<HashMap<String, LedgerEntry>>,
}

impl SubscriptionService {
    pub fn new(config: &LiveConfig, cache: Arc<dyn CacheStore>) -> Self {
        let ttl = chrono::Duration::from_std(config.subscription_ttl()).unwrap_or_else(|_| chrono::Duration::minutes(10));
        Self {
            sets: SubscriberSets::new(cache, &config.cache_prefix),
            ttl,
            ledger: RwLock::new(HashMap::new()),
        }
    }

    pub fn subscriber_sets(&self) -> &SubscriberSets {
        &self.sets
    }

    pub fn register(&self, principal: &Principal, request: RegisterRequest) -> BroadcastResult<RegisterResponse> {
        if request.resource_type.trim().is_empty() {
            return Err(ProtocolError::InvalidResourceType(request.resource_type).into());
        }
        if request.subscription_id.is_empty() {
            return Err(BroadcastError::SubscriptionNotFound("empty subscription id".into()));
        }
        let scope = Scope::from_value(&request.model_id_or_filter)?;
        let events = normalize_events(&request.events)?;

        let set_key = self
            .sets
            .subscribe(&request.resource_type, &principal.team_id, &scope, &principal.user_id)?;
        let expires_at = Utc::now() + self.ttl;

        let mut ledger = self
            .ledger
            .write()
            .map_err(|_| BroadcastError::Internal("Lock poisoned".into()))?;
        ledger.insert(
            request.subscription_id.clone(),
            LedgerEntry {
                principal: principal.clone(),
                resource_type: request.resource_type,
                events,
                set_key: set_key.clone(),
                expires_at,
            },
        );

        Ok(RegisterResponse {
            subscription: RegisteredSubscription {
                expires_at: Some(expires_at),
                cache_key: set_key,
            },
        })
    }

    /// Extend every live entry of `principal` named in the request
    pub fn renew(&self, principal: &Principal, request: &RenewRequest) -> BroadcastResult<RenewResponse> {
        let now = Utc::now();
        let expires_at = now + self.ttl;
        let mut ledger = self
            .ledger
            .write()
            .map_err(|_| BroadcastError::Internal("Lock poisoned".into()))?;

        let mut response = RenewResponse::default();
        for id in &request.subscription_ids {
            let status = match ledger.get_mut(id) {
                Some(entry) if entry.principal == *principal && entry.expires_at > now => {
                    entry.expires_at = expires_at;
                    RenewalStatus {
                        success: true,
                        expires_at: Some(expires_at),
                    }
                }
                _ => RenewalStatus {
                    success: false,
                    expires_at: None,
                },
            };
            response.subscriptions.insert(id.clone(), status);
        }
        Ok(response)
    }

    /// Drop the principal's subscription to a scope. Returns whether one
    /// existed.
    pub fn unsubscribe(&self, principal: &Principal, request: &UnsubscribeRequest) -> BroadcastResult<bool> {
        let scope = Scope::from_value(&request.model_id_or_filter)?;
        let set_key = self.sets.key_for(&request.resource_type, &principal.team_id, &scope);

        let remaining = {
            let mut ledger = self
                .ledger
                .write()
                .map_err(|_| BroadcastError::Internal("Lock poisoned".into()))?;
            let found = ledger
                .iter()
                .find(|(_, e)| e.principal == *principal && e.set_key == set_key)
                .map(|(id, _)| id.clone());
            if let Some(id) = found {
                ledger.remove(&id);
            }
            ledger
                .values()
                .any(|e| e.principal.user_id == principal.user_id && e.set_key == set_key)
        };

        // Another session of the same user still holds the membership
        if remaining {
            return Ok(true);
        }
        self.sets.remove_member(&set_key, &principal.user_id)
    }

    /// Remove entries expired at `now` and the memberships only they held.
    /// Returns the number of entries removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> BroadcastResult<usize> {
        let (expired, live): (Vec<LedgerEntry>, Vec<(String, String)>) = {
            let mut ledger = self
                .ledger
                .write()
                .map_err(|_| BroadcastError::Internal("Lock poisoned".into()))?;
            let ids: Vec<String> = ledger
                .iter()
                .filter(|(_, e)| e.expires_at <= now)
                .map(|(id, _)| id.clone())
                .collect();
            let expired = ids.iter().filter_map(|id| ledger.remove(id)).collect();
            let live = ledger
                .values()
                .map(|e| (e.principal.user_id.clone(), e.set_key.clone()))
                .collect();
            (expired, live)
        };

        for entry in &expired {
            let still_held = live
                .iter()
                .any(|(user, key)| *user == entry.principal.user_id && *key == entry.set_key);
            if !still_held {
                self.sets.remove_member(&entry.set_key, &entry.principal.user_id)?;
            }
        }

        if !expired.is_empty() {
            log_event_with_fields(Event::LedgerPurged, &[("expired", &expired.len().to_string())]);
        }
        Ok(expired.len())
    }

    pub fn entry(&self, subscription_id: &str) -> Option<LedgerEntry> {
        self.ledger.read().ok()?.get(subscription_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.ledger.read().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// [`SubscriptionApi`] served in-process by a [`SubscriptionService`] on
/// behalf of one principal
pub struct PrincipalApi {
    service: Arc<SubscriptionService>,
    principal: Principal,
}

impl PrincipalApi {
    pub fn new(service: Arc<SubscriptionService>, principal: Principal) -> Self {
        Self { service, principal }
    }
}

impl SubscriptionApi for PrincipalApi {
    fn register(&self, request: RegisterRequest) -> ApiFuture<'_, RegisterResponse> {
        Box::pin(async move {
            self.service
                .register(&self.principal, request)
                .map_err(|err| SubscriptionError::RegistrationFailed(err.to_string()))
        })
    }

    fn renew(&self, request: RenewRequest) -> ApiFuture<'_, RenewResponse> {
        Box::pin(async move {
            self.service
                .renew(&self.principal, &request)
                .map_err(|err| SubscriptionError::RenewalFailed(err.to_string()))
        })
    }

    fn unsubscribe(&self, request: UnsubscribeRequest) -> ApiFuture<'_, ()> {
        Box::pin(async move {
            self.service
                .unsubscribe(&self.principal, &request)
                .map(|_| ())
                .map_err(|err| SubscriptionError::UnsubscribeFailed(err.to_string()))
        })
    }
}
