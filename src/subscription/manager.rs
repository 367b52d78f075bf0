//! # Subscription Manager
//!
//! Client entry point. Owns the local subscription store, the batch queue,
//! the keepalive service and the channel registry.
//!
//! Routing:
//! - single ids are batchable and wait in the debounce queue
//! - `true` and filter objects register directly
//!
//! A duplicate canonical scope key (live or still pending) returns
//! `Ok(false)` with no wire effect. Registration failures also resolve to
//! `Ok(false)`; only input errors and use after [`dispose`] surface as
//! `Err`.
//!
//! The state mutex is never held across an `.await`.
//!
//! [`dispose`]: SubscriptionManager::dispose

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use futures_util::future::join_all;
use serde_json::Value;
use uuid::Uuid;

use super::api::SubscriptionApi;
use super::batch::{BatchItem, BatchQueue};
use super::channel::{ChannelRegistry, Listener, ListenerId, ModelListenerKey};
use super::errors::{SubscriptionError, SubscriptionResult};
use super::keepalive::{apply_renewal, KeepaliveService, KeepaliveState};
use super::store::{Subscription, SubscriptionStore};
use crate::config::LiveConfig;
use crate::observability::{log_event_with_fields, Event, LiveMetrics, MetricsSnapshot};
use crate::protocol::{
    canonical_scope_key, content_hash, normalize_events, ProtocolError, RegisterRequest, RenewRequest,
    Scope, UnsubscribeRequest,
};
use crate::transport::Transport;

/// Result of one renewal round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenewalReport {
    /// Distinct backend ids sent
    pub requested: usize,
    pub renewed: usize,
    /// Local subscriptions dropped
    pub expired: usize,
}

/// Point-in-time view of the manager
#[derive(Debug, Clone)]
pub struct ManagerStatus {
    pub subscriptions: usize,
    pub backend_ids: usize,
    pub pending: usize,
    pub queued_batches: usize,
    pub bound_channels: Vec<String>,
    pub keepalive: Option<KeepaliveState>,
    pub metrics: MetricsSnapshot,
    pub disposed: bool,
}

struct ManagerState {
    store: SubscriptionStore,
    queue: BatchQueue,
}

/// One registration issued outside a batch
struct DirectRegistration {
    subscription_id: String,
    resource_type: String,
    events: Vec<String>,
    scope: Scope,
    scope_key: String,
}

struct ManagerInner {
    config: LiveConfig,
    api: Arc<dyn SubscriptionApi>,
    channels: ChannelRegistry,
    state: Mutex<ManagerState>,
    keepalive: KeepaliveService,
    metrics: Arc<LiveMetrics>,
    disposed: AtomicBool,
}

/// Client subscription manager. Cloning shares the same state.
#[derive(Clone)]
pub struct SubscriptionManager {
    inner: Arc<ManagerInner>,
}

impl SubscriptionManager {
    /// Create a manager. Fails on invalid configuration.
    pub fn new(
        config: LiveConfig,
        api: Arc<dyn SubscriptionApi>,
        transport: Arc<dyn Transport>,
    ) -> SubscriptionResult<Self> {
        config.validate()?;

        let metrics = Arc::new(LiveMetrics::new());
        let channels = ChannelRegistry::new(
            transport,
            &config.channel_prefix,
            config.diagnostics_capacity,
            Arc::clone(&metrics),
        );
        let keepalive = KeepaliveService::new(config.keepalive_interval());

        Ok(Self {
            inner: Arc::new(ManagerInner {
                config,
                api,
                channels,
                state: Mutex::new(ManagerState {
                    store: SubscriptionStore::new(),
                    queue: BatchQueue::new(),
                }),
                keepalive,
                metrics,
                disposed: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &LiveConfig {
        &self.inner.config
    }

    /// Subscribe using the wire form of a scope: `true`, an id or a filter
    /// object. `null` is rejected before any network call.
    pub async fn subscribe_to_model(
        &self,
        resource_type: &str,
        events: &[&str],
        model_id_or_filter: &Value,
    ) -> SubscriptionResult<bool> {
        let scope = Scope::from_value(model_id_or_filter)?;
        self.subscribe(resource_type, events, scope).await
    }

    /// Subscribe to `events` of `resource_type` within `scope`.
    ///
    /// Returns `Ok(true)` once registered, `Ok(false)` for duplicates and
    /// failed registrations.
    pub async fn subscribe(&self, resource_type: &str, events: &[&str], scope: Scope) -> SubscriptionResult<bool> {
        self.inner.ensure_active()?;
        if resource_type.trim().is_empty() {
            return Err(ProtocolError::InvalidResourceType("resource type must not be empty".into()).into());
        }
        let events = normalize_events(events)?;
        let scope_key = canonical_scope_key(resource_type, &scope);
        let subscription_id = Uuid::new_v4().to_string();

        let queued = {
            let mut state = self.inner.lock_state()?;
            if state.store.contains(&scope_key) {
                log_event_with_fields(Event::SubscriptionDuplicate, &[("scope_key", &scope_key)]);
                return Ok(false);
            }
            state.store.mark_pending(&scope_key, &subscription_id);

            match &scope {
                Scope::Id(model_id) => {
                    let (item, completion) =
                        BatchItem::new(subscription_id.clone(), model_id.clone(), scope_key.clone());
                    let weak = Arc::downgrade(&self.inner);
                    state
                        .queue
                        .add(resource_type, &events, item, self.inner.config.debounce(), move |key| async move {
                            if let Some(inner) = weak.upgrade() {
                                inner.flush_batch(key).await;
                            }
                        });
                    Some(completion)
                }
                Scope::All | Scope::Filter(_) => None,
            }
        };

        match queued {
            // A dropped sender means the batch was discarded without a result
            Some(completion) => Ok(completion.await.unwrap_or(false)),
            None => Ok(self
                .inner
                .register_direct(DirectRegistration {
                    subscription_id,
                    resource_type: resource_type.to_string(),
                    events,
                    scope,
                    scope_key,
                })
                .await),
        }
    }

    /// Unsubscribe using the wire form of a scope
    pub async fn unsubscribe_from_model(
        &self,
        resource_type: &str,
        model_id_or_filter: &Value,
    ) -> SubscriptionResult<bool> {
        let scope = Scope::from_value(model_id_or_filter)?;
        self.unsubscribe(resource_type, &scope).await
    }

    /// Drop the subscription for (resource type, scope).
    ///
    /// Returns `Ok(false)` when nothing was subscribed. A queued or in-flight
    /// subscription is cancelled. The backend is only told once the last
    /// local subscription sharing a backend id is gone.
    pub async fn unsubscribe(&self, resource_type: &str, scope: &Scope) -> SubscriptionResult<bool> {
        self.inner.ensure_active()?;
        let scope_key = canonical_scope_key(resource_type, scope);

        let (removal, now_empty) = {
            let mut state = self.inner.lock_state()?;
            if state.queue.cancel_item(&scope_key) {
                state.store.clear_pending(&scope_key);
                log_event_with_fields(Event::SubscriptionRemoved, &[("scope_key", &scope_key), ("state", "queued")]);
                return Ok(true);
            }
            if state.store.clear_pending(&scope_key) {
                log_event_with_fields(Event::SubscriptionRemoved, &[("scope_key", &scope_key), ("state", "in_flight")]);
                return Ok(true);
            }
            let removal = state.store.remove(&scope_key);
            (removal, state.store.is_empty())
        };

        let Some(removal) = removal else {
            return Ok(false);
        };
        log_event_with_fields(
            Event::SubscriptionRemoved,
            &[
                ("backend_id", removal.subscription.backend_id()),
                ("scope_key", &scope_key),
                ("state", "live"),
            ],
        );

        if now_empty {
            self.inner.stop_keepalive();
        }
        if let Some(request) = removal.release {
            self.inner.release(request).await;
        }
        Ok(true)
    }

    /// Run one renewal round immediately
    pub async fn renew_now(&self) -> SubscriptionResult<RenewalReport> {
        self.inner.ensure_active()?;
        self.inner.renew_subscriptions().await
    }

    /// Live subscriptions ordered by scope key
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.inner
            .lock_state()
            .map(|state| state.store.list())
            .unwrap_or_default()
    }

    pub fn subscription(&self, resource_type: &str, scope: &Scope) -> Option<Subscription> {
        let scope_key = canonical_scope_key(resource_type, scope);
        self.inner
            .lock_state()
            .ok()
            .and_then(|state| state.store.get(&scope_key).cloned())
    }

    /// Whether a scope is live or pending
    pub fn is_subscribed(&self, resource_type: &str, scope: &Scope) -> bool {
        let scope_key = canonical_scope_key(resource_type, scope);
        self.inner
            .lock_state()
            .map(|state| state.store.contains(&scope_key))
            .unwrap_or(false)
    }

    /// Distinct backend ids a renewal round would send
    pub fn backend_ids(&self) -> Vec<String> {
        self.inner
            .lock_state()
            .map(|state| state.store.backend_ids())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock_state().map(|state| state.store.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_keepalive_running(&self) -> bool {
        self.inner.keepalive.is_running()
    }

    pub fn keepalive_state(&self) -> Option<KeepaliveState> {
        self.inner.keepalive.state()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Channel registry for listeners and diagnostics
    pub fn channels(&self) -> &ChannelRegistry {
        &self.inner.channels
    }

    pub fn on_event(&self, resource_type: &str, event: &str, listener: Listener) -> ListenerId {
        self.inner.channels.on_event(resource_type, event, listener)
    }

    pub fn off_event(&self, id: ListenerId) -> bool {
        self.inner.channels.off_event(id)
    }

    pub fn on_model_event(&self, key: ModelListenerKey, listener: Listener) -> bool {
        self.inner.channels.on_model_event(key, listener)
    }

    pub fn off_model_event(&self, key: &ModelListenerKey) -> bool {
        self.inner.channels.off_model_event(key)
    }

    pub fn status(&self) -> ManagerStatus {
        let (subscriptions, backend_ids, pending, queued_batches) = self
            .inner
            .lock_state()
            .map(|state| {
                (
                    state.store.len(),
                    state.store.backend_ids().len(),
                    state.store.pending_count(),
                    state.queue.len(),
                )
            })
            .unwrap_or_default();

        ManagerStatus {
            subscriptions,
            backend_ids,
            pending,
            queued_batches,
            bound_channels: self.inner.channels.bound_channels(),
            keepalive: self.inner.keepalive.state(),
            metrics: self.inner.metrics.snapshot(),
            disposed: self.inner.disposed.load(Ordering::SeqCst),
        }
    }

    /// Tear down: cancel queued batches (their callers resolve to `false`),
    /// stop keepalive and drop channels, listeners and local state.
    ///
    /// Backend subscriptions are left to expire. Later calls fail with
    /// [`SubscriptionError::Disposed`].
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        let cancelled = match self.inner.state.lock() {
            Ok(mut state) => {
                let cancelled = state.queue.drain();
                state.store.clear();
                cancelled
            }
            Err(_) => 0,
        };
        self.inner.stop_keepalive();
        self.inner.channels.clear();

        log_event_with_fields(Event::SubscriptionRemoved, &[("cancelled", &cancelled.to_string()), ("state", "disposed")]);
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }
}

impl ManagerInner {
    fn ensure_active(&self) -> SubscriptionResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(SubscriptionError::Disposed);
        }
        Ok(())
    }

    fn lock_state(&self) -> SubscriptionResult<MutexGuard<'_, ManagerState>> {
        self.state
            .lock()
            .map_err(|_| SubscriptionError::Internal("Lock poisoned".into()))
    }

    /// Team channel when configured, otherwise a channel per scope
    fn channel_scope_id(&self, scope: &Scope) -> String {
        if let Some(team_id) = &self.config.team_id {
            return team_id.clone();
        }
        match scope {
            Scope::All => "all".to_string(),
            Scope::Id(id) => id.to_string(),
            Scope::Filter(map) => content_hash(&Value::Object(map.clone())),
        }
    }

    /// Register one subscription on its own backend id
    async fn register_direct(self: &Arc<Self>, registration: DirectRegistration) -> bool {
        let is_pending = self
            .lock_state()
            .map(|state| {
                state
                    .store
                    .is_pending_for(&registration.scope_key, &registration.subscription_id)
            })
            .unwrap_or(false);
        if !is_pending {
            return false;
        }

        let DirectRegistration {
            subscription_id,
            resource_type,
            events,
            scope,
            scope_key,
        } = registration;

        self.channels
            .subscribe_to_channel(&resource_type, &self.channel_scope_id(&scope), &events);

        let request = RegisterRequest {
            subscription_id: subscription_id.clone(),
            resource_type: resource_type.clone(),
            events: events.clone(),
            model_id_or_filter: scope.to_value(),
        };

        let response = match self.api.register(request).await {
            Ok(response) => response,
            Err(err) => {
                if let Ok(mut state) = self.lock_state() {
                    state.store.clear_pending_for(&scope_key, &subscription_id);
                }
                self.metrics.increment_registration_failures();
                log_event_with_fields(
                    Event::SubscriptionFailed,
                    &[("error", &err.to_string()), ("scope_key", &scope_key)],
                );
                return false;
            }
        };
        self.metrics.increment_registrations();

        let subscription = Subscription {
            id: subscription_id.clone(),
            resource_type: resource_type.clone(),
            events: events.clone(),
            scope: scope.clone(),
            scope_key: scope_key.clone(),
            expires_at: response.subscription.expires_at,
            cache_key: Some(response.subscription.cache_key),
            created_at: Utc::now(),
            batched_with: None,
        };

        let inserted = match self.lock_state() {
            Ok(mut state) if state.store.is_pending_for(&scope_key, &subscription_id) => {
                state.store.insert(subscription, scope.clone());
                true
            }
            _ => false,
        };

        if !inserted {
            // Unsubscribed while the call was in flight
            if self.may_release(std::slice::from_ref(&scope_key)) {
                self.release(UnsubscribeRequest {
                    resource_type,
                    events,
                    model_id_or_filter: scope.to_value(),
                })
                .await;
            }
            return false;
        }

        log_event_with_fields(
            Event::SubscriptionRegistered,
            &[("backend_id", &subscription_id), ("scope_key", &scope_key)],
        );
        self.ensure_keepalive();
        true
    }

    /// Flush a batch whose debounce window closed
    async fn flush_batch(self: &Arc<Self>, key: String) {
        let taken = match self.lock_state() {
            Ok(mut state) => state.queue.take(&key),
            Err(_) => None,
        };
        let Some(mut batch) = taken else {
            return;
        };
        if self.disposed.load(Ordering::SeqCst) {
            batch.finish(false);
            return;
        }

        let backend_id = Uuid::new_v4().to_string();
        let merged = Scope::id_filter(&batch.model_ids());
        log_event_with_fields(
            Event::BatchFlushed,
            &[
                ("backend_id", &backend_id),
                ("batch_key", &key),
                ("items", &batch.len().to_string()),
            ],
        );

        let channel_scopes: BTreeSet<String> = batch
            .items()
            .iter()
            .map(|item| self.channel_scope_id(&Scope::Id(item.model_id.clone())))
            .collect();
        for scope_id in &channel_scopes {
            self.channels
                .subscribe_to_channel(&batch.resource_type, scope_id, &batch.events);
        }

        let request = RegisterRequest {
            subscription_id: backend_id.clone(),
            resource_type: batch.resource_type.clone(),
            events: batch.events.clone(),
            model_id_or_filter: merged.to_value(),
        };

        match self.api.register(request).await {
            Ok(response) => {
                self.metrics.increment_registrations();
                self.metrics.increment_batched_registrations();

                let created_at = Utc::now();
                let resource_type = batch.resource_type.clone();
                let events = batch.events.clone();
                let mut inserted = 0usize;
                if let Ok(mut state) = self.lock_state() {
                    for item in batch.items_mut() {
                        if !state.store.is_pending_for(&item.scope_key, &item.subscription_id) {
                            item.complete(false);
                            continue;
                        }
                        state.store.insert(
                            Subscription {
                                id: item.subscription_id.clone(),
                                resource_type: resource_type.clone(),
                                events: events.clone(),
                                scope: Scope::Id(item.model_id.clone()),
                                scope_key: item.scope_key.clone(),
                                expires_at: response.subscription.expires_at,
                                cache_key: Some(response.subscription.cache_key.clone()),
                                created_at,
                                batched_with: Some(backend_id.clone()),
                            },
                            merged.clone(),
                        );
                        item.complete(true);
                        inserted += 1;
                    }
                }
                batch.finish(false);

                if inserted == 0 {
                    // Every caller left while the call was in flight
                    let scope_keys: Vec<String> = batch.items().iter().map(|item| item.scope_key.clone()).collect();
                    if self.may_release(&scope_keys) {
                        self.release(UnsubscribeRequest {
                            resource_type,
                            events,
                            model_id_or_filter: merged.to_value(),
                        })
                        .await;
                    }
                    return;
                }

                log_event_with_fields(
                    Event::SubscriptionRegistered,
                    &[
                        ("backend_id", &backend_id),
                        ("batch_key", &key),
                        ("items", &inserted.to_string()),
                    ],
                );
                self.ensure_keepalive();
            }
            Err(err) => {
                self.metrics.increment_registration_failures();
                self.metrics.increment_batch_fallbacks();
                log_event_with_fields(
                    Event::BatchFallback,
                    &[
                        ("batch_key", &key),
                        ("error", &err.to_string()),
                        ("items", &batch.len().to_string()),
                    ],
                );

                let resource_type = batch.resource_type.clone();
                let events = batch.events.clone();
                let attempts = batch.take_items().into_iter().map(|mut item| {
                    let inner = Arc::clone(self);
                    let registration = DirectRegistration {
                        subscription_id: item.subscription_id.clone(),
                        resource_type: resource_type.clone(),
                        events: events.clone(),
                        scope: Scope::Id(item.model_id.clone()),
                        scope_key: item.scope_key.clone(),
                    };
                    async move {
                        let subscribed = inner.register_direct(registration).await;
                        item.complete(subscribed);
                    }
                });
                join_all(attempts).await;
            }
        }
    }

    /// One renewal round over every distinct backend id
    async fn renew_subscriptions(&self) -> SubscriptionResult<RenewalReport> {
        let ids = self.lock_state()?.store.backend_ids();
        if ids.is_empty() {
            return Ok(RenewalReport::default());
        }

        self.metrics.increment_renewals();
        let response = match self
            .api
            .renew(RenewRequest {
                subscription_ids: ids.clone(),
            })
            .await
        {
            Ok(response) => response,
            Err(err) => {
                // State stays as is until the next tick
                self.metrics.increment_renewal_failures();
                self.keepalive.record_failure(&err.to_string());
                log_event_with_fields(
                    Event::KeepaliveFailed,
                    &[("error", &err.to_string()), ("ids", &ids.len().to_string())],
                );
                return Err(err);
            }
        };

        let (outcome, now_empty) = {
            let mut state = self.lock_state()?;
            let outcome = apply_renewal(&mut state.store, &ids, &response);
            (outcome, state.store.is_empty())
        };

        for subscription in &outcome.expired {
            log_event_with_fields(
                Event::SubscriptionExpired,
                &[
                    ("backend_id", subscription.backend_id()),
                    ("scope_key", &subscription.scope_key),
                ],
            );
        }
        self.metrics.add_expired_subscriptions(outcome.expired.len() as u64);
        self.keepalive.record_success();

        let report = RenewalReport {
            requested: ids.len(),
            renewed: outcome.renewed,
            expired: outcome.expired.len(),
        };
        log_event_with_fields(
            Event::KeepaliveTick,
            &[
                ("expired", &report.expired.to_string()),
                ("renewed", &report.renewed.to_string()),
                ("requested", &report.requested.to_string()),
            ],
        );

        if now_empty {
            self.stop_keepalive();
        }
        Ok(report)
    }

    fn has_subscriptions(&self) -> bool {
        self.lock_state().map(|state| !state.store.is_empty()).unwrap_or(false)
    }

    /// Start the keepalive loop if it is not running
    fn ensure_keepalive(self: &Arc<Self>) {
        if self.disposed.load(Ordering::SeqCst) || self.keepalive.is_running() {
            return;
        }

        let weak = Arc::downgrade(self);
        let started = self.keepalive.start(move || {
            let weak = weak.clone();
            async move {
                let Some(inner) = weak.upgrade() else {
                    return false;
                };
                // Whole-call failures are logged and retried next tick
                let _ = inner.renew_subscriptions().await;
                inner.has_subscriptions()
            }
        });
        if started {
            log_event_with_fields(
                Event::KeepaliveStarted,
                &[("interval_secs", &self.config.keepalive_interval_secs.to_string())],
            );
        }
    }

    /// Whether an abandoned registration may be released on the backend.
    ///
    /// Unsubscribe requests address a scope, not a backend id, so a release
    /// is skipped while a newer attempt holds any of the same scope keys.
    /// The abandoned registration is never renewed and expires on its own.
    fn may_release(&self, scope_keys: &[String]) -> bool {
        if self.disposed.load(Ordering::SeqCst) {
            return false;
        }
        let Ok(state) = self.lock_state() else {
            return false;
        };
        let held: Vec<&String> = scope_keys.iter().filter(|key| state.store.contains(key)).collect();
        if held.is_empty() {
            return true;
        }
        log_event_with_fields(Event::ReleaseSkipped, &[("scope_key", held[0].as_str())]);
        false
    }

    fn stop_keepalive(&self) {
        if self.keepalive.stop() {
            log_event_with_fields(Event::KeepaliveStopped, &[]);
        }
    }

    /// Tell the backend a registration is no longer needed. Failures are
    /// logged; the backend expires the registration on its own.
    async fn release(&self, request: UnsubscribeRequest) {
        let scope = request.model_id_or_filter.to_string();
        let resource_type = request.resource_type.clone();
        match self.api.unsubscribe(request).await {
            Ok(()) => {
                self.metrics.increment_backend_unsubscribes();
                log_event_with_fields(
                    Event::BackendUnsubscribed,
                    &[("resource_type", &resource_type), ("scope", &scope)],
                );
            }
            Err(err) => {
                log_event_with_fields(
                    Event::SubscriptionFailed,
                    &[
                        ("error", &err.to_string()),
                        ("resource_type", &resource_type),
                        ("scope", &scope),
                    ],
                );
            }
        }
    }
}
