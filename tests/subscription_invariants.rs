//! Subscription Manager Invariant Tests
//!
//! Client-side guarantees:
//! - At most one live subscription per canonical scope key
//! - Id subscriptions in one debounce window share one registration
//! - A failed merged registration falls back to one call per id
//! - Keepalive renews each backend id once per tick
//! - A failed renewal id drops only the subscriptions sharing it
//! - Batched siblings release the backend id together

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aerolive::config::LiveConfig;
use aerolive::protocol::{EventEnvelope, ModelEvent, ModelId, Scope};
use aerolive::subscription::{
    ApiCall, Listener, ModelListenerKey, RecordingApi, SubscriptionApi, SubscriptionError, SubscriptionManager,
};
use aerolive::transport::{LocalTransport, Transport};
use serde_json::{json, Value};

// =============================================================================
// Helper Functions
// =============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn setup() -> (Arc<RecordingApi>, Arc<LocalTransport>, SubscriptionManager) {
    init_tracing();
    let api = Arc::new(RecordingApi::new());
    let transport = Arc::new(LocalTransport::new());
    let manager = SubscriptionManager::new(
        LiveConfig::for_team("t1"),
        Arc::clone(&api) as Arc<dyn SubscriptionApi>,
        Arc::clone(&transport) as Arc<dyn Transport>,
    )
    .unwrap();
    (api, transport, manager)
}

async fn subscribe_ids(manager: &SubscriptionManager, ids: &[i64]) -> Vec<bool> {
    let values: Vec<Value> = ids.iter().map(|id| json!(id)).collect();
    let calls = values
        .iter()
        .map(|value| manager.subscribe_to_model("Post", &["updated"], value));
    futures_util::future::join_all(calls)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect()
}

fn is_merged_filter(value: &Value) -> bool {
    value
        .get("filter")
        .and_then(|filter| filter.get("id"))
        .map(Value::is_array)
        .unwrap_or(false)
}

fn counting_listener() -> (Arc<AtomicUsize>, Listener) {
    let hits = Arc::new(AtomicUsize::new(0));
    let inner = Arc::clone(&hits);
    let listener: Listener = Arc::new(move |_: &ModelEvent| {
        inner.fetch_add(1, Ordering::SeqCst);
    });
    (hits, listener)
}

// =============================================================================
// Idempotence Tests
// =============================================================================

/// Subscribing the same scope twice registers once.
#[tokio::test(start_paused = true)]
async fn test_duplicate_scope_registers_once() {
    let (api, _transport, manager) = setup();

    let results = subscribe_ids(&manager, &[7, 7]).await;

    assert_eq!(results, vec![true, false]);
    assert_eq!(api.registrations().len(), 1);
    assert_eq!(manager.len(), 1);
}

/// Filters differing only in key order are one subscription.
#[tokio::test(start_paused = true)]
async fn test_equivalent_filters_register_once() {
    let (api, _transport, manager) = setup();

    let first = manager
        .subscribe_to_model("Post", &["updated"], &json!({"status": "open", "team": 4}))
        .await
        .unwrap();
    let second = manager
        .subscribe_to_model("Post", &["updated"], &json!({"team": 4, "status": "open"}))
        .await
        .unwrap();

    assert!(first);
    assert!(!second);
    assert_eq!(api.registrations().len(), 1);
}

/// A null scope fails before any network call.
#[tokio::test(start_paused = true)]
async fn test_null_scope_is_input_error() {
    let (api, _transport, manager) = setup();

    let result = manager.subscribe_to_model("Post", &["updated"], &Value::Null).await;

    assert!(matches!(result, Err(SubscriptionError::InvalidInput(_))));
    assert!(api.calls().is_empty());
}

// =============================================================================
// Batching Tests
// =============================================================================

/// Three ids in one window become one registration with an id filter.
#[tokio::test(start_paused = true)]
async fn test_ids_in_window_share_registration() {
    let (api, _transport, manager) = setup();

    let results = subscribe_ids(&manager, &[1, 2, 3]).await;

    assert_eq!(results, vec![true, true, true]);
    let registrations = api.registrations();
    assert_eq!(registrations.len(), 1);
    assert_eq!(registrations[0].model_id_or_filter, json!({"filter": {"id": [1, 2, 3]}}));

    let subscriptions = manager.subscriptions();
    assert_eq!(subscriptions.len(), 3);
    let backend = subscriptions[0].batched_with.clone().unwrap();
    assert_eq!(backend, registrations[0].subscription_id);
    assert!(subscriptions.iter().all(|s| s.batched_with.as_deref() == Some(backend.as_str())));

    // Each entry keeps its own id for introspection
    let own: Vec<Value> = subscriptions.iter().map(|s| s.model_id_or_filter()).collect();
    assert_eq!(own, vec![json!(1), json!(2), json!(3)]);
}

/// Every addition pushes the flush out, so a steady stream flushes once.
#[tokio::test(start_paused = true)]
async fn test_debounce_resets_on_each_addition() {
    let (api, _transport, manager) = setup();

    let mut handles = Vec::new();
    for id in 1..=5 {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            manager.subscribe_to_model("Post", &["updated"], &json!(id)).await
        }));
        tokio::time::sleep(Duration::from_millis(30)).await;
    }
    for handle in handles {
        assert!(handle.await.unwrap().unwrap());
    }

    assert_eq!(api.registrations().len(), 1);
    assert_eq!(api.registrations()[0].model_id_or_filter, json!({"filter": {"id": [1, 2, 3, 4, 5]}}));
}

/// Different event sets never share a batch.
#[tokio::test(start_paused = true)]
async fn test_event_sets_batch_separately() {
    let (api, _transport, manager) = setup();

    let (one, two) = (json!(1), json!(2));
    let (a, b) = tokio::join!(
        manager.subscribe_to_model("Post", &["updated"], &one),
        manager.subscribe_to_model("Post", &["deleted"], &two),
    );

    assert!(a.unwrap());
    assert!(b.unwrap());
    assert_eq!(api.registrations().len(), 2);
}

/// An id added after the flush started opens a fresh batch.
#[tokio::test(start_paused = true)]
async fn test_add_during_flush_starts_new_batch() {
    let (api, _transport, manager) = setup();
    api.set_latency(Duration::from_millis(100));

    let early = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.subscribe_to_model("Post", &["updated"], &json!(1)).await })
    };
    tokio::time::sleep(Duration::from_millis(70)).await;
    let late = manager.subscribe_to_model("Post", &["updated"], &json!(2)).await.unwrap();

    assert!(early.await.unwrap().unwrap());
    assert!(late);
    let filters: Vec<Value> = api.registrations().into_iter().map(|r| r.model_id_or_filter).collect();
    assert_eq!(filters, vec![json!({"filter": {"id": [1]}}), json!({"filter": {"id": [2]}})]);
}

// =============================================================================
// Fallback Tests
// =============================================================================

/// A failed merged registration retries each id on its own.
#[tokio::test(start_paused = true)]
async fn test_batch_failure_falls_back_per_item() {
    let (api, _transport, manager) = setup();
    api.fail_registrations_where(|req| is_merged_filter(&req.model_id_or_filter));

    let results = subscribe_ids(&manager, &[1, 2, 3]).await;

    assert_eq!(results, vec![true, true, true]);
    let registrations = api.registrations();
    assert_eq!(registrations.len(), 4);
    let individual: Vec<Value> = registrations[1..].iter().map(|r| r.model_id_or_filter.clone()).collect();
    assert_eq!(individual.len(), 3);
    for id in [1, 2, 3] {
        assert!(individual.contains(&json!(id)));
    }
    assert!(manager.subscriptions().iter().all(|s| !s.is_batched()));
    assert_eq!(manager.metrics().batch_fallbacks, 1);
}

/// Fallback failures are isolated per id.
#[tokio::test(start_paused = true)]
async fn test_fallback_isolates_failures() {
    let (api, _transport, manager) = setup();
    api.fail_registrations_where(|req| is_merged_filter(&req.model_id_or_filter) || req.model_id_or_filter == json!(2));

    let results = subscribe_ids(&manager, &[1, 2, 3]).await;

    assert_eq!(results, vec![true, false, true]);
    assert_eq!(manager.len(), 2);
    assert!(!manager.is_subscribed("Post", &Scope::Id(ModelId::Int(2))));

    // A failed key can be subscribed again
    api.fail_registrations_where(|_| false);
    assert!(manager.subscribe_to_model("Post", &["updated"], &json!(2)).await.unwrap());
}

// =============================================================================
// Keepalive Tests
// =============================================================================

/// M batched siblings plus K direct subscriptions renew 1 + K ids.
#[tokio::test(start_paused = true)]
async fn test_keepalive_renews_distinct_backend_ids() {
    let (api, _transport, manager) = setup();
    subscribe_ids(&manager, &[1, 2, 3]).await;
    manager.subscribe_to_model("Post", &["updated"], &json!(true)).await.unwrap();
    manager
        .subscribe_to_model("Post", &["updated"], &json!({"status": "open"}))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(241)).await;

    let renewals = api.renewals();
    assert_eq!(renewals.len(), 1);
    assert_eq!(renewals[0].subscription_ids.len(), 3);
    assert_eq!(manager.keepalive_state().unwrap().renewal_count, 1);
}

/// A failed id drops only the subscriptions referencing it.
#[tokio::test(start_paused = true)]
async fn test_renewal_failure_is_isolated() {
    let (api, _transport, manager) = setup();
    subscribe_ids(&manager, &[1, 2]).await;
    manager.subscribe_to_model("Post", &["updated"], &json!(true)).await.unwrap();

    let batched_backend = manager
        .subscription("Post", &Scope::Id(ModelId::Int(1)))
        .and_then(|s| s.batched_with)
        .unwrap();
    let before = manager.subscription("Post", &Scope::All).unwrap().expires_at;
    api.fail_renewal_for(&batched_backend);

    let report = manager.renew_now().await.unwrap();

    assert_eq!(report.requested, 2);
    assert_eq!(report.renewed, 1);
    assert_eq!(report.expired, 2);
    assert_eq!(manager.len(), 1);
    let after = manager.subscription("Post", &Scope::All).unwrap().expires_at;
    assert!(after >= before);
    assert_eq!(manager.metrics().expired_subscriptions, 2);
}

/// A whole-call failure leaves state untouched until the next tick.
#[tokio::test(start_paused = true)]
async fn test_renewal_call_failure_changes_nothing() {
    let (api, _transport, manager) = setup();
    subscribe_ids(&manager, &[1, 2]).await;
    api.fail_renew_calls(true);

    assert!(manager.renew_now().await.is_err());
    assert_eq!(manager.len(), 2);
    let state = manager.keepalive_state().unwrap();
    assert_eq!(state.last_success, Some(false));
    assert!(state.last_error.is_some());

    // Not retried eagerly
    assert_eq!(api.renewals().len(), 1);
    api.fail_renew_calls(false);
    tokio::time::sleep(Duration::from_secs(241)).await;
    assert_eq!(api.renewals().len(), 2);
    assert_eq!(manager.len(), 2);
}

/// Keepalive runs only while subscriptions exist.
#[tokio::test(start_paused = true)]
async fn test_keepalive_lifecycle() {
    let (api, _transport, manager) = setup();
    assert!(!manager.is_keepalive_running());

    manager.subscribe_to_model("Post", &["updated"], &json!(true)).await.unwrap();
    assert!(manager.is_keepalive_running());

    manager.unsubscribe_from_model("Post", &json!(true)).await.unwrap();
    assert!(!manager.is_keepalive_running());
    assert!(manager.keepalive_state().is_none());

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert!(api.renewals().is_empty());
}

/// When every id expires, keepalive stops itself.
#[tokio::test(start_paused = true)]
async fn test_keepalive_stops_after_total_expiry() {
    let (api, _transport, manager) = setup();
    manager.subscribe_to_model("Post", &["updated"], &json!(true)).await.unwrap();
    let backend = manager.backend_ids()[0].clone();
    api.fail_renewal_for(&backend);

    tokio::time::sleep(Duration::from_secs(241)).await;

    assert!(manager.is_empty());
    assert!(!manager.is_keepalive_running());
}

// =============================================================================
// Unsubscribe Tests
// =============================================================================

/// The backend unsubscribe is issued only with the last sibling.
#[tokio::test(start_paused = true)]
async fn test_batched_unsubscribe_is_ref_counted() {
    let (api, _transport, manager) = setup();
    subscribe_ids(&manager, &[1, 2, 3]).await;

    assert!(manager.unsubscribe_from_model("Post", &json!(1)).await.unwrap());
    assert!(manager.unsubscribe_from_model("Post", &json!(2)).await.unwrap());
    assert!(api.unsubscribes().is_empty());

    assert!(manager.unsubscribe_from_model("Post", &json!(3)).await.unwrap());
    let unsubscribes = api.unsubscribes();
    assert_eq!(unsubscribes.len(), 1);
    assert_eq!(unsubscribes[0].model_id_or_filter, json!({"filter": {"id": [1, 2, 3]}}));
    assert!(!manager.is_keepalive_running());
}

/// Unbatched subscriptions are released immediately.
#[tokio::test(start_paused = true)]
async fn test_direct_unsubscribe_is_immediate() {
    let (api, _transport, manager) = setup();
    manager
        .subscribe_to_model("Post", &["updated"], &json!({"status": "open"}))
        .await
        .unwrap();

    assert!(manager
        .unsubscribe_from_model("Post", &json!({"status": "open"}))
        .await
        .unwrap());
    assert_eq!(api.unsubscribes().len(), 1);
    assert!(!manager.unsubscribe_from_model("Post", &json!({"status": "open"})).await.unwrap());
}

/// Unsubscribing a queued id cancels it without any network call.
#[tokio::test(start_paused = true)]
async fn test_unsubscribe_cancels_queued_id() {
    let (api, _transport, manager) = setup();

    let pending = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.subscribe_to_model("Post", &["updated"], &json!(1)).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(manager.unsubscribe_from_model("Post", &json!(1)).await.unwrap());
    assert!(!pending.await.unwrap().unwrap());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(api.calls().is_empty());
}

/// A batch whose callers all left mid-flight is released on the backend.
#[tokio::test(start_paused = true)]
async fn test_cancelled_in_flight_batch_is_released() {
    let (api, _transport, manager) = setup();
    api.set_latency(Duration::from_millis(100));

    let pending = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.subscribe_to_model("Post", &["updated"], &json!(1)).await })
    };
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(manager.unsubscribe_from_model("Post", &json!(1)).await.unwrap());

    assert!(!pending.await.unwrap().unwrap());
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(manager.is_empty());
    let calls = api.calls();
    assert!(matches!(calls.last(), Some(ApiCall::Unsubscribe(req)) if req.model_id_or_filter == json!({"filter": {"id": [1]}})));
}

/// Re-subscribing while an abandoned registration is in flight keeps the new one.
#[tokio::test(start_paused = true)]
async fn test_resubscribe_during_abandoned_registration() {
    let (api, _transport, manager) = setup();
    api.set_latency(Duration::from_millis(100));

    let first = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.subscribe_to_model("Post", &["updated"], &json!(true)).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(manager.unsubscribe_from_model("Post", &json!(true)).await.unwrap());

    let second = manager.subscribe_to_model("Post", &["updated"], &json!(true)).await.unwrap();

    assert!(!first.await.unwrap().unwrap());
    assert!(second);
    tokio::time::sleep(Duration::from_millis(200)).await;

    // The shared scope must not be released on the backend
    assert!(api.unsubscribes().is_empty());
    let registrations = api.registrations();
    assert_eq!(registrations.len(), 2);
    assert_eq!(manager.len(), 1);
    assert_eq!(manager.backend_ids(), vec![registrations[1].subscription_id.clone()]);
}

// =============================================================================
// Event Dispatch Tests
// =============================================================================

/// Model listeners only see their own id on the shared team channel.
#[tokio::test(start_paused = true)]
async fn test_team_channel_events_self_filter() {
    let (_api, transport, manager) = setup();
    subscribe_ids(&manager, &[1]).await;

    let (hits, listener) = counting_listener();
    assert!(manager.on_model_event(ModelListenerKey::new("Post", 1i64, &["updated"], "card"), listener));

    transport.emit("private-Post.t1", &EventEnvelope::new("updated", json!({"id": 1})));
    transport.emit("private-Post.t1", &EventEnvelope::new("updated", json!({"id": 2})));

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    // Both events were recorded for diagnostics
    assert_eq!(manager.channels().recent_events().len(), 2);
    assert_eq!(manager.metrics().events_received, 2);
}

/// Dispose resolves queued callers and tears everything down.
#[tokio::test(start_paused = true)]
async fn test_dispose_resolves_queued_callers() {
    let (api, transport, manager) = setup();
    manager.subscribe_to_model("Post", &["updated"], &json!(true)).await.unwrap();

    let pending = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.subscribe_to_model("Post", &["updated"], &json!(1)).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    manager.dispose();

    assert!(!pending.await.unwrap().unwrap());
    assert!(manager.is_empty());
    assert!(!manager.is_keepalive_running());
    assert!(transport.channel_names().is_empty());

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(api.registrations().len(), 1);
    assert!(api.renewals().is_empty());
}
