//! Broadcast Resolver Invariant Tests
//!
//! Server-side guarantees:
//! - A record without a team never resolves subscribers
//! - Subscribers are the union of all, id and matching filter lists
//! - Client scope keys and server filter keys hash filters identically
//! - Filter lists are found by scan or, failing that, by the key index
//! - A failed scan or filter never fails the broadcast

use std::sync::Arc;

use aerolive::broadcast::{
    BroadcastTargetResolver, CacheStore, ChangeBroadcaster, FilterEvaluator, MemoryCache, RecordSetEvaluator,
    SubscriberSets,
};
use aerolive::config::LiveConfig;
use aerolive::protocol::{canonical_scope_key, EventKind, ModelId, Scope, SubscriberKeys};
use aerolive::transport::{EventPublisher, LocalTransport};
use serde_json::{json, Value};

// =============================================================================
// Helper Functions
// =============================================================================

struct Fixture {
    cache: Arc<MemoryCache>,
    records: Arc<RecordSetEvaluator>,
    sets: SubscriberSets,
    resolver: BroadcastTargetResolver,
}

fn setup_with_cache(cache: MemoryCache) -> Fixture {
    let config = LiveConfig::default();
    let cache = Arc::new(cache);
    let records = Arc::new(RecordSetEvaluator::new());
    let resolver = BroadcastTargetResolver::new(
        &config,
        Arc::clone(&cache) as Arc<dyn CacheStore>,
        Arc::clone(&records) as Arc<dyn FilterEvaluator>,
    );
    let sets = SubscriberSets::new(Arc::clone(&cache) as Arc<dyn CacheStore>, &config.cache_prefix);
    Fixture {
        cache,
        records,
        sets,
        resolver,
    }
}

fn setup() -> Fixture {
    setup_with_cache(MemoryCache::new())
}

fn filter(value: Value) -> Scope {
    Scope::from_value(&value).unwrap()
}

fn users(fixture: &Fixture, team: Option<&str>, id: i64) -> Vec<String> {
    fixture.resolver.get_subscribed_users("Foo", team, &ModelId::Int(id))
}

// =============================================================================
// Gate Tests
// =============================================================================

/// Without a team the resolver returns nothing, whatever is subscribed.
#[test]
fn test_no_team_resolves_nobody() {
    let fixture = setup();
    fixture.sets.subscribe("Foo", "9", &Scope::All, "u1").unwrap();

    assert!(users(&fixture, None, 5).is_empty());
    assert!(fixture
        .resolver
        .get_subscribed_channels("Foo", None, &["u1".to_string()])
        .is_empty());
}

/// All, id and matching filter subscribers are merged without duplicates.
#[test]
fn test_union_of_subscriber_lists() {
    let fixture = setup();
    fixture.records.put_record("Foo", json!({"id": 5, "status": "open"})).unwrap();
    fixture.sets.subscribe("Foo", "9", &Scope::All, "u1").unwrap();
    fixture.sets.subscribe("Foo", "9", &Scope::Id(ModelId::Int(5)), "u2").unwrap();
    fixture.sets.subscribe("Foo", "9", &Scope::Id(ModelId::Int(5)), "u1").unwrap();
    fixture.sets.subscribe("Foo", "9", &filter(json!({"status": "open"})), "u3").unwrap();
    fixture.sets.subscribe("Foo", "9", &filter(json!({"status": "closed"})), "u4").unwrap();

    assert_eq!(users(&fixture, Some("9"), 5), vec!["u1", "u2", "u3"]);
}

/// A batched id filter matches every id it lists.
#[test]
fn test_merged_id_filter_matches_members() {
    let fixture = setup();
    for id in [1, 2, 3] {
        fixture.records.put_record("Foo", json!({"id": id})).unwrap();
    }
    fixture.sets.subscribe("Foo", "9", &filter(json!({"id": [1, 2]})), "u1").unwrap();

    assert_eq!(users(&fixture, Some("9"), 2), vec!["u1"]);
    assert!(users(&fixture, Some("9"), 3).is_empty());
}

/// Subscribers of another team are never included.
#[test]
fn test_teams_are_isolated() {
    let fixture = setup();
    fixture.sets.subscribe("Foo", "8", &Scope::All, "u1").unwrap();

    assert!(users(&fixture, Some("9"), 5).is_empty());
    assert_eq!(users(&fixture, Some("8"), 5), vec!["u1"]);
}

// =============================================================================
// Key Hashing Tests
// =============================================================================

/// Key order never changes the filter hash on either side.
#[test]
fn test_client_and_server_hash_filters_identically() {
    let left = filter(json!({"status": "open", "owner": {"id": 3, "kind": "user"}}));
    let right = filter(json!({"owner": {"kind": "user", "id": 3}, "status": "open"}));

    let client_key = canonical_scope_key("Foo", &left);
    let server_key = SubscriberKeys::new("subscribe:", "Foo", "9").for_scope(&right);

    let client_hash = client_key.rsplit(':').next().unwrap();
    let server_hash = server_key.rsplit(':').next().unwrap();
    assert_eq!(client_hash, server_hash);
    assert_eq!(client_hash.len(), 64);
}

/// Both spellings of a filter land in the same subscriber list.
#[test]
fn test_equivalent_filters_share_list() {
    let fixture = setup();
    let first = fixture
        .sets
        .subscribe("Foo", "9", &filter(json!({"a": 1, "b": 2})), "u1")
        .unwrap();
    let second = fixture
        .sets
        .subscribe("Foo", "9", &filter(json!({"b": 2, "a": 1})), "u2")
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(fixture.sets.members(&first).unwrap(), vec!["u1", "u2"]);
}

// =============================================================================
// Scan Tests
// =============================================================================

/// The glob fallback finds filter lists when the store cannot scan.
#[test]
fn test_glob_fallback_without_scan() {
    let fixture = setup_with_cache(MemoryCache::without_scan());
    fixture.sets.subscribe("Foo", "9", &filter(json!({"a": 1})), "u1").unwrap();
    fixture.sets.subscribe("Foo", "9", &filter(json!({"a": 2})), "u2").unwrap();
    fixture.sets.subscribe("Bar", "9", &filter(json!({"a": 1})), "u3").unwrap();

    let keys = fixture.resolver.scan_cache_keys("subscribe:Foo:9:filter:*");

    assert_eq!(keys.iter().filter(|k| !k.ends_with(":definition")).count(), 2);
    assert!(keys.iter().all(|k| k.starts_with("subscribe:Foo:9:filter:")));
}

/// The store's global prefix never leaks into returned keys.
#[test]
fn test_scan_strips_store_prefix() {
    let fixture = setup_with_cache(MemoryCache::with_options("app_cache:", true));
    let key = fixture.sets.subscribe("Foo", "9", &filter(json!({"a": 1})), "u1").unwrap();

    let keys = fixture.resolver.scan_cache_keys("subscribe:Foo:9:filter:*");

    assert!(keys.contains(&key));
    assert!(keys.iter().all(|k| !k.starts_with("app_cache:")));
}

/// A failed scan still returns all and id subscribers.
#[test]
fn test_scan_failure_degrades_to_direct_lists() {
    let fixture = setup();
    fixture.records.put_record("Foo", json!({"id": 5, "a": 1})).unwrap();
    fixture.sets.subscribe("Foo", "9", &Scope::All, "u1").unwrap();
    fixture.sets.subscribe("Foo", "9", &filter(json!({"a": 1})), "u2").unwrap();
    fixture.cache.fail_scans(true);

    assert_eq!(users(&fixture, Some("9"), 5), vec!["u1"]);
    assert_eq!(fixture.resolver.metrics().snapshot().scan_failures, 1);
}

/// An unknown operator skips only that filter.
#[test]
fn test_bad_filter_is_skipped() {
    let fixture = setup();
    fixture.records.put_record("Foo", json!({"id": 5, "a": 1})).unwrap();
    fixture.sets.subscribe("Foo", "9", &filter(json!({"a": {"regex": "x"}})), "u1").unwrap();
    fixture.sets.subscribe("Foo", "9", &filter(json!({"a": {"gte": 1}})), "u2").unwrap();

    assert_eq!(users(&fixture, Some("9"), 5), vec!["u2"]);
    assert_eq!(fixture.resolver.metrics().snapshot().filter_evaluation_failures, 1);
}

// =============================================================================
// Publish Tests
// =============================================================================

/// A record nobody listens to is not published.
#[test]
fn test_unwatched_record_is_not_published() {
    let fixture = setup();
    let transport = Arc::new(LocalTransport::new());
    let broadcaster = ChangeBroadcaster::new(
        Arc::new(fixture.resolver),
        Arc::clone(&transport) as Arc<dyn EventPublisher>,
    );

    let outcome = broadcaster
        .broadcast("Foo", Some("9"), &EventKind::Updated, &json!({"id": 5}))
        .unwrap();

    assert!(!outcome.is_published());
    assert_eq!(broadcaster.resolver().metrics().snapshot().broadcasts_published, 0);
}
