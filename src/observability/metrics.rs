//! Subscription counters
//!
//! - Counters only, monotonic
//! - Reset only when the owning manager or resolver is constructed
//! - Relaxed atomics; eventual consistency is fine for metrics

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Operational counters shared by the client manager and the server resolver
#[derive(Debug, Default)]
pub struct LiveMetrics {
    registrations: AtomicU64,
    batched_registrations: AtomicU64,
    registration_failures: AtomicU64,
    batch_fallbacks: AtomicU64,
    backend_unsubscribes: AtomicU64,
    renewals: AtomicU64,
    renewal_failures: AtomicU64,
    expired_subscriptions: AtomicU64,
    events_received: AtomicU64,
    broadcasts_resolved: AtomicU64,
    broadcasts_published: AtomicU64,
    filter_evaluation_failures: AtomicU64,
    scan_failures: AtomicU64,
}

impl LiveMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_registrations(&self) {
        self.registrations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_batched_registrations(&self) {
        self.batched_registrations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_registration_failures(&self) {
        self.registration_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_batch_fallbacks(&self) {
        self.batch_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_backend_unsubscribes(&self) {
        self.backend_unsubscribes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_renewals(&self) {
        self.renewals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_renewal_failures(&self) {
        self.renewal_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Count local subscriptions dropped because the backend expired them
    pub fn add_expired_subscriptions(&self, count: u64) {
        self.expired_subscriptions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_events_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_broadcasts_resolved(&self) {
        self.broadcasts_resolved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_broadcasts_published(&self) {
        self.broadcasts_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_filter_evaluation_failures(&self) {
        self.filter_evaluation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_scan_failures(&self) {
        self.scan_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get all metrics as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            registrations: self.registrations.load(Ordering::Relaxed),
            batched_registrations: self.batched_registrations.load(Ordering::Relaxed),
            registration_failures: self.registration_failures.load(Ordering::Relaxed),
            batch_fallbacks: self.batch_fallbacks.load(Ordering::Relaxed),
            backend_unsubscribes: self.backend_unsubscribes.load(Ordering::Relaxed),
            renewals: self.renewals.load(Ordering::Relaxed),
            renewal_failures: self.renewal_failures.load(Ordering::Relaxed),
            expired_subscriptions: self.expired_subscriptions.load(Ordering::Relaxed),
            events_received: self.events_received.load(Ordering::Relaxed),
            broadcasts_resolved: self.broadcasts_resolved.load(Ordering::Relaxed),
            broadcasts_published: self.broadcasts_published.load(Ordering::Relaxed),
            filter_evaluation_failures: self.filter_evaluation_failures.load(Ordering::Relaxed),
            scan_failures: self.scan_failures.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of all counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub registrations: u64,
    pub batched_registrations: u64,
    pub registration_failures: u64,
    pub batch_fallbacks: u64,
    pub backend_unsubscribes: u64,
    pub renewals: u64,
    pub renewal_failures: u64,
    pub expired_subscriptions: u64,
    pub events_received: u64,
    pub broadcasts_resolved: u64,
    pub broadcasts_published: u64,
    pub filter_evaluation_failures: u64,
    pub scan_failures: u64,
}
