//! # Subscription API
//!
//! Network API used to register, renew and drop subscriptions on the
//! server. Persistence of subscription expiry lives behind this trait.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;

use super::errors::{SubscriptionError, SubscriptionResult};
use crate::protocol::{
    RegisterRequest, RegisterResponse, RegisteredSubscription, RenewRequest, RenewResponse, RenewalStatus,
    UnsubscribeRequest,
};

/// Boxed future returned by API calls
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = SubscriptionResult<T>> + Send + 'a>>;

/// Server endpoints for subscription bookkeeping
pub trait SubscriptionApi: Send + Sync {
    /// Register one subscription
    fn register(&self, request: RegisterRequest) -> ApiFuture<'_, RegisterResponse>;

    /// Renew many backend subscription ids in one call
    fn renew(&self, request: RenewRequest) -> ApiFuture<'_, RenewResponse>;

    /// Drop a subscription by scope
    fn unsubscribe(&self, request: UnsubscribeRequest) -> ApiFuture<'_, ()>;
}

/// A call observed by [`RecordingApi`]
#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    Register(RegisterRequest),
    Renew(RenewRequest),
    Unsubscribe(UnsubscribeRequest),
}

type RegisterPredicate = Arc<dyn Fn(&RegisterRequest) -> bool + Send + Sync>;

/// In-memory API that records every call, for tests and local development.
///
/// Registrations and renewals succeed with `now + ttl` unless a failure
/// has been configured.
pub struct RecordingApi {
    calls: Mutex<Vec<ApiCall>>,
    ttl: chrono::Duration,
    latency: Mutex<Option<Duration>>,
    register_failure: Mutex<Option<RegisterPredicate>>,
    renewal_failures: Mutex<HashSet<String>>,
    fail_renew_calls: AtomicBool,
    fail_unsubscribe_calls: AtomicBool,
}

impl Default for RecordingApi {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingApi {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            ttl: chrono::Duration::minutes(10),
            latency: Mutex::new(None),
            register_failure: Mutex::new(None),
            renewal_failures: Mutex::new(HashSet::new()),
            fail_renew_calls: AtomicBool::new(false),
            fail_unsubscribe_calls: AtomicBool::new(false),
        }
    }

    /// Delay every response by `latency`
    pub fn set_latency(&self, latency: Duration) {
        if let Ok(mut slot) = self.latency.lock() {
            *slot = Some(latency);
        }
    }

    /// Fail registrations for which `predicate` returns true
    pub fn fail_registrations_where<F>(&self, predicate: F)
    where
        F: Fn(&RegisterRequest) -> bool + Send + Sync + 'static,
    {
        if let Ok(mut slot) = self.register_failure.lock() {
            *slot = Some(Arc::new(predicate));
        }
    }

    /// Report `subscription_id` as failed in renewal responses
    pub fn fail_renewal_for(&self, subscription_id: &str) {
        if let Ok(mut ids) = self.renewal_failures.lock() {
            ids.insert(subscription_id.to_string());
        }
    }

    /// Fail whole renewal calls
    pub fn fail_renew_calls(&self, fail: bool) {
        self.fail_renew_calls.store(fail, Ordering::SeqCst);
    }

    /// Fail unsubscribe calls
    pub fn fail_unsubscribe_calls(&self, fail: bool) {
        self.fail_unsubscribe_calls.store(fail, Ordering::SeqCst);
    }

    /// Every call in arrival order
    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn registrations(&self) -> Vec<RegisterRequest> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ApiCall::Register(req) => Some(req),
                _ => None,
            })
            .collect()
    }

    pub fn renewals(&self) -> Vec<RenewRequest> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ApiCall::Renew(req) => Some(req),
                _ => None,
            })
            .collect()
    }

    pub fn unsubscribes(&self) -> Vec<UnsubscribeRequest> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ApiCall::Unsubscribe(req) => Some(req),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }

    fn record(&self, call: ApiCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    async fn simulate_latency(&self) {
        let latency = self.latency.lock().ok().and_then(|slot| *slot);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl SubscriptionApi for RecordingApi {
    fn register(&self, request: RegisterRequest) -> ApiFuture<'_, RegisterResponse> {
        Box::pin(async move {
            self.record(ApiCall::Register(request.clone()));
            self.simulate_latency().await;

            let should_fail = self
                .register_failure
                .lock()
                .ok()
                .and_then(|slot| slot.clone())
                .map(|predicate| predicate(&request))
                .unwrap_or(false);
            if should_fail {
                return Err(SubscriptionError::RegistrationFailed(format!(
                    "rejected {}",
                    request.subscription_id
                )));
            }

            Ok(RegisterResponse {
                subscription: RegisteredSubscription {
                    expires_at: Some(Utc::now() + self.ttl),
                    cache_key: format!("subscribe:{}:{}", request.resource_type, request.subscription_id),
                },
            })
        })
    }

    fn renew(&self, request: RenewRequest) -> ApiFuture<'_, RenewResponse> {
        Box::pin(async move {
            self.record(ApiCall::Renew(request.clone()));
            self.simulate_latency().await;

            if self.fail_renew_calls.load(Ordering::SeqCst) {
                return Err(SubscriptionError::RenewalFailed("renewal endpoint unavailable".into()));
            }

            let failures = self.renewal_failures.lock().map(|f| f.clone()).unwrap_or_default();
            let expires_at = Utc::now() + self.ttl;
            let mut response = RenewResponse::default();
            for id in request.subscription_ids {
                let status = if failures.contains(&id) {
                    RenewalStatus {
                        success: false,
                        expires_at: None,
                    }
                } else {
                    RenewalStatus {
                        success: true,
                        expires_at: Some(expires_at),
                    }
                };
                response.subscriptions.insert(id, status);
            }
            Ok(response)
        })
    }

    fn unsubscribe(&self, request: UnsubscribeRequest) -> ApiFuture<'_, ()> {
        Box::pin(async move {
            self.record(ApiCall::Unsubscribe(request));
            self.simulate_latency().await;

            if self.fail_unsubscribe_calls.load(Ordering::SeqCst) {
                return Err(SubscriptionError::UnsubscribeFailed("unsubscribe endpoint unavailable".into()));
            }
            Ok(())
        })
    }
}
