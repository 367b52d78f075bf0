//! # Keepalive Service
//!
//! Periodic renewal of backend subscription ids.
//!
//! The service owns only the interval task and its [`KeepaliveState`]; the
//! renewal itself is supplied by the manager as a tick callback. State
//! exists only while the service runs.
//!
//! Renewal outcomes are applied by [`apply_renewal`]:
//!
//! - success: `expires_at` updated on every subscription sharing the id
//! - failure: every subscription sharing the id is dropped, no retry
//! - id absent from the response: left untouched
//!
//! A failed renewal call changes nothing and waits for the next tick.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::store::{Subscription, SubscriptionStore};
use crate::protocol::RenewResponse;

/// Renewal bookkeeping, present while keepalive runs
#[derive(Debug, Clone, PartialEq)]
pub struct KeepaliveState {
    pub last_renewal_at: Option<DateTime<Utc>>,
    pub next_renewal_at: DateTime<Utc>,
    pub renewal_count: u64,
    pub last_success: Option<bool>,
    pub last_error: Option<String>,
}

/// Interval task driving renewals
#[derive(Debug)]
pub struct KeepaliveService {
    interval: Duration,
    state: Mutex<Option<KeepaliveState>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl KeepaliveService {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            state: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start ticking every interval, first tick one interval from now.
    ///
    /// No-op while already running. The loop ends when `tick` returns false.
    pub fn start<F, Fut>(&self, tick: F) -> bool
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let mut task = match self.task.lock() {
            Ok(task) => task,
            Err(_) => return false,
        };
        if task.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            return false;
        }

        if let Ok(mut state) = self.state.lock() {
            *state = Some(KeepaliveState {
                last_renewal_at: None,
                next_renewal_at: Utc::now() + to_chrono(self.interval),
                renewal_count: 0,
                last_success: None,
                last_error: None,
            });
        }

        let period = self.interval;
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !tick().await {
                    break;
                }
            }
        }));
        true
    }

    /// Stop ticking and drop the state. Returns whether it was running.
    pub fn stop(&self) -> bool {
        let handle = self.task.lock().ok().and_then(|mut task| task.take());
        if let Ok(mut state) = self.state.lock() {
            *state = None;
        }
        match handle {
            Some(handle) => {
                let was_running = !handle.is_finished();
                handle.abort();
                was_running
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .map(|task| task.as_ref().map(|h| !h.is_finished()).unwrap_or(false))
            .unwrap_or(false)
    }

    pub fn state(&self) -> Option<KeepaliveState> {
        self.state.lock().ok().and_then(|state| state.clone())
    }

    pub fn record_success(&self) {
        self.record(true, None);
    }

    pub fn record_failure(&self, error: &str) {
        self.record(false, Some(error.to_string()));
    }

    fn record(&self, success: bool, error: Option<String>) {
        let now = Utc::now();
        if let Ok(mut state) = self.state.lock() {
            if let Some(state) = state.as_mut() {
                state.last_renewal_at = Some(now);
                state.next_renewal_at = now + to_chrono(self.interval);
                state.renewal_count += 1;
                state.last_success = Some(success);
                state.last_error = error;
            }
        }
    }
}

impl Drop for KeepaliveService {
    fn drop(&mut self) {
        if let Ok(mut task) = self.task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero())
}

/// Effect of one renewal response on the store
#[derive(Debug, Default)]
pub struct RenewalOutcome {
    /// Backend ids renewed
    pub renewed: usize,
    /// Subscriptions dropped because their backend id was not renewed
    pub expired: Vec<Subscription>,
    /// Requested ids the response did not mention
    pub missing: Vec<String>,
}

/// Apply a renewal response for `ids` to the store
pub fn apply_renewal(store: &mut SubscriptionStore, ids: &[String], response: &RenewResponse) -> RenewalOutcome {
    let mut outcome = RenewalOutcome::default();
    for id in ids {
        match response.subscriptions.get(id) {
            Some(status) if status.success => {
                store.apply_expiry(id, status.expires_at);
                outcome.renewed += 1;
            }
            Some(_) => outcome.expired.extend(store.expire_backend(id)),
            None => outcome.missing.push(id.clone()),
        }
    }
    outcome
}
