//! # Subscription Batch Queue
//!
//! Coalesces id subscriptions arriving within one debounce window into a
//! single merged registration.
//!
//! Each batch moves through `Collecting → Flushing → Done`:
//!
//! - **Collecting**: held in the queue under its batch key; every addition
//!   resets the debounce timer, so a steady stream never flushes mid-burst
//! - **Flushing**: taken out of the queue the moment its timer fires, before
//!   the network call starts; later additions for the same key open a fresh
//!   batch instead of joining the one in flight
//! - **Done**: every caller's completion has been resolved
//!
//! Callers each hold their own completion, so one shared flush still
//! reports per-id outcomes.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tokio::sync::oneshot;

use super::timer::DebounceTimer;
use crate::protocol::{batch_key, ModelId};

/// Lifecycle of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPhase {
    Collecting,
    Flushing,
    Done,
}

/// One caller's id subscription waiting in a batch
#[derive(Debug)]
pub struct BatchItem {
    pub subscription_id: String,
    pub model_id: ModelId,
    pub scope_key: String,
    completion: Option<oneshot::Sender<bool>>,
}

impl BatchItem {
    /// Create an item and the receiver its caller awaits
    pub fn new(
        subscription_id: String,
        model_id: ModelId,
        scope_key: String,
    ) -> (Self, oneshot::Receiver<bool>) {
        let (tx, rx) = oneshot::channel();
        let item = Self {
            subscription_id,
            model_id,
            scope_key,
            completion: Some(tx),
        };
        (item, rx)
    }

    /// Resolve the caller's completion. Later calls are ignored.
    pub fn complete(&mut self, subscribed: bool) {
        if let Some(tx) = self.completion.take() {
            // Receiver dropped means the caller stopped waiting
            let _ = tx.send(subscribed);
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completion.is_none()
    }
}

/// Id subscriptions sharing one (resource type, event set)
#[derive(Debug)]
pub struct SubscriptionBatch {
    pub key: String,
    pub resource_type: String,
    pub events: Vec<String>,
    items: Vec<BatchItem>,
    phase: BatchPhase,
    timer: Option<DebounceTimer>,
}

impl SubscriptionBatch {
    fn new(key: String, resource_type: &str, events: &[String]) -> Self {
        Self {
            key,
            resource_type: resource_type.to_string(),
            events: events.to_vec(),
            items: Vec::new(),
            phase: BatchPhase::Collecting,
            timer: None,
        }
    }

    pub fn phase(&self) -> BatchPhase {
        self.phase
    }

    /// Ids in arrival order
    pub fn model_ids(&self) -> Vec<ModelId> {
        self.items.iter().map(|item| item.model_id.clone()).collect()
    }

    pub fn items(&self) -> &[BatchItem] {
        &self.items
    }

    pub fn items_mut(&mut self) -> &mut [BatchItem] {
        &mut self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Hand the items over for individual processing; the batch is done
    pub fn take_items(&mut self) -> Vec<BatchItem> {
        self.phase = BatchPhase::Done;
        std::mem::take(&mut self.items)
    }

    /// Resolve any completion not yet resolved and mark the batch done
    pub fn finish(&mut self, subscribed: bool) {
        for item in &mut self.items {
            item.complete(subscribed);
        }
        self.phase = BatchPhase::Done;
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }
}

/// Collecting batches keyed by batch key
#[derive(Debug, Default)]
pub struct BatchQueue {
    batches: HashMap<String, SubscriptionBatch>,
}

impl BatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an item to the batch for (resource type, events), creating the
    /// batch and arming its timer on first use. Every addition resets the
    /// timer. `on_fire` receives the batch key and is only used when a new
    /// batch is created.
    ///
    /// Returns the batch key.
    pub fn add<F, Fut>(
        &mut self,
        resource_type: &str,
        events: &[String],
        item: BatchItem,
        debounce: Duration,
        on_fire: F,
    ) -> String
    where
        F: FnOnce(String) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let key = batch_key(resource_type, events);

        let batch = self
            .batches
            .entry(key.clone())
            .or_insert_with(|| SubscriptionBatch::new(key.clone(), resource_type, events));
        batch.items.push(item);

        if let Some(timer) = batch.timer.as_ref() {
            timer.reset();
            return key;
        }

        let fire_key = key.clone();
        batch.timer = Some(DebounceTimer::start(debounce, move || on_fire(fire_key)));
        key
    }

    /// Remove a batch for flushing. Any later `add` for the same key starts
    /// a fresh batch.
    pub fn take(&mut self, key: &str) -> Option<SubscriptionBatch> {
        let mut batch = self.batches.remove(key)?;
        // The timer has fired; dropping the handle leaves the running flush alone
        batch.timer = None;
        batch.phase = BatchPhase::Flushing;
        Some(batch)
    }

    /// Withdraw a collecting item by scope key, resolving its caller with
    /// `false`. Empty batches are dropped and their timer cancelled.
    pub fn cancel_item(&mut self, scope_key: &str) -> bool {
        let Some(key) = self
            .batches
            .iter()
            .find(|(_, batch)| batch.items.iter().any(|item| item.scope_key == scope_key))
            .map(|(key, _)| key.clone())
        else {
            return false;
        };

        let Some(batch) = self.batches.get_mut(&key) else {
            return false;
        };
        if let Some(pos) = batch.items.iter().position(|item| item.scope_key == scope_key) {
            let mut item = batch.items.remove(pos);
            item.complete(false);
        }

        if batch.items.is_empty() {
            if let Some(mut batch) = self.batches.remove(&key) {
                batch.cancel_timer();
            }
        }
        true
    }

    /// Cancel every collecting batch, resolving all callers with `false`
    pub fn drain(&mut self) -> usize {
        let mut cancelled = 0;
        for (_, mut batch) in self.batches.drain() {
            batch.cancel_timer();
            cancelled += batch.len();
            batch.finish(false);
        }
        cancelled
    }

    pub fn get(&self, key: &str) -> Option<&SubscriptionBatch> {
        self.batches.get(key)
    }

    /// Number of collecting batches
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Number of items across collecting batches
    pub fn pending_items(&self) -> usize {
        self.batches.values().map(SubscriptionBatch::len).sum()
    }
}
