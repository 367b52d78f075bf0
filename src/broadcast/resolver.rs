//! # Broadcast Target Resolver
//!
//! Decides, for one changed record, whether anyone is listening.
//!
//! Subscribed users are the union, in first-seen order, of:
//!
//! 1. channel-wide subscribers (`{type}:{team}:all`)
//! 2. subscribers of this id (`{type}:{team}:id:{id}`)
//! 3. subscribers of every filter that matches this record now
//!
//! Filter lists are found by scanning `{type}:{team}:filter:*`, or through
//! the key index when the store cannot scan. A filter that fails to
//! evaluate is logged and skipped. A failed scan counts as no filter
//! subscribers this round.
//!
//! The resulting user list is a publish gate. Delivery always goes to the
//! one shared team channel and clients filter for themselves.

use std::collections::HashSet;
use std::sync::Arc;

use super::cache::CacheStore;
use super::errors::BroadcastResult;
use super::filter::FilterEvaluator;
use super::glob::GlobPattern;
use super::subscribers::SubscriberSets;
use crate::config::LiveConfig;
use crate::observability::{log_event_with_fields, Event, LiveMetrics};
use crate::protocol::{is_definition_key, ModelId, SubscriberKeys};

/// Resolves subscribers and channels for changed records
pub struct BroadcastTargetResolver {
    sets: SubscriberSets,
    evaluator: Arc<dyn FilterEvaluator>,
    channel_prefix: String,
    scan_page_size: usize,
    metrics: Arc<LiveMetrics>,
}

impl BroadcastTargetResolver {
    pub fn new(config: &LiveConfig, cache: Arc<dyn CacheStore>, evaluator: Arc<dyn FilterEvaluator>) -> Self {
        Self::with_metrics(config, cache, evaluator, Arc::new(LiveMetrics::new()))
    }

    pub fn with_metrics(
        config: &LiveConfig,
        cache: Arc<dyn CacheStore>,
        evaluator: Arc<dyn FilterEvaluator>,
        metrics: Arc<LiveMetrics>,
    ) -> Self {
        Self {
            sets: SubscriberSets::new(cache, &config.cache_prefix),
            evaluator,
            channel_prefix: config.channel_prefix.clone(),
            scan_page_size: config.scan_page_size,
            metrics,
        }
    }

    pub fn metrics(&self) -> &Arc<LiveMetrics> {
        &self.metrics
    }

    /// Users subscribed to record `model_id`. Empty without a team.
    pub fn get_subscribed_users(&self, resource_type: &str, team_id: Option<&str>, model_id: &ModelId) -> Vec<String> {
        let Some(team_id) = team_id else {
            return Vec::new();
        };
        let keys = SubscriberKeys::new(self.sets.prefix(), resource_type, team_id);

        let mut seen = HashSet::new();
        let mut users = Vec::new();
        let mut add = |members: Vec<String>| {
            for member in members {
                if seen.insert(member.clone()) {
                    users.push(member);
                }
            }
        };

        add(self.read_members(&keys.all()));
        add(self.read_members(&keys.id(model_id)));

        for key in self.scan_cache_keys(&keys.filter_pattern()) {
            if is_definition_key(&key) {
                continue;
            }
            if self.filter_matches(resource_type, &key, model_id) {
                add(self.read_members(&key));
            }
        }

        self.metrics.increment_broadcasts_resolved();
        log_event_with_fields(
            Event::BroadcastResolved,
            &[
                ("model_id", &model_id.to_string()),
                ("resource_type", resource_type),
                ("team_id", team_id),
                ("users", &users.len().to_string()),
            ],
        );
        users
    }

    /// Channels to publish on: the one team channel, or none when there is
    /// no team or nobody listens
    pub fn get_subscribed_channels(&self, resource_type: &str, team_id: Option<&str>, user_ids: &[String]) -> Vec<String> {
        match team_id {
            Some(team_id) if !user_ids.is_empty() => {
                vec![format!("{}{}.{}", self.channel_prefix, resource_type, team_id)]
            }
            _ => Vec::new(),
        }
    }

    /// Logical cache keys matching a glob pattern.
    ///
    /// Scans page by page when the store supports it, stripping the store's
    /// global prefix; otherwise filters the key index.
    pub fn scan_cache_keys(&self, pattern: &str) -> Vec<String> {
        let cache = self.sets.cache();
        let result = if cache.supports_scan() {
            self.scan_store(cache.as_ref(), pattern)
        } else {
            self.scan_index(pattern)
        };

        match result {
            Ok(keys) => keys,
            Err(err) => {
                self.metrics.increment_scan_failures();
                log_event_with_fields(Event::CacheScanFailed, &[("error", &err.to_string()), ("pattern", pattern)]);
                Vec::new()
            }
        }
    }

    fn scan_store(&self, cache: &dyn CacheStore, pattern: &str) -> BroadcastResult<Vec<String>> {
        let prefix = cache.key_prefix();
        let physical = format!("{}{}", prefix, pattern);

        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        let mut cursor = 0;
        loop {
            let (next, page) = cache.scan(cursor, &physical, self.scan_page_size)?;
            for key in page {
                let logical = key.strip_prefix(prefix).unwrap_or(key.as_str()).to_string();
                if seen.insert(logical.clone()) {
                    keys.push(logical);
                }
            }
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(keys)
    }

    fn scan_index(&self, pattern: &str) -> BroadcastResult<Vec<String>> {
        let glob = GlobPattern::new(pattern)?;
        Ok(self
            .sets
            .index_keys()?
            .into_iter()
            .filter(|key| glob.matches(key))
            .collect())
    }

    fn read_members(&self, key: &str) -> Vec<String> {
        match self.sets.members(key) {
            Ok(members) => members,
            Err(err) => {
                log_event_with_fields(Event::CacheScanFailed, &[("error", &err.to_string()), ("key", key)]);
                Vec::new()
            }
        }
    }

    fn filter_matches(&self, resource_type: &str, key: &str, model_id: &ModelId) -> bool {
        let result = self.sets.definition(key).and_then(|definition| match definition {
            Some(filter) => self.evaluator.matches(resource_type, &filter, model_id),
            None => Ok(false),
        });

        match result {
            Ok(matched) => matched,
            Err(err) => {
                self.metrics.increment_filter_evaluation_failures();
                log_event_with_fields(
                    Event::FilterEvaluationFailed,
                    &[("error", &err.to_string()), ("key", key), ("model_id", &model_id.to_string())],
                );
                false
            }
        }
    }
}
