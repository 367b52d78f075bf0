//! # Cache Store
//!
//! Key/value store holding subscriber sets and filter definitions.
//!
//! Keys passed to `get`/`put`/`delete` are logical keys. Stores may add a
//! global prefix internally; [`CacheStore::scan`] matches and returns the
//! physical keys, prefix included, the way a Redis `SCAN` does.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use serde_json::Value;

use super::errors::{BroadcastError, BroadcastResult};
use super::glob::GlobPattern;

/// Storage behind the subscriber sets
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> BroadcastResult<Option<Value>>;

    fn put(&self, key: &str, value: Value) -> BroadcastResult<()>;

    /// Returns whether the key existed
    fn delete(&self, key: &str) -> BroadcastResult<bool>;

    /// Whether [`scan`](Self::scan) is available
    fn supports_scan(&self) -> bool;

    /// One page of a cursor scan over physical keys matching `pattern`.
    ///
    /// Start with cursor 0; the scan is complete when the returned cursor
    /// is 0 again.
    fn scan(&self, cursor: u64, pattern: &str, count: usize) -> BroadcastResult<(u64, Vec<String>)>;

    /// Global prefix prepended to every physical key
    fn key_prefix(&self) -> &str;
}

/// In-memory [`CacheStore`]
#[derive(Debug)]
pub struct MemoryCache {
    prefix: String,
    scan_enabled: bool,
    fail_scans: AtomicBool,
    entries: RwLock<BTreeMap<String, Value>>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCache {
    /// Scanning store without a global prefix
    pub fn new() -> Self {
        Self::with_options("", true)
    }

    /// Store without scan support, exercising the index fallback
    pub fn without_scan() -> Self {
        Self::with_options("", false)
    }

    pub fn with_options(prefix: &str, scan_enabled: bool) -> Self {
        Self {
            prefix: prefix.to_string(),
            scan_enabled,
            fail_scans: AtomicBool::new(false),
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Make every scan fail
    pub fn fail_scans(&self, fail: bool) {
        self.fail_scans.store(fail, Ordering::SeqCst);
    }

    /// Logical keys currently stored, sorted
    pub fn keys(&self) -> Vec<String> {
        self.entries
            .read()
            .map(|entries| {
                entries
                    .keys()
                    .filter_map(|k| k.strip_prefix(self.prefix.as_str()).map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn physical(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &str) -> BroadcastResult<Option<Value>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| BroadcastError::Internal("Lock poisoned".into()))?;
        Ok(entries.get(&self.physical(key)).cloned())
    }

    fn put(&self, key: &str, value: Value) -> BroadcastResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| BroadcastError::Internal("Lock poisoned".into()))?;
        entries.insert(self.physical(key), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> BroadcastResult<bool> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| BroadcastError::Internal("Lock poisoned".into()))?;
        Ok(entries.remove(&self.physical(key)).is_some())
    }

    fn supports_scan(&self) -> bool {
        self.scan_enabled
    }

    fn scan(&self, cursor: u64, pattern: &str, count: usize) -> BroadcastResult<(u64, Vec<String>)> {
        if !self.scan_enabled {
            return Err(BroadcastError::ScanFailed("scan not supported".into()));
        }
        if self.fail_scans.load(Ordering::SeqCst) {
            return Err(BroadcastError::ScanFailed("connection reset".into()));
        }

        let glob = GlobPattern::new(pattern)?;
        let entries = self
            .entries
            .read()
            .map_err(|_| BroadcastError::Internal("Lock poisoned".into()))?;

        // The cursor is a position in key order; matching is applied per page
        let start = cursor as usize;
        let page = count.max(1);
        let keys: Vec<String> = entries
            .keys()
            .skip(start)
            .take(page)
            .filter(|key| glob.matches(key))
            .cloned()
            .collect();

        let next = start + page;
        let next_cursor = if next >= entries.len() { 0 } else { next as u64 };
        Ok((next_cursor, keys))
    }

    fn key_prefix(&self) -> &str {
        &self.prefix
    }
}
