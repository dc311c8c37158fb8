// Result cache: bounded, TTL-expiring store keyed by normalized request parameters

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{Arc, Weak},
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::models::Endpoint;

// Query parameter carrying the API credential; never part of a cache key
pub const CREDENTIAL_FIELD: &str = "access_key";

// Cache configuration options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_seconds: u64,
    pub max_entries: usize,
    pub cleanup_interval_seconds: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: 300,
            max_entries: 100,
            cleanup_interval_seconds: None,
        }
    }
}

/// Parameters of one upstream request, tagged with the endpoint they target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestParams {
    pub endpoint: Endpoint,
    pub fields: BTreeMap<String, String>,
}

impl RequestParams {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.fields.insert(key.into(), value.to_string());
        self
    }

    pub fn from_pairs<K, V, I>(endpoint: Endpoint, pairs: I) -> Self
    where
        K: Into<String>,
        V: ToString,
        I: IntoIterator<Item = (K, V)>,
    {
        pairs
            .into_iter()
            .fold(Self::new(endpoint), |params, (k, v)| params.with(k, v))
    }

    // Fields sent upstream, in key order
    pub fn query(&self) -> Vec<(String, String)> {
        self.fields
            .iter()
            .filter(|(k, _)| k.as_str() != CREDENTIAL_FIELD)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn cache_key(&self) -> CacheKey {
        let mut key = format!("endpoint:{}", self.endpoint);
        // BTreeMap iteration is already sorted lexicographically by key
        for (k, v) in self.fields.iter().filter(|(k, _)| k.as_str() != CREDENTIAL_FIELD) {
            key.push('|');
            push_escaped(&mut key, k);
            key.push(':');
            push_escaped(&mut key, v);
        }
        CacheKey(key)
    }
}

// Separators inside keys and values are backslash-escaped so distinct
// parameter sets never render to the same key.
fn push_escaped(out: &mut String, part: &str) {
    for ch in part.chars() {
        if matches!(ch, '\\' | '|' | ':') {
            out.push('\\');
        }
        out.push(ch);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source of the current instant, injectable for tests.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[cfg(test)]
#[derive(Debug)]
pub(crate) struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

#[cfg(test)]
impl ManualClock {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        })
    }

    pub(crate) fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }
}

/// Empty payloads are never cached so that a transient "no data" answer is re-fetched.
pub fn is_empty_payload(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => match map.get("data") {
            Some(Value::Array(items)) => items.is_empty(),
            // A successful envelope without records unwraps to an empty list
            Some(Value::Null) | None => {
                map.is_empty() || map.get("success") == Some(&Value::Bool(true))
            }
            Some(_) => false,
        },
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    inserted_at: Instant,
    // Tie-breaker for entries inserted at the same instant
    sequence: u64,
    key: CacheKey,
    source_params: RequestParams,
}

#[derive(Debug, Clone)]
pub struct CacheEntryInfo {
    pub key: String,
    pub endpoint: Endpoint,
    pub age: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub ttl: Duration,
    pub entries: Vec<CacheEntryInfo>,
    pub hit_count: usize,
    pub miss_count: usize,
    pub eviction_count: usize,
    pub expired_count: usize,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    next_sequence: u64,
    hit_count: usize,
    miss_count: usize,
    eviction_count: usize,
    expired_count: usize,
}

pub struct ResultCache {
    state: Mutex<CacheState>,
    ttl: Duration,
    max_entries: usize,
    clock: Arc<dyn Clock>,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCache")
            .field("size", &self.len())
            .field("max_entries", &self.max_entries)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl ResultCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self::with_clock(ttl, max_entries, Arc::new(SystemClock))
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(Duration::from_secs(config.ttl_seconds), config.max_entries)
    }

    pub fn with_clock(ttl: Duration, max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            ttl,
            // A zero capacity would make every insert evict itself
            max_entries: max_entries.max(1),
            clock,
            cleanup_task: Mutex::new(None),
        }
    }

    fn is_expired(&self, entry: &CacheEntry, now: Instant) -> bool {
        now.saturating_duration_since(entry.inserted_at) > self.ttl
    }

    pub fn get(&self, params: &RequestParams) -> Option<Value> {
        let key = params.cache_key();
        let now = self.clock.now();
        let mut state = self.state.lock();

        let expired = state.entries.get(&key).map(|entry| self.is_expired(entry, now));

        if expired.is_none() {
            state.miss_count += 1;
            trace!(key = %key, "cache miss");
            return None;
        }

        if expired == Some(true) {
            state.entries.remove(&key);
            state.expired_count += 1;
            state.miss_count += 1;
            debug!(key = %key, "cache entry expired");
            return None;
        }

        state.hit_count += 1;
        trace!(key = %key, "cache hit");
        state.entries.get(&key).map(|entry| entry.value.clone())
    }

    /// Looks up a live entry without touching the hit/miss counters.
    pub fn peek(&self, params: &RequestParams) -> Option<Value> {
        let key = params.cache_key();
        let now = self.clock.now();
        let state = self.state.lock();
        state
            .entries
            .get(&key)
            .filter(|entry| !self.is_expired(entry, now))
            .map(|entry| entry.value.clone())
    }

    /// Stores `value` under the key for `params`. Returns `false` when the
    /// payload is empty and therefore not cached.
    pub fn set(&self, params: &RequestParams, value: Value) -> bool {
        if is_empty_payload(&value) {
            debug!(endpoint = %params.endpoint, "not caching empty payload");
            return false;
        }

        let key = params.cache_key();
        let now = self.clock.now();
        let mut state = self.state.lock();

        if !state.entries.contains_key(&key) && state.entries.len() >= self.max_entries {
            let oldest = state
                .entries
                .values()
                .min_by_key(|entry| (entry.inserted_at, entry.sequence))
                .map(|entry| entry.key.clone());

            if let Some(oldest) = oldest {
                state.entries.remove(&oldest);
                state.eviction_count += 1;
                debug!(evicted = %oldest, "cache at capacity, evicted oldest entry");
            }
        }

        let sequence = state.next_sequence;
        state.next_sequence += 1;

        state.entries.insert(
            key.clone(),
            CacheEntry {
                value,
                inserted_at: now,
                sequence,
                key,
                source_params: params.clone(),
            },
        );

        true
    }

    pub fn invalidate(&self, params: &RequestParams) -> bool {
        let key = params.cache_key();
        let removed = self.state.lock().entries.remove(&key).is_some();
        if removed {
            debug!(key = %key, "cache entry invalidated");
        }
        removed
    }

    /// Removes every expired entry and returns how many were purged.
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let before = state.entries.len();

        state.entries.retain(|_, entry| now.saturating_duration_since(entry.inserted_at) <= self.ttl);

        let removed = before - state.entries.len();
        state.expired_count += removed;
        removed
    }

    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now();
        let state = self.state.lock();

        let mut entries: Vec<CacheEntryInfo> = state
            .entries
            .values()
            .map(|entry| CacheEntryInfo {
                key: entry.key.to_string(),
                endpoint: entry.source_params.endpoint,
                age: now.saturating_duration_since(entry.inserted_at),
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        CacheStats {
            size: state.entries.len(),
            max_size: self.max_entries,
            ttl: self.ttl,
            entries,
            hit_count: state.hit_count,
            miss_count: state.miss_count,
            eviction_count: state.eviction_count,
            expired_count: state.expired_count,
        }
    }

    /// Starts a background sweep every `interval`. Replaces any running sweep.
    /// The task stops on its own once the cache is dropped.
    pub fn spawn_cleanup(self: &Arc<Self>, interval: Duration) {
        let weak: Weak<Self> = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else {
                    break;
                };
                let removed = cache.cleanup();
                if removed > 0 {
                    debug!(removed, "periodic cache cleanup");
                }
            }
        });

        if let Some(previous) = self.cleanup_task.lock().replace(handle) {
            previous.abort();
        }
    }

    pub fn stop_cleanup(&self) {
        if let Some(handle) = self.cleanup_task.lock().take() {
            handle.abort();
        }
    }

    /// Clears all entries and stops the periodic sweep.
    pub fn destroy(&self) {
        self.stop_cleanup();
        self.clear();
    }
}

impl Drop for ResultCache {
    fn drop(&mut self) {
        self.stop_cleanup();
    }
}
