// In-memory GET response cache with lazy time-to-live eviction.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::Method;
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use crate::config::CACHE_TTL;

struct CacheEntry {
    value: Value,
    stored_at: Instant,
}

/// Build the cache key for a request: `"{METHOD}:{full URL}"`.
///
/// Identical resolved URLs collide; callers that care about query-parameter
/// order must canonicalise it before building the URL.
pub fn cache_key(method: &Method, url: &str) -> String {
    format!("{}:{}", method.as_str(), url)
}

pub struct ResponseCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::with_ttl(CACHE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Look up `key`. An entry older than the TTL is evicted and reported absent.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            Some(entry) => entry.stored_at.elapsed() > self.ttl,
            None => return None,
        };
        if expired {
            entries.remove(key);
            debug!("cache entry expired key={}", key);
            return None;
        }
        entries.get(key).map(|entry| entry.value.clone())
    }

    /// Store `value` under `key`; the last write wins.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.entries.lock().insert(
            key.into(),
            CacheEntry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn delete(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of stored entries, expired ones included until they are looked up.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}
