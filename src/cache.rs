// src/cache.rs

use crate::config::CacheConfig;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Length of the normalized prompt prefix used as the cache key.
pub const CACHE_KEY_CHARS: usize = 100;

/// Cache key for a raw user message: trimmed, lowercased, first 100 characters.
///
/// The key is lossy. Two different prompts sharing a 100-character prefix
/// collide, and conversation history is not part of the key.
pub fn normalize_key(message: &str) -> String {
    message
        .trim()
        .to_lowercase()
        .chars()
        .take(CACHE_KEY_CHARS)
        .collect()
}

#[derive(Debug, Clone)]
struct CacheEntry {
    reply: String,
    inserted_at: Instant,
    /// Monotonic insertion number; eviction removes the smallest.
    seq: u64,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    next_seq: u64,
}

/// Bounded reply cache with TTL expiry and insertion-order eviction.
#[derive(Debug)]
pub struct ResponseCache {
    inner: Mutex<CacheInner>,
    ttl: Duration,
    max_entries: usize,
}

impl ResponseCache {
    #[must_use]
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(Duration::from_secs(config.ttl_secs), config.max_entries)
    }

    /// Cached reply if it was inserted within the TTL window.
    pub fn get(&self, key: &str) -> Option<String> {
        let inner = self.inner.lock();
        let entry = inner.entries.get(key)?;
        if entry.inserted_at.elapsed() < self.ttl {
            debug!(cache_key = %key, "Cache hit");
            Some(entry.reply.clone())
        } else {
            debug!(cache_key = %key, "Cache entry expired");
            None
        }
    }

    /// Insert or replace. When the cap is exceeded, exactly one entry is
    /// evicted: the oldest insertion still resident.
    pub fn put(&self, key: String, reply: String) {
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;

        let entry = CacheEntry {
            reply,
            inserted_at: Instant::now(),
            seq,
        };
        inner.entries.insert(key.clone(), entry);

        if inner.entries.len() > self.max_entries {
            let oldest_key = inner
                .entries
                .iter()
                .min_by_key(|(_, v)| v.seq)
                .map(|(k, _)| k.clone());

            if let Some(key_to_remove) = oldest_key {
                inner.entries.remove(&key_to_remove);
                debug!(removed_key = %key_to_remove, "Evicted oldest cache entry");
            }
        }

        debug!(cache_key = %key, ttl_seconds = self.ttl.as_secs(), "Cached response");
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let total_entries = inner.entries.len();
        let expired_entries = inner
            .entries
            .values()
            .filter(|v| v.inserted_at.elapsed() >= self.ttl)
            .count();

        CacheStats {
            total_entries,
            expired_entries,
            active_entries: total_entries - expired_entries,
            max_size: self.max_entries,
            ttl_secs: self.ttl.as_secs(),
        }
    }

    /// Clear all cache entries
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        let count = inner.entries.len();
        inner.entries.clear();
        info!(cleared_entries = count, "Cache cleared");
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub active_entries: usize,
    pub max_size: usize,
    pub ttl_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("  I Feel ANXIOUS today \n"), "i feel anxious today");
        let long = "é".repeat(150);
        assert_eq!(normalize_key(&long).chars().count(), CACHE_KEY_CHARS);
    }

    #[test]
    fn test_shared_prefix_collides() {
        let prefix = "a".repeat(CACHE_KEY_CHARS);
        assert_eq!(
            normalize_key(&format!("{prefix} first question")),
            normalize_key(&format!("{prefix} something else"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_put_and_get_byte_for_byte() {
        let cache = ResponseCache::new(Duration::from_secs(300), 100);
        let reply = "It sounds like a lot. 🌱 Let's breathe together.".to_string();
        cache.put("k".to_string(), reply.clone());
        assert_eq!(cache.get("k"), Some(reply));
        assert_eq!(cache.get("missing"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_expiration() {
        let cache = ResponseCache::new(Duration::from_secs(300), 100);
        cache.put("k".to_string(), "reply".to_string());

        advance(Duration::from_secs(299)).await;
        assert!(cache.get("k").is_some());

        advance(Duration::from_secs(1)).await;
        assert!(cache.get("k").is_none());
        assert_eq!(cache.stats().expired_entries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_insertion_order_eviction() {
        let cache = ResponseCache::new(Duration::from_secs(300), 100);
        for i in 0..100 {
            cache.put(format!("k{i}"), format!("v{i}"));
        }
        // Reading does not refresh the entry.
        assert!(cache.get("k0").is_some());

        cache.put("k100".to_string(), "v100".to_string());
        assert_eq!(cache.len(), 100);
        assert!(cache.get("k0").is_none());
        assert!(cache.get("k1").is_some());
        assert!(cache.get("k100").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replacing_key_does_not_evict() {
        let cache = ResponseCache::new(Duration::from_secs(300), 2);
        cache.put("a".to_string(), "1".to_string());
        cache.put("b".to_string(), "2".to_string());
        cache.put("a".to_string(), "3".to_string());
        assert_eq!(cache.len(), 2);

        // "b" is now the oldest insertion.
        cache.put("c".to_string(), "4".to_string());
        assert!(cache.get("b").is_none());
        assert_eq!(cache.get("a").as_deref(), Some("3"));
    }

    #[test]
    fn test_clear() {
        let cache = ResponseCache::new(Duration::from_secs(300), 10);
        cache.put("a".to_string(), "1".to_string());
        cache.clear();
        assert!(cache.is_empty());
    }
}
