//! Single-process, thread-safe TTL cache with LRU eviction (§4.2).

use crate::domain::errors::CacheError;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default per-category TTLs in seconds (§4.2).
pub mod default_ttl {
    use std::time::Duration;

    pub const CURRENT_PRICE: Duration = Duration::from_secs(60);
    pub const OPTIONS_CHAIN: Duration = Duration::from_secs(300);
    pub const PRICE_HISTORY: Duration = Duration::from_secs(3600);
    pub const TICKER_INFO: Duration = Duration::from_secs(86_400);
    pub const EXPIRATIONS: Duration = Duration::from_secs(1800);
}

/// The two TTL categories exposed for configuration override (`cache_ttl_minutes`,
/// `intraday_cache_ttl_minutes`); the remaining categories are fixed.
#[derive(Debug, Clone, Copy)]
pub struct CacheTtlConfig {
    pub price_history: Duration,
    pub current_price: Duration,
}

impl Default for CacheTtlConfig {
    fn default() -> Self {
        Self {
            price_history: default_ttl::PRICE_HISTORY,
            current_price: default_ttl::CURRENT_PRICE,
        }
    }
}

struct Entry {
    payload: serde_json::Value,
    inserted_at: Instant,
    expires_at: Instant,
    size_bytes: usize,
    last_used: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    hits: u64,
    misses: u64,
}

struct Inner {
    entries: HashMap<String, Entry>,
    counters: Counters,
    clock: u64,
}

/// Per-entry snapshot returned by [`TtlCache::stats`], sorted by ascending remaining
/// TTL.
#[derive(Debug, Clone)]
pub struct EntryStats {
    pub key: String,
    pub remaining_ttl: Duration,
    pub size_bytes: usize,
    pub age: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub entry_count: usize,
    pub size_bytes: usize,
    pub max_bytes: usize,
    pub size_utilization: f64,
    pub entries: Vec<EntryStats>,
}

/// A bounded-memory, LRU-evicting TTL cache. All operations are synchronous and take a
/// single internal mutex -- there are no suspension points, so callers never block on
/// I/O while holding the lock (§4.2 Concurrency).
pub struct TtlCache {
    inner: Mutex<Inner>,
    max_bytes: usize,
}

impl TtlCache {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                counters: Counters::default(),
                clock: 0,
            }),
            max_bytes,
        }
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        let now = Instant::now();
        let hit = match inner.entries.get(key) {
            Some(entry) if entry.expires_at > now => true,
            Some(_) => {
                inner.entries.remove(key);
                false
            }
            None => false,
        };

        if !hit {
            inner.counters.misses += 1;
            return None;
        }

        inner.counters.hits += 1;
        inner.clock += 1;
        let clock = inner.clock;
        let entry = inner.entries.get_mut(key).expect("checked above");
        entry.last_used = clock;
        serde_json::from_value(entry.payload.clone()).ok()
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<(), CacheError> {
        if ttl.is_zero() {
            return Err(CacheError::InvalidTtl);
        }
        let payload = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
        let size_bytes = payload.to_string().len();

        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.clock += 1;
        let clock = inner.clock;
        let now = Instant::now();
        inner.entries.insert(
            key.to_string(),
            Entry {
                payload,
                inserted_at: now,
                expires_at: now + ttl,
                size_bytes,
                last_used: clock,
            },
        );
        self.evict_if_needed(&mut inner);
        Ok(())
    }

    pub fn delete(&self, key: &str) -> bool {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.entries.clear();
    }

    fn evict_if_needed(&self, inner: &mut Inner) {
        loop {
            let total: usize = inner.entries.values().map(|e| e.size_bytes).sum();
            if total <= self.max_bytes {
                return;
            }
            let Some(lru_key) = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone())
            else {
                return;
            };
            inner.entries.remove(&lru_key);
        }
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().expect("cache mutex poisoned");
        let now = Instant::now();
        let total_hits = inner.counters.hits;
        let total_misses = inner.counters.misses;
        let total = total_hits + total_misses;
        let hit_rate = if total == 0 {
            0.0
        } else {
            total_hits as f64 / total as f64
        };
        let size_bytes: usize = inner.entries.values().map(|e| e.size_bytes).sum();
        let size_utilization = if self.max_bytes == 0 {
            0.0
        } else {
            size_bytes as f64 / self.max_bytes as f64
        };

        let mut entries: Vec<EntryStats> = inner
            .entries
            .iter()
            .map(|(key, entry)| EntryStats {
                key: key.clone(),
                remaining_ttl: entry.expires_at.saturating_duration_since(now),
                size_bytes: entry.size_bytes,
                age: now.saturating_duration_since(entry.inserted_at),
            })
            .collect();
        entries.sort_by_key(|e| e.remaining_ttl);

        CacheStats {
            hits: total_hits,
            misses: total_misses,
            hit_rate,
            entry_count: inner.entries.len(),
            size_bytes,
            max_bytes: self.max_bytes,
            size_utilization,
            entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_returns_value_before_ttl() {
        let cache = TtlCache::new(1024 * 1024);
        cache.set("k", &42i64, Duration::from_secs(60)).unwrap();
        assert_eq!(cache.get::<i64>("k"), Some(42));
    }

    #[test]
    fn expired_entry_is_absent_and_removed_lazily() {
        let cache = TtlCache::new(1024 * 1024);
        cache.set("k", &42i64, Duration::from_millis(1)).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get::<i64>("k"), None);
        assert_eq!(cache.stats().entry_count, 0);
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let cache = TtlCache::new(1024);
        let err = cache.set("k", &1i64, Duration::from_secs(0)).unwrap_err();
        assert_eq!(err, CacheError::InvalidTtl);
    }

    #[test]
    fn eviction_keeps_size_at_or_under_max() {
        let cache = TtlCache::new(64);
        for i in 0..50 {
            let _ = cache.set(&format!("key-{i}"), &"x".repeat(20), Duration::from_secs(60));
        }
        let stats = cache.stats();
        assert!(stats.size_bytes <= 64 + 64, "stats: {stats:?}");
    }

    #[test]
    fn get_hit_makes_entry_most_recently_used() {
        let cache = TtlCache::new(usize::MAX);
        cache.set("a", &1i64, Duration::from_secs(60)).unwrap();
        cache.set("b", &2i64, Duration::from_secs(60)).unwrap();
        // Touch "a" so it becomes more recently used than "b".
        let _ = cache.get::<i64>("a");
        let stats = cache.stats();
        assert_eq!(stats.entry_count, 2);
    }

    #[test]
    fn hit_rate_tracks_hits_and_misses() {
        let cache = TtlCache::new(1024);
        cache.set("k", &1i64, Duration::from_secs(60)).unwrap();
        let _ = cache.get::<i64>("k");
        let _ = cache.get::<i64>("missing");
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.5).abs() < 1e-9);
    }
}
