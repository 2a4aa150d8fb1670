//! Explicitly constructed cache for decoded activities.
//!
//! Entries are keyed by the SHA-256 fingerprint of the raw input bytes, expire
//! after a caller-supplied TTL and are evicted least-recently-used once the
//! capacity is reached. The cache is owned by whoever builds it; there is no
//! process-wide instance.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// SHA-256 of the payload as lowercase hex
pub fn fingerprint(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Cache key for a decode request.
///
/// The declared format and fallback start both change the decoded result, so
/// they are hashed ahead of the payload.
pub fn request_key(bytes: &[u8], format: &str, fallback_start: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format.as_bytes());
    hasher.update([0u8]);
    hasher.update(fallback_start.timestamp().to_be_bytes());
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Cache settings as they appear in the application config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_seconds: i64,
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 3600,
            capacity: 256,
        }
    }
}

/// Cache statistics and metrics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheMetrics {
    pub total_lookups: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub expirations: u64,
    pub evictions: u64,
}

impl CacheMetrics {
    /// Hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        if self.total_lookups == 0 {
            return 0.0;
        }
        (self.cache_hits as f64 / self.total_lookups as f64) * 100.0
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    cached_at: DateTime<Utc>,
    accessed_at: DateTime<Utc>,
}

struct CacheInner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    metrics: CacheMetrics,
}

pub struct ActivityCache<V> {
    ttl: Duration,
    capacity: usize,
    inner: Mutex<CacheInner<V>>,
}

impl<V: Clone> ActivityCache<V> {
    /// A zero capacity disables caching entirely
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity,
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                metrics: CacheMetrics::default(),
            }),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(Duration::seconds(config.ttl_seconds.max(0)), config.capacity)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    // Entries are never left half-written, so a poisoned lock is still usable
    fn lock(&self) -> MutexGuard<'_, CacheInner<V>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, bytes: &[u8]) -> Option<V> {
        self.get_at(&fingerprint(bytes), Utc::now())
    }

    pub fn insert(&self, bytes: &[u8], value: V) {
        self.insert_at(fingerprint(bytes), value, Utc::now());
    }

    /// Look up by fingerprint as of `now`; expired entries are dropped
    pub fn get_at(&self, key: &str, now: DateTime<Utc>) -> Option<V> {
        let ttl = self.ttl;
        let mut guard = self.lock();
        let inner = &mut *guard;
        inner.metrics.total_lookups += 1;

        let expired = match inner.entries.get_mut(key) {
            Some(entry) if now - entry.cached_at < ttl => {
                entry.accessed_at = now;
                let value = entry.value.clone();
                inner.metrics.cache_hits += 1;
                return Some(value);
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            inner.entries.remove(key);
            inner.metrics.expirations += 1;
            debug!("Cache entry {} expired", key);
        }
        inner.metrics.cache_misses += 1;
        None
    }

    pub fn insert_at(&self, key: String, value: V, now: DateTime<Utc>) {
        if self.capacity == 0 {
            return;
        }
        let mut inner = self.lock();

        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.capacity {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.accessed_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                inner.entries.remove(&oldest);
                inner.metrics.evictions += 1;
            }
        }

        inner.entries.insert(
            key,
            CacheEntry {
                value,
                cached_at: now,
                accessed_at: now,
            },
        );
    }

    /// Drop every entry older than the TTL, returning how many were removed
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let ttl = self.ttl;
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| now - entry.cached_at < ttl);
        let removed = before - inner.entries.len();
        inner.metrics.expirations += removed as u64;
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.lock().metrics.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 23, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_fingerprint_is_stable_hex() {
        let a = fingerprint(b"activity");
        assert_eq!(a.len(), 64);
        assert_eq!(a, fingerprint(b"activity"));
        assert_ne!(a, fingerprint(b"activity2"));
    }

    #[test]
    fn test_hit_then_expiry() {
        let cache = ActivityCache::new(Duration::minutes(10), 4);
        cache.insert_at("k".to_string(), 42u32, t0());

        assert_eq!(cache.get_at("k", t0() + Duration::minutes(5)), Some(42));
        assert_eq!(cache.get_at("k", t0() + Duration::minutes(10)), None);
        assert!(cache.is_empty());

        let metrics = cache.metrics();
        assert_eq!(metrics.cache_hits, 1);
        assert_eq!(metrics.cache_misses, 1);
        assert_eq!(metrics.expirations, 1);
        assert_eq!(metrics.hit_rate(), 50.0);
    }

    #[test]
    fn test_lru_eviction() {
        let cache = ActivityCache::new(Duration::hours(1), 2);
        cache.insert_at("a".to_string(), 1, t0());
        cache.insert_at("b".to_string(), 2, t0() + Duration::seconds(1));
        // Touch "a" so "b" becomes least recently used
        assert_eq!(cache.get_at("a", t0() + Duration::seconds(2)), Some(1));
        cache.insert_at("c".to_string(), 3, t0() + Duration::seconds(3));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get_at("b", t0() + Duration::seconds(4)), None);
        assert_eq!(cache.get_at("a", t0() + Duration::seconds(4)), Some(1));
        assert_eq!(cache.metrics().evictions, 1);
    }

    #[test]
    fn test_zero_capacity_disables_cache() {
        let cache = ActivityCache::new(Duration::hours(1), 0);
        cache.insert(b"payload", "value".to_string());
        assert!(cache.get(b"payload").is_none());
    }

    #[test]
    fn test_purge_expired() {
        let cache = ActivityCache::new(Duration::minutes(1), 8);
        cache.insert_at("old".to_string(), 1, t0());
        cache.insert_at("new".to_string(), 2, t0() + Duration::seconds(50));

        assert_eq!(cache.purge_expired(t0() + Duration::seconds(70)), 1);
        assert_eq!(cache.len(), 1);
    }
}
