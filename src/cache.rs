//! # Cache Management for storefront-sync
//!
//! This module implements the process-wide, type-erased cache shared by every
//! subscription. It supports:
//! - **Per-entry TTL**: each entry carries its own time-to-live (analytics use
//!   15–30 minutes, the cart uses none and is revalidated on identity change).
//! - **Validity**: an entry is valid iff `now - fetched_at < ttl`; invalid entries are
//!   only returned when the caller explicitly allows stale data.
//! - **LRU Eviction**: least-recently-used entries are evicted to maintain a size limit.
//! - **Access/Usage Stats**: statistics for cache introspection and tuning.
//!
//! The store does no I/O. Only the [`SyncRuntime`](crate::runtime::SyncRuntime)
//! writes to it, in response to a completed fetch or an explicit invalidation.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use storefront_sync::{cache::CacheStore, key::ResourceKey};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let cache = CacheStore::new();
//! let key = ResourceKey::new("dashboard");
//! cache.set(&key, 42u32, Some(Duration::from_secs(900)));
//! assert!(cache.is_valid(&key));
//! assert_eq!(cache.get::<u32>(&key).map(|entry| entry.value), Some(42));
//! # }
//! ```

use std::{
    any::Any,
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use crate::{key::ResourceKey, platform::Instant};

/// Options for cache retrieval operations
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheGetOptions {
    /// Return the entry even if its TTL has elapsed
    pub allow_stale: bool,
}

impl CacheGetOptions {
    /// Create new cache get options with default values (valid entries only)
    pub fn new() -> Self {
        Self::default()
    }

    /// Also return entries whose TTL has elapsed
    pub fn allow_stale(mut self) -> Self {
        self.allow_stale = true;
        self
    }
}

/// Result type for cache get operations with staleness information
#[derive(Debug, Clone)]
pub struct CacheGetResult<T> {
    /// The cached data
    pub data: T,
    /// Whether the entry's TTL has elapsed
    pub is_stale: bool,
}

/// A typed view of one cache entry.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub fetched_at: Instant,
    /// `None` means the entry stays valid until invalidated.
    pub ttl: Option<Duration>,
}

impl<T> CacheEntry<T> {
    /// Whether the entry is valid at `now`: `now - fetched_at < ttl`.
    pub fn is_valid_at(&self, now: Instant) -> bool {
        is_within_ttl(self.fetched_at, self.ttl, now)
    }

    /// Whether the entry is valid now.
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Instant::now())
    }

    /// Time since the entry was fetched.
    pub fn age(&self) -> Duration {
        Instant::now().saturating_duration_since(self.fetched_at)
    }
}

fn is_within_ttl(fetched_at: Instant, ttl: Option<Duration>, now: Instant) -> bool {
    match ttl {
        Some(ttl) => now.saturating_duration_since(fetched_at) < ttl,
        None => true,
    }
}

/// A type-erased entry for storing resource values with timestamp and access tracking
struct StoredEntry {
    data: Arc<dyn Any + Send + Sync>,
    fetched_at: Instant,
    ttl: Option<Duration>,
    last_accessed: Mutex<Instant>,
    access_count: AtomicU32,
}

impl StoredEntry {
    fn new<T: Clone + Send + Sync + 'static>(data: T, ttl: Option<Duration>) -> Self {
        let now = Instant::now();
        Self {
            data: Arc::new(data),
            fetched_at: now,
            ttl,
            last_accessed: Mutex::new(now),
            access_count: AtomicU32::new(0),
        }
    }

    /// Downcasts the stored data, updating access tracking on success.
    fn typed<T: Clone + Send + Sync + 'static>(&self) -> Option<CacheEntry<T>> {
        let value = self.data.downcast_ref::<T>()?.clone();
        if let Ok(mut last_accessed) = self.last_accessed.lock() {
            *last_accessed = Instant::now();
        }
        self.access_count.fetch_add(1, Ordering::SeqCst);
        Some(CacheEntry {
            value,
            fetched_at: self.fetched_at,
            ttl: self.ttl,
        })
    }

    fn is_valid_at(&self, now: Instant) -> bool {
        is_within_ttl(self.fetched_at, self.ttl, now)
    }

    fn time_since_last_access(&self) -> Duration {
        if let Ok(last_accessed) = self.last_accessed.lock() {
            last_accessed.elapsed()
        } else {
            Duration::ZERO
        }
    }

    fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }
}

/// Shared cache of resource values keyed by [`ResourceKey`]
#[derive(Clone, Default)]
pub struct CacheStore {
    entries: Arc<Mutex<HashMap<ResourceKey, StoredEntry>>>,
}

impl CacheStore {
    /// Creates an empty cache store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Retrieves the entry for `key`, valid or not.
    ///
    /// Returns `None` if the key is absent or holds a value of another type.
    /// Callers that serve data must check [`CacheEntry::is_valid`] or use
    /// [`get_valid`](Self::get_valid) / [`get_with_options`](Self::get_with_options).
    pub fn get<T: Clone + Send + Sync + 'static>(&self, key: &ResourceKey) -> Option<CacheEntry<T>> {
        self.entries.lock().ok()?.get(key)?.typed::<T>()
    }

    /// Retrieves the value for `key` only if the entry is still within its TTL.
    pub fn get_valid<T: Clone + Send + Sync + 'static>(&self, key: &ResourceKey) -> Option<T> {
        self.get_with_options(key, CacheGetOptions::new())
            .map(|result| result.data)
    }

    /// Retrieves a cached value with configurable options
    ///
    /// Without [`CacheGetOptions::allow_stale`], an entry past its TTL is treated as absent.
    pub fn get_with_options<T: Clone + Send + Sync + 'static>(
        &self,
        key: &ResourceKey,
        options: CacheGetOptions,
    ) -> Option<CacheGetResult<T>> {
        let entry = self.get::<T>(key)?;
        let is_stale = !entry.is_valid();
        if is_stale && !options.allow_stale {
            return None;
        }
        if !is_stale {
            crate::log_cache_hit!("{} (age {:?})", key, entry.age());
        }
        Some(CacheGetResult {
            data: entry.value,
            is_stale,
        })
    }

    /// Stores `value` under `key` with the given TTL, replacing any previous entry.
    pub fn set<T: Clone + Send + Sync + 'static>(
        &self,
        key: &ResourceKey,
        value: T,
        ttl: Option<Duration>,
    ) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.clone(), StoredEntry::new(value, ttl));
            crate::log_cache_store!("Stored data for key: {} (ttl {:?})", key, ttl);
        }
    }

    /// Whether `key` holds an entry that is within its TTL now.
    pub fn is_valid(&self, key: &ResourceKey) -> bool {
        self.is_valid_at(key, Instant::now())
    }

    /// Whether `key` holds an entry that is within its TTL at `now`.
    pub fn is_valid_at(&self, key: &ResourceKey, now: Instant) -> bool {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(key).map(|entry| entry.is_valid_at(now)))
            .unwrap_or(false)
    }

    /// Whether any entry (valid or not) exists for `key`.
    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.entries
            .lock()
            .map(|entries| entries.contains_key(key))
            .unwrap_or(false)
    }

    /// Removes the entry for `key`. Returns whether an entry was removed.
    pub fn invalidate(&self, key: &ResourceKey) -> bool {
        let removed = self
            .entries
            .lock()
            .map(|mut entries| entries.remove(key).is_some())
            .unwrap_or(false);
        if removed {
            crate::log_cache_invalidate!("Invalidated cache entry for key: {}", key);
        }
        removed
    }

    /// Removes every entry whose key belongs to `resource`.
    pub fn invalidate_resource(&self, resource: &str) -> usize {
        if let Ok(mut entries) = self.entries.lock() {
            let initial_size = entries.len();
            entries.retain(|key, _| key.resource() != resource);
            let removed = initial_size - entries.len();
            if removed > 0 {
                crate::log_cache_invalidate!("Invalidated {} entries for resource: {}", removed, resource);
            }
            removed
        } else {
            0
        }
    }

    /// Clears all cached entries.
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            let _count = entries.len();
            entries.clear();
            crate::log_maintenance!("Cleared {} cache entries", _count);
        }
    }

    /// Gets the number of cached entries.
    pub fn size(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    /// Removes entries that have not been read for `unused_threshold`.
    ///
    /// Returns the number of entries removed.
    pub fn cleanup_unused_entries(&self, unused_threshold: Duration) -> usize {
        if let Ok(mut entries) = self.entries.lock() {
            let initial_size = entries.len();
            entries.retain(|_key, entry| entry.time_since_last_access() <= unused_threshold);
            let removed = initial_size - entries.len();
            if removed > 0 {
                crate::log_maintenance!("Removed {} unused entries", removed);
            }
            removed
        } else {
            0
        }
    }

    /// Evicts least recently used entries until at most `max_size` remain.
    ///
    /// Returns the number of entries evicted.
    pub fn evict_lru_entries(&self, max_size: usize) -> usize {
        if let Ok(mut entries) = self.entries.lock() {
            if entries.len() <= max_size {
                return 0;
            }

            let mut by_recency: Vec<_> = entries.drain().collect();
            // Most recently used first
            by_recency.sort_by_key(|(_, entry)| entry.time_since_last_access());
            let evicted = by_recency.len() - max_size;
            by_recency.truncate(max_size);
            entries.extend(by_recency);

            crate::log_maintenance!("Evicted {} entries over the size limit", evicted);
            evicted
        } else {
            0
        }
    }

    /// Performs cache maintenance: unused-entry cleanup followed by LRU eviction.
    pub fn maintain(&self, unused_threshold: Duration, max_size: usize) -> CacheMaintenanceStats {
        CacheMaintenanceStats {
            unused_removed: self.cleanup_unused_entries(unused_threshold),
            lru_evicted: self.evict_lru_entries(max_size),
            final_size: self.size(),
        }
    }

    /// Gets cache statistics.
    pub fn stats(&self) -> CacheStats {
        if let Ok(entries) = self.entries.lock() {
            let now = Instant::now();
            let mut total_age = Duration::ZERO;
            let mut total_accesses = 0;
            let mut valid_count = 0;

            for entry in entries.values() {
                total_age += entry.age();
                total_accesses += entry.access_count.load(Ordering::SeqCst);
                if entry.is_valid_at(now) {
                    valid_count += 1;
                }
            }

            let entry_count = entries.len();
            let avg_age = match u32::try_from(entry_count) {
                Ok(count) if count > 0 => total_age / count,
                _ => Duration::ZERO,
            };

            CacheStats {
                entry_count,
                valid_count,
                total_accesses,
                avg_age,
            }
        } else {
            CacheStats::default()
        }
    }
}

/// Statistics for cache maintenance operations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheMaintenanceStats {
    pub unused_removed: usize,
    pub lru_evicted: usize,
    pub final_size: usize,
}

/// General cache statistics
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub entry_count: usize,
    pub valid_count: usize,
    pub total_accesses: u32,
    pub avg_age: Duration,
}

impl CacheStats {
    pub fn avg_accesses_per_entry(&self) -> f64 {
        if self.entry_count > 0 {
            f64::from(self.total_accesses) / self.entry_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    fn key(name: &str) -> ResourceKey {
        ResourceKey::new(name)
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_valid_until_ttl_elapses() {
        let cache = CacheStore::new();
        let ttl = Duration::from_secs(15 * 60);
        let k = key("dashboard");
        cache.set(&k, "summary".to_string(), Some(ttl));
        let t0 = cache.get::<String>(&k).map(|entry| entry.fetched_at);
        let t0 = t0.unwrap();

        assert!(cache.is_valid_at(&k, t0));
        assert!(cache.is_valid_at(&k, t0 + ttl - Duration::from_millis(1)));
        assert!(!cache.is_valid_at(&k, t0 + ttl));
        assert!(!cache.is_valid_at(&k, t0 + ttl + Duration::from_secs(1)));

        advance(ttl - Duration::from_millis(1)).await;
        assert!(cache.is_valid(&k));
        advance(Duration::from_millis(1)).await;
        assert!(!cache.is_valid(&k));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_entries_need_opt_in() {
        let cache = CacheStore::new();
        let k = key("stock-alerts");
        cache.set(&k, 3u32, Some(Duration::from_secs(60)));
        advance(Duration::from_secs(61)).await;

        assert_eq!(cache.get_valid::<u32>(&k), None);
        let stale = cache
            .get_with_options::<u32>(&k, CacheGetOptions::new().allow_stale())
            .unwrap();
        assert_eq!(stale.data, 3);
        assert!(stale.is_stale);
        // raw access still sees the entry
        assert!(cache.get::<u32>(&k).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_ttl_stays_valid_until_invalidated() {
        let cache = CacheStore::new();
        let k = key("cart");
        cache.set(&k, vec![1u64, 2], None);
        advance(Duration::from_secs(24 * 60 * 60)).await;
        assert!(cache.is_valid(&k));
        assert!(cache.invalidate(&k));
        assert!(!cache.is_valid(&k));
        assert!(!cache.invalidate(&k));
    }

    #[tokio::test]
    async fn test_heterogeneous_types() {
        let cache = CacheStore::new();
        cache.set(&key("a"), 1u32, None);
        cache.set(&key("b"), "two".to_string(), None);
        assert_eq!(cache.get_valid::<u32>(&key("a")), Some(1));
        assert_eq!(cache.get_valid::<String>(&key("b")), Some("two".to_string()));
        // wrong type reads as absent
        assert_eq!(cache.get_valid::<String>(&key("a")), None);
    }

    #[tokio::test]
    async fn test_invalidate_resource_only_touches_that_resource() {
        let cache = CacheStore::new();
        let p30 = ResourceKey::builder("predictions").param("days", 30).build();
        let p7 = ResourceKey::builder("predictions").param("days", 7).build();
        cache.set(&p30, 1u8, None);
        cache.set(&p7, 2u8, None);
        cache.set(&key("dashboard"), 3u8, None);
        assert_eq!(cache.invalidate_resource("predictions"), 2);
        assert_eq!(cache.size(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_maintenance_evicts_least_recently_used() {
        let cache = CacheStore::new();
        for name in ["a", "b", "c"] {
            cache.set(&key(name), name.to_string(), None);
            advance(Duration::from_secs(1)).await;
        }
        // touch "a" so "b" becomes the least recently used
        let _ = cache.get::<String>(&key("a"));
        advance(Duration::from_secs(1)).await;

        let stats = cache.maintain(Duration::from_secs(3600), 2);
        assert_eq!(stats.lru_evicted, 1);
        assert_eq!(stats.final_size, 2);
        assert!(cache.contains(&key("a")));
        assert!(!cache.contains(&key("b")));
        assert!(cache.contains(&key("c")));
    }
}
