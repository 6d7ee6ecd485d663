//! Persisted copies of resource cache entries.
//!
//! A persisted subscription writes every successful fetch to [`ClientStorage`] under
//! its resource key and, on a cold in-memory cache, reads it back with whatever TTL
//! it has left. A 401 removes the stored copy together with the cache entry.

use std::time::Duration;

use serde::{Serialize, de::DeserializeOwned};

use crate::{cache::CacheStore, key::ResourceKey, storage::ClientStorage, types::ResourceValue};

type LoadFn<T> = fn(&ClientStorage, &ResourceKey) -> Option<(T, Option<Duration>)>;
type SaveFn<T> = fn(&ClientStorage, &ResourceKey, &T, Option<Duration>);

/// JSON storage hooks for one value type.
pub(crate) struct Persistence<T> {
    load: LoadFn<T>,
    save: SaveFn<T>,
}

impl<T> Clone for Persistence<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Persistence<T> {}

impl<T: ResourceValue + Serialize + DeserializeOwned> Persistence<T> {
    pub(crate) fn json() -> Self {
        Self {
            load: load_json::<T>,
            save: save_json::<T>,
        }
    }
}

impl<T: ResourceValue> Persistence<T> {
    /// Copy a fresh stored entry into `cache` unless it already holds one for `key`.
    ///
    /// An in-memory entry, even an expired one, is never older than the stored copy.
    pub(crate) fn hydrate(
        &self,
        storage: &ClientStorage,
        cache: &CacheStore,
        key: &ResourceKey,
    ) -> bool {
        if cache.contains(key) {
            return false;
        }
        match (self.load)(storage, key) {
            Some((value, remaining)) => {
                crate::log_cache_store!("Hydrated {} from storage", key);
                cache.set(key, value, remaining);
                true
            }
            None => false,
        }
    }

    pub(crate) fn save(
        &self,
        storage: &ClientStorage,
        key: &ResourceKey,
        value: &T,
        ttl: Option<Duration>,
    ) {
        (self.save)(storage, key, value, ttl);
    }
}

pub(crate) fn forget(storage: &ClientStorage, key: &ResourceKey) {
    if let Err(err) = storage.remove(key.as_str()) {
        crate::warn_log!("Failed to remove persisted {}: {}", key, err);
    }
}

fn load_json<T: DeserializeOwned>(
    storage: &ClientStorage,
    key: &ResourceKey,
) -> Option<(T, Option<Duration>)> {
    match storage.load_fresh_entry::<T>(key.as_str()) {
        Ok(entry) => entry.map(|entry| (entry.value, entry.remaining)),
        Err(err) => {
            crate::warn_log!("Discarding unreadable persisted {}: {}", key, err);
            forget(storage, key);
            None
        }
    }
}

fn save_json<T: Serialize>(
    storage: &ClientStorage,
    key: &ResourceKey,
    value: &T,
    ttl: Option<Duration>,
) {
    let result = match ttl {
        Some(ttl) => storage.save_with_ttl(key.as_str(), value, ttl),
        None => storage.save(key.as_str(), value),
    };
    if let Err(err) = result {
        crate::warn_log!("Failed to persist {}: {}", key, err);
    }
}
