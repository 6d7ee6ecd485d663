//! Shared runtime components that back every subscription.
//!
//! A [`SyncRuntime`] owns the cache, the single-flight table, the polling scheduler
//! and persisted client storage. It is the only writer to the cache. Cloning a
//! runtime is cheap and every clone shares the same state.

pub mod cache_mgmt;
pub(crate) mod persist;
pub mod request;

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::broadcast;

use crate::{
    cache::CacheStore,
    config::SyncConfig,
    errors::SyncResult,
    key::ResourceKey,
    refresh::{PollHandle, PollingScheduler},
    single_flight::SingleFlight,
    storage::ClientStorage,
    subscription::{SubscribeOptions, Subscription},
    types::{Fetcher, ResourceValue},
};
use cache_mgmt::{MAINTENANCE_OWNER, setup_cache_maintenance};
use persist::Persistence;
use request::fetch_through_cache;

const AUTH_EVENT_CAPACITY: usize = 16;

/// Signals for the identity layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// A fetch for `key` was rejected with 401; the cached entry has been cleared.
    Unauthorized { key: ResourceKey },
}

/// Central runtime that holds onto core singletons.
#[derive(Clone)]
pub struct SyncRuntime {
    config: SyncConfig,
    cache: CacheStore,
    single_flight: SingleFlight,
    scheduler: PollingScheduler,
    storage: ClientStorage,
    auth_events: broadcast::Sender<AuthEvent>,
    next_subscription_id: Arc<AtomicU64>,
}

impl SyncRuntime {
    /// Construct a runtime. No background task is started until
    /// [`start_maintenance`](Self::start_maintenance) is called.
    pub fn new(config: SyncConfig, storage: ClientStorage) -> Self {
        let (auth_events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);
        Self {
            config,
            cache: CacheStore::new(),
            single_flight: SingleFlight::new(),
            scheduler: PollingScheduler::new(),
            storage,
            auth_events,
            next_subscription_id: Arc::new(AtomicU64::new(MAINTENANCE_OWNER + 1)),
        }
    }

    /// Default config with process-local storage.
    pub fn in_memory() -> Self {
        Self::new(SyncConfig::default(), ClientStorage::in_memory())
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Access the cache handle (read access for diagnostics and tests).
    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn single_flight(&self) -> &SingleFlight {
        &self.single_flight
    }

    pub fn scheduler(&self) -> &PollingScheduler {
        &self.scheduler
    }

    pub fn storage(&self) -> &ClientStorage {
        &self.storage
    }

    /// Create a subscription for `key`. Must be called from within a tokio runtime
    /// when the options request an initial fetch or polling.
    pub fn subscribe<T, F>(
        &self,
        key: ResourceKey,
        fetcher: F,
        options: SubscribeOptions,
    ) -> Subscription<T>
    where
        T: ResourceValue,
        F: Fetcher<T>,
    {
        Subscription::new(self.clone(), key, Arc::new(fetcher), options, None)
    }

    /// Like [`subscribe`](Self::subscribe), keeping a copy of every fetched value in
    /// client storage so a new process starts from it while its TTL lasts.
    pub fn subscribe_persisted<T, F>(
        &self,
        key: ResourceKey,
        fetcher: F,
        options: SubscribeOptions,
    ) -> Subscription<T>
    where
        T: ResourceValue + Serialize + DeserializeOwned,
        F: Fetcher<T>,
    {
        Subscription::new(
            self.clone(),
            key,
            Arc::new(fetcher),
            options,
            Some(Persistence::json()),
        )
    }

    /// Fetch `key` through single-flight, storing a successful result with `ttl`.
    pub async fn fetch<T: ResourceValue>(
        &self,
        key: &ResourceKey,
        ttl: Option<Duration>,
        fetcher: &dyn Fetcher<T>,
    ) -> SyncResult<T> {
        self.fetch_with(key, ttl, fetcher, None).await
    }

    pub(crate) async fn fetch_with<T: ResourceValue>(
        &self,
        key: &ResourceKey,
        ttl: Option<Duration>,
        fetcher: &dyn Fetcher<T>,
        persistence: Option<Persistence<T>>,
    ) -> SyncResult<T> {
        fetch_through_cache(
            &self.single_flight,
            &self.cache,
            &self.storage,
            &self.auth_events,
            key,
            ttl,
            fetcher,
            persistence,
        )
        .await
    }

    /// Store a value obtained outside a fetch (e.g. a mutation response).
    pub fn store<T: ResourceValue>(&self, key: &ResourceKey, value: T, ttl: Option<Duration>) {
        self.cache.set(key, value, ttl);
    }

    pub fn invalidate(&self, key: &ResourceKey) -> bool {
        let removed = self.cache.invalidate(key);
        if removed {
            crate::log_cache_invalidate!("Invalidated {}", key);
        }
        removed
    }

    /// Invalidate every key of `resource`, whatever its parameters.
    pub fn invalidate_resource(&self, resource: &str) -> usize {
        self.cache.invalidate_resource(resource)
    }

    /// Drop all cached data, e.g. on logout.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Receive identity-layer events.
    pub fn auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.auth_events.subscribe()
    }

    /// Start periodic cache maintenance if the config enables it.
    pub fn start_maintenance(&self) -> Option<PollHandle> {
        let interval = self.config.maintenance_interval()?;
        Some(setup_cache_maintenance(
            &self.cache,
            &self.scheduler,
            interval,
            self.config.unused_threshold(),
            self.config.max_cache_size(),
        ))
    }

    /// Stop every poller and the maintenance task. Cached data is left in place.
    pub fn shutdown(&self) {
        self.scheduler.stop_all();
        crate::debug_log!("Runtime shut down");
    }

    pub(crate) fn next_subscription_id(&self) -> u64 {
        self.next_subscription_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for SyncRuntime {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SyncError;
    use std::sync::atomic::AtomicU32;

    #[tokio::test(start_paused = true)]
    async fn test_fetch_writes_cache_with_ttl() {
        let runtime = SyncRuntime::in_memory();
        let key = ResourceKey::new("dashboard");
        let fetcher = || async { Ok::<_, SyncError>(12u32) };

        let value = runtime
            .fetch::<u32>(&key, Some(Duration::from_secs(60)), &fetcher)
            .await;
        assert_eq!(value, Ok(12));
        assert!(runtime.cache().is_valid(&key));

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(!runtime.cache().is_valid(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthorized_clears_entry_and_broadcasts() {
        let runtime = SyncRuntime::in_memory();
        let key = ResourceKey::new("stock-alerts");
        runtime.store(&key, 1u32, None);
        let mut events = runtime.auth_events();

        let calls = Arc::new(AtomicU32::new(0));
        let counted = calls.clone();
        let fetcher = move || {
            counted.fetch_add(1, Ordering::SeqCst);
            async { Err::<u32, _>(SyncError::Unauthorized) }
        };
        let result = runtime.fetch::<u32>(&key, None, &fetcher).await;

        assert_eq!(result, Err(SyncError::Unauthorized));
        assert!(!runtime.cache().contains(&key));
        assert_eq!(
            events.try_recv().ok(),
            Some(AuthEvent::Unauthorized { key: key.clone() })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_maintenance_evicts_beyond_max_size() {
        let config = SyncConfig::new()
            .with_maintenance_interval(Duration::from_secs(10))
            .with_max_cache_size(2);
        let runtime = SyncRuntime::new(config, ClientStorage::in_memory());
        for i in 0..5u32 {
            runtime.store(&ResourceKey::builder("r").param("i", i).build(), i, None);
        }
        assert!(runtime.start_maintenance().is_some());

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(runtime.cache().size(), 2);

        runtime.shutdown();
        assert_eq!(runtime.scheduler().active_count(), 0);
    }
}
