//! Request orchestration: single-flight fetch with cache write-back.

use std::time::Duration;

use tokio::sync::broadcast;

use crate::{
    cache::CacheStore,
    errors::SyncResult,
    key::ResourceKey,
    runtime::{
        AuthEvent,
        persist::{self, Persistence},
    },
    single_flight::SingleFlight,
    storage::ClientStorage,
    types::{FetchFuture, Fetcher, ResourceValue},
};

/// Fetch `key` through the single-flight table, writing the outcome back to the cache.
///
/// Only the leader runs `fetcher`; the cache write happens inside the shared call,
/// so it lands exactly once regardless of how many callers joined or detached.
/// On success the value is stored with `ttl`, and also written to `storage` when
/// `persistence` is set. On 401 the entry for `key` is removed from both and an
/// [`AuthEvent::Unauthorized`] is broadcast.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn fetch_through_cache<T: ResourceValue>(
    single_flight: &SingleFlight,
    cache: &CacheStore,
    storage: &ClientStorage,
    auth_events: &broadcast::Sender<AuthEvent>,
    key: &ResourceKey,
    ttl: Option<Duration>,
    fetcher: &dyn Fetcher<T>,
    persistence: Option<Persistence<T>>,
) -> SyncResult<T> {
    single_flight
        .run(key, || -> FetchFuture<T> {
            let request = fetcher.fetch();
            let cache = cache.clone();
            let storage = storage.clone();
            let auth_events = auth_events.clone();
            let key = key.clone();
            Box::pin(async move {
                let result = request.await;
                match &result {
                    Ok(value) => {
                        cache.set(&key, value.clone(), ttl);
                        if let Some(persistence) = persistence {
                            persistence.save(&storage, &key, value, ttl);
                        }
                    }
                    Err(err) if err.clears_cache() => {
                        if cache.invalidate(&key) {
                            crate::log_cache_invalidate!("Cleared {} after 401", key);
                        }
                        if persistence.is_some() {
                            persist::forget(&storage, &key);
                        }
                        // no receivers is fine
                        let _ = auth_events.send(AuthEvent::Unauthorized { key: key.clone() });
                    }
                    Err(err) => {
                        crate::debug_log!("Fetch for {} failed: {}", key, err);
                    }
                }
                result
            })
        })
        .await
}
