//! Cache management owned by the runtime.

use std::time::Duration;

use crate::{
    cache::CacheStore,
    refresh::{PollHandle, PollingScheduler},
};

/// Scheduler owner id reserved for cache maintenance. Subscription ids start at 1.
pub(crate) const MAINTENANCE_OWNER: u64 = 0;

/// Start periodic cache maintenance.
///
/// Every `interval`, entries not read for `unused_threshold` are removed and the
/// store is trimmed to `max_size` by LRU eviction.
pub(crate) fn setup_cache_maintenance(
    cache: &CacheStore,
    scheduler: &PollingScheduler,
    interval: Duration,
    unused_threshold: Duration,
    max_size: usize,
) -> PollHandle {
    let cache = cache.clone();
    let handle = scheduler.start(
        MAINTENANCE_OWNER,
        interval,
        || false,
        move || {
            let stats = cache.maintain(unused_threshold, max_size);
            if stats.unused_removed > 0 || stats.lru_evicted > 0 {
                crate::log_maintenance!(
                    "Removed {} unused and evicted {} entries ({} remain)",
                    stats.unused_removed,
                    stats.lru_evicted,
                    stats.final_size
                );
            }
            std::future::ready(())
        },
    );

    crate::log_maintenance!(
        "Cache maintenance enabled (every {:?}, max {} entries)",
        interval,
        max_size
    );
    handle
}
