//! Runtime primitives shared by the cache, scheduler and subscriptions.
//!
//! Everything time-related goes through `tokio::time` so tests can pause and
//! advance the clock deterministically.

use std::time::Duration;

pub use tokio::time::Instant;

/// Entries not read for this long are removed by cache maintenance.
pub const DEFAULT_UNUSED_THRESHOLD: Duration = Duration::from_secs(60 * 60);

/// Upper bound on cache entries kept by maintenance (LRU eviction beyond it).
pub const DEFAULT_MAX_CACHE_SIZE: usize = 1000;

/// How often the runtime runs cache maintenance.
pub const DEFAULT_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Minimum interval for periodic tasks to prevent busy spinning.
pub const MIN_TASK_INTERVAL: Duration = Duration::from_millis(1);

pub mod task {
    //! Task spawning.

    use std::future::Future;

    pub use tokio::task::JoinHandle;

    /// Spawn a future onto the current tokio runtime.
    pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        tokio::spawn(future)
    }
}
