//! Single-flight request coalescing.
//!
//! At most one network call is in flight per [`ResourceKey`]. Concurrent callers for
//! the same key join the outstanding call and all receive its result, success or
//! failure. The in-flight marker is removed inside the shared future, before any
//! joined caller observes the result, so the next call after completion always
//! starts a fresh request.
//!
//! The leader's future is also driven by a detached task. A caller that is torn down
//! mid-flight therefore never cancels the call for the callers still waiting on it,
//! and the response still reaches the cache.

use std::{
    any::Any,
    collections::HashMap,
    panic::AssertUnwindSafe,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use futures::future::{FutureExt, Shared};

use crate::{
    errors::{SyncError, SyncResult},
    key::ResourceKey,
    platform::task,
    types::{FetchFuture, ResourceValue},
};

type SharedFetch<T> = Shared<FetchFuture<T>>;

struct InFlightCall {
    call_id: u64,
    /// A `SharedFetch<T>` for the `T` the leader was started with.
    shared: Box<dyn Any + Send + Sync>,
}

/// Per-key coalescing of concurrent fetches.
#[derive(Clone, Default)]
pub struct SingleFlight {
    in_flight: Arc<Mutex<HashMap<ResourceKey, InFlightCall>>>,
    next_call_id: Arc<AtomicU64>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `start` unless a call for `key` is already in flight, in which case join it.
    ///
    /// `start` is only invoked by the caller that becomes leader. Must be called from
    /// within a tokio runtime.
    pub async fn run<T, F>(&self, key: &ResourceKey, start: F) -> SyncResult<T>
    where
        T: ResourceValue,
        F: FnOnce() -> FetchFuture<T>,
    {
        self.join_or_start(key, start).await
    }

    /// Whether a call for `key` is currently outstanding.
    pub fn is_in_flight(&self, key: &ResourceKey) -> bool {
        self.in_flight
            .lock()
            .map(|in_flight| in_flight.contains_key(key))
            .unwrap_or(false)
    }

    /// Number of keys with an outstanding call.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight
            .lock()
            .map(|in_flight| in_flight.len())
            .unwrap_or(0)
    }

    fn join_or_start<T, F>(&self, key: &ResourceKey, start: F) -> SharedFetch<T>
    where
        T: ResourceValue,
        F: FnOnce() -> FetchFuture<T>,
    {
        let Ok(mut in_flight) = self.in_flight.lock() else {
            crate::warn_log!("single-flight table poisoned, running {} unshared", key);
            return start().shared();
        };

        if let Some(call) = in_flight.get(key) {
            if let Some(shared) = call.shared.downcast_ref::<SharedFetch<T>>() {
                crate::log_fetch!("Joining in-flight request for {}", key);
                return shared.clone();
            }
            crate::warn_log!(
                "In-flight request for {} has a different value type, running unshared",
                key
            );
            return start().shared();
        }

        let call_id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        let table = Arc::clone(&self.in_flight);
        let owned_key = key.clone();
        let request = start();

        let leader: FetchFuture<T> = Box::pin(async move {
            let result = AssertUnwindSafe(request)
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(SyncError::Network("fetcher panicked".to_string())));

            if let Ok(mut in_flight) = table.lock() {
                if in_flight
                    .get(&owned_key)
                    .is_some_and(|call| call.call_id == call_id)
                {
                    in_flight.remove(&owned_key);
                }
            }
            result
        });
        let shared = leader.shared();

        in_flight.insert(
            key.clone(),
            InFlightCall {
                call_id,
                shared: Box::new(shared.clone()),
            },
        );
        drop(in_flight);

        crate::log_fetch!("Starting new request for {}", key);
        let driver = shared.clone();
        task::spawn(async move {
            let _ = driver.await;
        });

        shared
    }
}
