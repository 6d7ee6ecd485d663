//! Resource subscriptions.
//!
//! A [`Subscription`] ties one [`ResourceKey`] and one fetcher to an observable
//! [`Snapshot`]. It reads through the runtime's cache, fetches through single-flight,
//! optionally polls, and applies responses only while its mount generation is live.
//!
//! ## Stale-while-revalidate
//!
//! After [`invalidate`](Subscription::invalidate) or TTL expiry, [`read`](Subscription::read)
//! reports [`Status::Loading`] while still serving the last good value, and a
//! background revalidation is started. [`SubscribeOptions::clear_on_invalidate`]
//! drops the value on invalidation instead.
//!
//! ## Errors
//!
//! - network, timeout and 5xx: `Error` status with the last good value kept;
//! - 401: the cache entry is cleared, the status becomes `Idle` with no value and
//!   no error, and the runtime broadcasts an [`AuthEvent`](crate::runtime::AuthEvent);
//! - 403 and the rest: `Error` status, not retryable.
//!
//! ## Teardown
//!
//! [`teardown`](Subscription::teardown) stops the poller and bumps the generation.
//! Requests already in flight still complete and still populate the cache, but
//! their results are never applied. Dropping the last handle tears down too.

use std::{
    fmt,
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::sync::watch;

use crate::{
    cache::CacheGetOptions,
    errors::{SyncError, SyncResult},
    guard::{MountGuard, MountToken},
    key::ResourceKey,
    platform::Instant,
    runtime::{
        SyncRuntime,
        persist::{self, Persistence},
    },
    state::{Snapshot, Status},
    types::{Fetcher, ResourceValue},
};

/// TTL used by [`SubscribeOptions::default`].
pub const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);

/// Options accepted by [`SyncRuntime::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// `None` keeps entries valid until invalidated.
    pub ttl: Option<Duration>,
    pub poll: Option<Duration>,
    pub fetch_on_create: bool,
    pub clear_on_invalidate: bool,
    pub allow_stale_on_failure: bool,
}

impl SubscribeOptions {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            ttl,
            poll: None,
            fetch_on_create: true,
            clear_on_invalidate: false,
            allow_stale_on_failure: false,
        }
    }

    /// Refetch every `interval` while subscribed.
    pub fn with_poll(mut self, interval: Duration) -> Self {
        self.poll = Some(interval);
        self
    }

    /// Start `Idle` instead of fetching when the cache has nothing valid.
    pub fn without_fetch_on_create(mut self) -> Self {
        self.fetch_on_create = false;
        self
    }

    /// Drop the value on invalidation instead of serving it while revalidating.
    pub fn clear_on_invalidate(mut self) -> Self {
        self.clear_on_invalidate = true;
        self
    }

    /// Serve an expired cache entry when a fetch fails and no value is held.
    pub fn allow_stale_on_failure(mut self) -> Self {
        self.allow_stale_on_failure = true;
        self
    }
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self::new(Some(DEFAULT_TTL))
    }
}

struct Inner<T: ResourceValue> {
    id: u64,
    runtime: SyncRuntime,
    key: RwLock<ResourceKey>,
    fetcher: Arc<dyn Fetcher<T>>,
    options: SubscribeOptions,
    persistence: Option<Persistence<T>>,
    guard: MountGuard,
    state: watch::Sender<Snapshot<T>>,
    torn_down: AtomicBool,
}

impl<T: ResourceValue> Inner<T> {
    fn current_key(&self) -> ResourceKey {
        match self.key.read() {
            Ok(key) => key.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_key(&self, key: ResourceKey) {
        match self.key.write() {
            Ok(mut current) => *current = key,
            Err(poisoned) => *poisoned.into_inner() = key,
        }
    }

    /// Fill a cold cache entry for `key` from client storage.
    fn hydrate(&self, key: &ResourceKey) {
        if let Some(persistence) = &self.persistence {
            persistence.hydrate(self.runtime.storage(), self.runtime.cache(), key);
        }
    }

    fn forget_persisted(&self, key: &ResourceKey) {
        if self.persistence.is_some() {
            persist::forget(self.runtime.storage(), key);
        }
    }
}

impl<T: ResourceValue> Drop for Inner<T> {
    fn drop(&mut self) {
        if !self.torn_down.swap(true, Ordering::SeqCst) {
            self.runtime.scheduler().stop_owner(self.id);
            self.guard.bump();
            crate::debug_log!("Subscription {} dropped", self.id);
        }
    }
}

/// Handle to one subscription. Clones share state.
pub struct Subscription<T: ResourceValue> {
    inner: Arc<Inner<T>>,
}

impl<T: ResourceValue> Clone for Subscription<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: ResourceValue> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.inner.id)
            .field("key", &self.inner.current_key())
            .field("generation", &self.inner.guard.generation())
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}

impl<T: ResourceValue> Subscription<T> {
    pub(crate) fn new(
        runtime: SyncRuntime,
        key: ResourceKey,
        fetcher: Arc<dyn Fetcher<T>>,
        options: SubscribeOptions,
        persistence: Option<Persistence<T>>,
    ) -> Self {
        let id = runtime.next_subscription_id();
        if let Some(persistence) = &persistence {
            persistence.hydrate(runtime.storage(), runtime.cache(), &key);
        }
        let cached = runtime
            .cache()
            .get::<T>(&key)
            .filter(|entry| entry.is_valid());
        let needs_fetch = cached.is_none() && options.fetch_on_create;
        let initial = match cached {
            Some(entry) => Snapshot::ready(entry.value, entry.fetched_at),
            None if needs_fetch => Snapshot {
                status: Status::Loading,
                ..Snapshot::idle()
            },
            None => Snapshot::idle(),
        };
        let (state, _) = watch::channel(initial);

        crate::debug_log!("Subscription {} created for {}", id, key);
        let subscription = Self {
            inner: Arc::new(Inner {
                id,
                runtime,
                key: RwLock::new(key),
                fetcher,
                options,
                persistence,
                guard: MountGuard::new(),
                state,
                torn_down: AtomicBool::new(false),
            }),
        };

        if needs_fetch {
            subscription.spawn_refresh(false);
        }
        subscription.start_polling();
        subscription
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn key(&self) -> ResourceKey {
        self.inner.current_key()
    }

    pub fn options(&self) -> &SubscribeOptions {
        &self.inner.options
    }

    pub fn is_torn_down(&self) -> bool {
        self.inner.torn_down.load(Ordering::SeqCst)
    }

    /// Current mount generation.
    pub fn generation(&self) -> u64 {
        self.inner.guard.generation()
    }

    /// Current state.
    ///
    /// If the value is `Ready` but its cache entry is no longer valid, the snapshot
    /// moves to `Loading` (value kept) and a background revalidation starts.
    pub fn read(&self) -> Snapshot<T> {
        if self.is_torn_down() {
            return self.inner.state.borrow().clone();
        }

        let key = self.key();
        let expired = self.inner.state.borrow().status == Status::Ready
            && !self.inner.runtime.cache().is_valid(&key);
        if expired {
            let transitioned = self.inner.state.send_if_modified(|snapshot| {
                if snapshot.status != Status::Ready {
                    return false;
                }
                snapshot.status = Status::Loading;
                true
            });
            if transitioned {
                crate::debug_log!("{} expired, revalidating in background", key);
                self.spawn_refresh(false);
            }
        }
        self.inner.state.borrow().clone()
    }

    /// Current state without the expiry check of [`read`](Self::read).
    pub fn peek(&self) -> Snapshot<T> {
        self.inner.state.borrow().clone()
    }

    /// Receiver notified on every applied state change.
    pub fn changes(&self) -> watch::Receiver<Snapshot<T>> {
        self.inner.state.subscribe()
    }

    /// Load the value, fetching unless `force` is false and the cache holds a valid entry.
    ///
    /// A forced refresh bypasses the TTL but still joins an in-flight call for the key.
    /// Returns [`SyncError::Superseded`] if the subscription was torn down or re-keyed
    /// before the response arrived; the response is then not applied.
    pub async fn refresh(&self, force: bool) -> SyncResult<T> {
        if self.is_torn_down() {
            return Err(SyncError::Superseded);
        }
        // token before key: a concurrent re-key sets the key before bumping
        let token = self.inner.guard.new_token();
        let key = self.key();

        if !force {
            if let Some(entry) = self
                .inner
                .runtime
                .cache()
                .get::<T>(&key)
                .filter(|entry| entry.is_valid())
            {
                self.apply_ready(token, entry.value.clone(), entry.fetched_at);
                return Ok(entry.value);
            }
        }

        self.mark_loading(token);
        let result = self
            .inner
            .runtime
            .fetch_with(
                &key,
                self.inner.options.ttl,
                self.inner.fetcher.as_ref(),
                self.inner.persistence,
            )
            .await;

        if !self.inner.guard.is_current(token) {
            crate::log_discard!(
                "Response for {} arrived after generation {} ended",
                key,
                token.generation()
            );
            return Err(SyncError::Superseded);
        }

        match result {
            Ok(value) => {
                self.apply_ready(token, value.clone(), Instant::now());
                Ok(value)
            }
            Err(err) => {
                self.apply_error(token, &key, &err);
                Err(err)
            }
        }
    }

    /// Drop the cache entry and revalidate in the background.
    pub fn invalidate(&self) {
        if self.is_torn_down() {
            return;
        }
        let key = self.key();
        self.inner.runtime.invalidate(&key);
        self.inner.forget_persisted(&key);

        let clear = self.inner.options.clear_on_invalidate;
        self.inner.state.send_modify(|snapshot| {
            snapshot.status = Status::Loading;
            snapshot.error = None;
            if clear {
                snapshot.value = None;
                snapshot.fetched_at = None;
            }
        });
        self.spawn_refresh(true);
    }

    /// Stop polling and discard every in-flight response. Cache entries are kept.
    pub fn teardown(&self) {
        if self.inner.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.runtime.scheduler().stop_owner(self.inner.id);
        let generation = self.inner.guard.bump();
        crate::debug_log!(
            "Subscription {} torn down (generation {})",
            self.inner.id,
            generation
        );
    }

    /// Mount again after [`teardown`](Self::teardown), in a new generation.
    pub fn remount(&self) {
        if !self.inner.torn_down.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.guard.bump();
        self.start_polling();
        if self.inner.options.fetch_on_create {
            self.spawn_refresh(false);
        }
    }

    /// Switch to a new key (new request parameters) and load it.
    ///
    /// Responses for the previous key are discarded even if they arrive later.
    pub async fn rekey(&self, key: ResourceKey) -> SyncResult<T> {
        if self.is_torn_down() {
            return Err(SyncError::Superseded);
        }
        if key == self.key() {
            return self.refresh(false).await;
        }

        self.inner.set_key(key.clone());
        self.inner.guard.bump();
        crate::debug_log!("Subscription {} re-keyed to {}", self.inner.id, key);

        self.inner.hydrate(&key);
        let initial = match self
            .inner
            .runtime
            .cache()
            .get::<T>(&key)
            .filter(|entry| entry.is_valid())
        {
            Some(entry) => Snapshot::ready(entry.value, entry.fetched_at),
            None => Snapshot {
                status: Status::Loading,
                ..Snapshot::idle()
            },
        };
        self.inner.state.send_replace(initial);
        self.start_polling();
        self.refresh(false).await
    }

    /// Token for a write issued outside [`refresh`](Self::refresh).
    pub(crate) fn capture_token(&self) -> MountToken {
        self.inner.guard.new_token()
    }

    /// Store `value` in the cache and apply it, unless `token` is stale.
    pub(crate) fn commit(&self, token: MountToken, value: T) -> bool {
        if !self.inner.guard.is_current(token) {
            crate::log_discard!("Commit for {} from an ended generation", self.key());
            return false;
        }
        let key = self.key();
        let ttl = self.inner.options.ttl;
        self.inner.runtime.store(&key, value.clone(), ttl);
        if let Some(persistence) = &self.inner.persistence {
            persistence.save(self.inner.runtime.storage(), &key, &value, ttl);
        }
        self.apply_ready(token, value, Instant::now())
    }

    /// Show a value restored from persisted storage. The cache is not written, so
    /// the next [`read`](Self::read) revalidates it.
    pub(crate) fn seed(&self, value: T) {
        self.inner.state.send_modify(|snapshot| {
            snapshot.value = Some(value);
            snapshot.status = Status::Ready;
            snapshot.error = None;
            snapshot.fetched_at = None;
        });
    }

    /// Drop the cache entry and the held value without fetching, in a new
    /// generation so that pending writes are discarded.
    pub(crate) fn clear(&self) {
        self.inner.guard.bump();
        let key = self.key();
        self.inner.runtime.invalidate(&key);
        self.inner.forget_persisted(&key);
        self.inner.state.send_replace(Snapshot::idle());
    }

    fn spawn_refresh(&self, force: bool) {
        let subscription = self.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let _ = subscription.refresh(force).await;
                });
            }
            Err(_) => {
                crate::warn_log!(
                    "No tokio runtime; {} will load on the next explicit refresh",
                    self.key()
                );
            }
        }
    }

    fn start_polling(&self) {
        let Some(interval) = self.inner.options.poll else {
            return;
        };

        let busy_check = Arc::downgrade(&self.inner);
        let single_flight = self.inner.runtime.single_flight().clone();
        let busy = move || {
            busy_check
                .upgrade()
                .is_some_and(|inner| single_flight.is_in_flight(&inner.current_key()))
        };

        let target = Arc::downgrade(&self.inner);
        let tick = move || {
            let target = target.clone();
            async move {
                if let Some(inner) = target.upgrade() {
                    let _ = Subscription { inner }.refresh(true).await;
                }
            }
        };

        self.inner
            .runtime
            .scheduler()
            .start(self.inner.id, interval, busy, tick);
    }

    fn mark_loading(&self, token: MountToken) {
        let guard = &self.inner.guard;
        self.inner.state.send_if_modified(|snapshot| {
            if !guard.is_current(token) || snapshot.status == Status::Loading {
                return false;
            }
            snapshot.status = Status::Loading;
            snapshot.error = None;
            true
        });
    }

    fn apply_ready(&self, token: MountToken, value: T, fetched_at: Instant) -> bool {
        let guard = &self.inner.guard;
        self.inner.state.send_if_modified(|snapshot| {
            if !guard.is_current(token) {
                return false;
            }
            *snapshot = Snapshot::ready(value, fetched_at);
            true
        })
    }

    fn apply_error(&self, token: MountToken, key: &ResourceKey, err: &SyncError) {
        let guard = &self.inner.guard;
        if err.clears_cache() {
            self.inner.state.send_if_modified(|snapshot| {
                if !guard.is_current(token) {
                    return false;
                }
                *snapshot = Snapshot::idle();
                true
            });
            return;
        }

        let fallback = if self.inner.options.allow_stale_on_failure {
            self.inner
                .runtime
                .cache()
                .get_with_options::<T>(key, CacheGetOptions::new().allow_stale())
        } else {
            None
        };

        self.inner.state.send_if_modified(|snapshot| {
            if !guard.is_current(token) {
                return false;
            }
            snapshot.status = Status::Error;
            snapshot.error = Some(err.clone());
            if snapshot.value.is_none() {
                if let Some(stale) = fallback {
                    crate::debug_log!("Serving stale {} after failed fetch", key);
                    snapshot.value = Some(stale.data);
                }
            }
            true
        });
    }
}
