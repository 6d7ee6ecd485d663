//! State: observable state of one subscription
//!
//! This module provides [`Status`], the [`Snapshot`] returned by
//! [`Subscription::read`](crate::subscription::Subscription::read), and the
//! [`AsyncState`] trait shared with the cart and checkout views.

use crate::{errors::SyncError, platform::Instant};

/// Common trait for async state types that represent loading, success, and error states
pub trait AsyncState {
    /// The type of successful data
    type Data;
    /// The type of error
    type Error;

    /// Returns true if the state is currently loading
    fn is_loading(&self) -> bool;

    /// Returns true if the state holds fresh data
    fn is_ready(&self) -> bool;

    /// Returns true if the state contains an error
    fn is_error(&self) -> bool;

    /// Returns the data if any is available (possibly stale while loading)
    fn data(&self) -> Option<&Self::Data>;

    /// Returns the error if failed, None otherwise
    fn error(&self) -> Option<&Self::Error>;
}

/// Lifecycle status of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Status {
    /// Nothing requested yet, or cleared after a 401.
    #[default]
    Idle,
    /// A fetch is outstanding; `value` may still hold the last good value.
    Loading,
    /// `value` holds data within its TTL.
    Ready,
    /// The last fetch failed; `value` may still hold the last good value.
    Error,
}

/// Point-in-time view of a subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<T> {
    /// The last good value, if any.
    pub value: Option<T>,
    pub status: Status,
    /// Set only when `status` is [`Status::Error`].
    pub error: Option<SyncError>,
    /// When `value` was fetched.
    pub fetched_at: Option<Instant>,
}

impl<T> Default for Snapshot<T> {
    fn default() -> Self {
        Self::idle()
    }
}

impl<T> Snapshot<T> {
    pub fn idle() -> Self {
        Self {
            value: None,
            status: Status::Idle,
            error: None,
            fetched_at: None,
        }
    }

    pub fn ready(value: T, fetched_at: Instant) -> Self {
        Self {
            value: Some(value),
            status: Status::Ready,
            error: None,
            fetched_at: Some(fetched_at),
        }
    }

    /// Whether the value is being served while a revalidation is outstanding.
    pub fn is_revalidating(&self) -> bool {
        self.status == Status::Loading && self.value.is_some()
    }

    /// Whether a transient-error banner with a retry action should be shown.
    pub fn is_retryable_error(&self) -> bool {
        self.error.as_ref().is_some_and(SyncError::is_retryable)
    }

    /// Maps a `Snapshot<T>` to `Snapshot<U>` by applying a function to the value.
    pub fn map<U, F>(self, op: F) -> Snapshot<U>
    where
        F: FnOnce(T) -> U,
    {
        Snapshot {
            value: self.value.map(op),
            status: self.status,
            error: self.error,
            fetched_at: self.fetched_at,
        }
    }
}

impl<T> AsyncState for Snapshot<T> {
    type Data = T;
    type Error = SyncError;

    fn is_loading(&self) -> bool {
        self.status == Status::Loading
    }

    fn is_ready(&self) -> bool {
        self.status == Status::Ready
    }

    fn is_error(&self) -> bool {
        self.status == Status::Error
    }

    fn data(&self) -> Option<&T> {
        self.value.as_ref()
    }

    fn error(&self) -> Option<&SyncError> {
        self.error.as_ref()
    }
}
