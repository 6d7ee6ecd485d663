//! Common types and aliases used throughout storefront-sync

use std::{future::Future, pin::Pin};

use crate::errors::SyncError;

/// Common trait bounds for values produced by a fetcher and held in the cache
pub trait ResourceValue: Clone + Send + Sync + 'static {}
impl<T> ResourceValue for T where T: Clone + Send + Sync + 'static {}

/// Boxed future returned by type-erased fetchers
pub type FetchFuture<T> = Pin<Box<dyn Future<Output = Result<T, SyncError>> + Send + 'static>>;

/// An injected network function producing one resource value.
///
/// Implemented for any `Fn() -> impl Future<Output = Result<T, SyncError>>` closure, so
/// most call sites pass an `async move` closure capturing their backend handle:
///
/// ```rust,ignore
/// let fetcher = move || {
///     let api = api.clone();
///     async move { api.stock_alerts().await }
/// };
/// ```
pub trait Fetcher<T>: Send + Sync + 'static {
    /// Start one fetch. Each call must issue a fresh request.
    fn fetch(&self) -> FetchFuture<T>;
}

impl<T, F, Fut> Fetcher<T> for F
where
    T: ResourceValue,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
{
    fn fetch(&self) -> FetchFuture<T> {
        Box::pin((self)())
    }
}
