//! The active cart.
//!
//! [`CartStore`] is a subscription consumer under the fixed key [`CART_RESOURCE`].
//! Mutations are pessimistic: each one awaits the backend's canonical cart and
//! replaces local state with it, then writes it to the cache and to persisted
//! storage ([`CART_CACHE_KEY`]) so a reload shows the last-known cart before the
//! first round trip.
//!
//! Mutations on one store are serialized: a second mutation waits for the first
//! response before it is sent. An identity change starts a new cart generation, so a
//! mutation response that arrives afterwards is discarded.

use std::{sync::Arc, time::Duration};

use rust_decimal::Decimal;
use tokio::sync::Mutex;

use crate::{
    backend::StorefrontApi,
    errors::{SyncError, SyncResult},
    guard::MountToken,
    key::ResourceKey,
    models::Cart,
    runtime::SyncRuntime,
    state::{Snapshot, Status},
    storage::{CART_CACHE_KEY, ClientStorage},
    subscription::Subscription,
};

/// Cache key resource for the active cart.
pub const CART_RESOURCE: &str = "cart";

/// Stored quantity for a request of `quantity` against `stock`.
///
/// Callers must reject `stock == 0` before clamping.
pub fn clamp_quantity(quantity: u32, stock: u32) -> u32 {
    quantity.min(stock).max(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartState {
    Empty,
    Populated,
}

struct CartInner<A: StorefrontApi> {
    api: A,
    runtime: SyncRuntime,
    storage: ClientStorage,
    persist_ttl: Duration,
    subscription: Subscription<Cart>,
    mutations: Mutex<()>,
}

/// Handle to the active cart. Clones share state.
pub struct CartStore<A: StorefrontApi> {
    inner: Arc<CartInner<A>>,
}

impl<A: StorefrontApi> Clone for CartStore<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: StorefrontApi> CartStore<A> {
    /// Create the store. Nothing is fetched until [`load`](Self::load) or a mutation.
    pub fn new(runtime: &SyncRuntime, api: A) -> Self {
        let options = runtime
            .config()
            .policies()
            .cart
            .options()
            .without_fetch_on_create();
        let fetch_api = api.clone();
        let subscription = runtime.subscribe(
            ResourceKey::new(CART_RESOURCE),
            move || {
                let api = fetch_api.clone();
                async move { api.get_cart().await }
            },
            options,
        );

        Self {
            inner: Arc::new(CartInner {
                api,
                runtime: runtime.clone(),
                storage: runtime.storage().clone(),
                persist_ttl: runtime.config().cart_persist_ttl(),
                subscription,
                mutations: Mutex::new(()),
            }),
        }
    }

    /// Restore the persisted cart, if one younger than the persist TTL exists.
    ///
    /// The restored cart is shown until the next [`revalidate`](Self::revalidate).
    pub fn hydrate(&self) -> Option<Cart> {
        match self.inner.storage.load_fresh::<Cart>(CART_CACHE_KEY) {
            Ok(Some(cart)) => {
                crate::log_cart!("Hydrated {} item(s) from storage", cart.items.len());
                self.inner.subscription.seed(cart.clone());
                Some(cart)
            }
            Ok(None) => None,
            Err(err) => {
                crate::warn_log!("Discarding unreadable persisted cart: {}", err);
                let _ = self.inner.storage.remove(CART_CACHE_KEY);
                None
            }
        }
    }

    /// Hydrate from storage, then fetch the authoritative cart.
    pub async fn load(&self) -> SyncResult<Cart> {
        if self.inner.subscription.peek().value.is_none() {
            self.hydrate();
        }
        self.revalidate().await
    }

    /// Force a `GET /cart` and replace local state with the response.
    pub async fn revalidate(&self) -> SyncResult<Cart> {
        let _serialized = self.inner.mutations.lock().await;
        self.revalidate_locked().await
    }

    async fn revalidate_locked(&self) -> SyncResult<Cart> {
        let result = self.inner.subscription.refresh(true).await;
        match &result {
            Ok(cart) => self.persist(cart),
            Err(err) if err.clears_cache() => self.forget_persisted(),
            Err(_) => {}
        }
        result
    }

    /// Add `quantity` of a product with `stock` units available.
    ///
    /// If the product is already in the cart, the line's quantity is increased
    /// instead. The resulting quantity is clamped to `1..=stock`.
    pub async fn add_item(&self, product_id: u64, quantity: u32, stock: u32) -> SyncResult<Cart> {
        if stock == 0 {
            return Err(SyncError::Conflict(format!(
                "product #{product_id} is out of stock"
            )));
        }
        let _serialized = self.inner.mutations.lock().await;

        let existing = self
            .cart()
            .and_then(|cart| cart.item_for_product(product_id).cloned());
        let token = self.inner.subscription.capture_token();
        let response = match existing {
            Some(item) => {
                let target = clamp_quantity(item.quantity.saturating_add(quantity), stock);
                crate::log_cart!("Raising item {} to {}", item.id, target);
                self.inner.api.update_cart_item(item.id, target).await
            }
            None => {
                let target = clamp_quantity(quantity, stock);
                crate::log_cart!("Adding product {} x{}", product_id, target);
                self.inner.api.add_cart_item(product_id, target).await
            }
        };
        self.apply_mutation(token, response).await
    }

    /// Set a line's quantity. Zero removes the line.
    pub async fn set_quantity(&self, item_id: u64, quantity: u32) -> SyncResult<Cart> {
        if quantity == 0 {
            return self.remove_item(item_id).await;
        }
        let _serialized = self.inner.mutations.lock().await;

        let Some(item) = self.cart().and_then(|cart| cart.item(item_id).cloned()) else {
            let _ = self.revalidate_locked().await;
            return Err(SyncError::Conflict(format!("item {item_id} is not in the cart")));
        };
        if item.stock == 0 {
            let _ = self.revalidate_locked().await;
            return Err(SyncError::Conflict(format!(
                "product #{} is out of stock",
                item.product_id
            )));
        }

        let target = clamp_quantity(quantity, item.stock);
        let token = self.inner.subscription.capture_token();
        crate::log_cart!("Setting item {} to {}", item_id, target);
        let response = self.inner.api.update_cart_item(item_id, target).await;
        self.apply_mutation(token, response).await
    }

    pub async fn remove_item(&self, item_id: u64) -> SyncResult<Cart> {
        let _serialized = self.inner.mutations.lock().await;
        let token = self.inner.subscription.capture_token();
        crate::log_cart!("Removing item {}", item_id);
        let response = self.inner.api.remove_cart_item(item_id).await;
        self.apply_mutation(token, response).await
    }

    /// The signed-in identity changed: drop local cart state and fetch the new one.
    pub async fn on_identity_change(&self) -> SyncResult<Cart> {
        self.reset();
        self.revalidate().await
    }

    /// Clear the cached and persisted cart without contacting the backend.
    ///
    /// Mutations still in flight are discarded when their response arrives.
    pub fn reset(&self) {
        self.inner.subscription.clear();
        self.forget_persisted();
        crate::log_cart!("Cart state reset");
    }

    /// Current state. Unlike [`Subscription::read`], this never starts a background
    /// revalidation, which would race with queued mutations.
    pub fn snapshot(&self) -> Snapshot<Cart> {
        self.inner.subscription.peek()
    }

    pub fn cart(&self) -> Option<Cart> {
        self.snapshot().value
    }

    pub fn state(&self) -> CartState {
        match self.cart() {
            Some(cart) if !cart.is_empty() => CartState::Populated,
            _ => CartState::Empty,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.snapshot().status == Status::Loading
    }

    pub fn total_price(&self) -> Decimal {
        self.cart().map(|cart| cart.total_price).unwrap_or_default()
    }

    pub fn item_count(&self) -> u32 {
        self.cart().map(|cart| cart.total_item_count()).unwrap_or(0)
    }

    pub fn subscription(&self) -> &Subscription<Cart> {
        &self.inner.subscription
    }

    pub(crate) fn api(&self) -> &A {
        &self.inner.api
    }

    pub(crate) fn runtime(&self) -> &SyncRuntime {
        &self.inner.runtime
    }

    async fn apply_mutation(
        &self,
        token: MountToken,
        response: SyncResult<Cart>,
    ) -> SyncResult<Cart> {
        match response {
            Ok(cart) => {
                if !self.inner.subscription.commit(token, cart.clone()) {
                    return Err(SyncError::Superseded);
                }
                self.persist(&cart);
                crate::log_cart!(
                    "Cart now has {} item(s), total {}",
                    cart.total_item_count(),
                    cart.total_price
                );
                Ok(cart)
            }
            Err(err) if err.clears_cache() => {
                self.reset();
                Err(err)
            }
            Err(err) => {
                if err.kind().requires_refetch() {
                    let _ = self.revalidate_locked().await;
                }
                Err(err)
            }
        }
    }

    fn persist(&self, cart: &Cart) {
        if let Err(err) =
            self.inner
                .storage
                .save_with_ttl(CART_CACHE_KEY, cart, self.inner.persist_ttl)
        {
            crate::warn_log!("Failed to persist cart: {}", err);
        }
    }

    fn forget_persisted(&self) {
        if let Err(err) = self.inner.storage.remove(CART_CACHE_KEY) {
            crate::warn_log!("Failed to remove persisted cart: {}", err);
        }
    }
}
