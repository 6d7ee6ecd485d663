//! Checkout lifecycle and post-payment reconciliation.
//!
//! ```text
//! Empty ⇄ Populated → CheckoutInitiated → AwaitingProvider → Reconciling → Completed
//!                              ↑                  │
//!                              └──── cancel ──────┘
//! ```
//!
//! Before the payment redirect URL is handed out, a [`PendingOrderSnapshot`] of the
//! cart is persisted. When the provider redirects back with a session id, the order is
//! completed (idempotently, coalesced per session), looked up in the order history,
//! and the displayed order is merged from three sources in priority order:
//!
//! 1. the backend's order record,
//! 2. the snapshot,
//! 3. defaults (`status = Completed`).
//!
//! The history record may be missing or incomplete for a short window after payment;
//! the snapshot fills the gaps. After the merge, the snapshot and the cart are cleared
//! whatever the merge used.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::watch;
use url::Url;

use crate::{
    backend::StorefrontApi,
    cart::CartStore,
    errors::{CheckoutError, StockViolation, SyncError, SyncResult},
    key::ResourceKey,
    models::{
        Cart, CompleteOrderResponse, OrderItem, OrderRecord, OrderStatus, PendingOrderSnapshot,
    },
    storage::{ClientStorage, PENDING_ORDER_KEY},
    types::FetchFuture,
};

/// Single-flight resource for order completion, keyed by session id.
pub const COMPLETE_ORDER_RESOURCE: &str = "complete-order";

/// The order shown on the confirmation screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayedOrder {
    pub order_id: u64,
    pub status: OrderStatus,
    pub items: Vec<OrderItem>,
    pub total_price: Decimal,
    pub total_item_count: u32,
    pub placed_at: Option<DateTime<Utc>>,
    /// Message returned by the completion call.
    pub message: String,
    /// Whether a history record for the order was found.
    pub from_history: bool,
    /// Whether any field was filled from the snapshot.
    pub used_snapshot: bool,
}

/// Merge the completion response, the history record and the snapshot.
///
/// History fields win over snapshot fields, which win over defaults. An empty item
/// list in the history record counts as missing.
pub fn reconcile_order(
    completion: &CompleteOrderResponse,
    record: Option<&OrderRecord>,
    snapshot: Option<&PendingOrderSnapshot>,
) -> DisplayedOrder {
    let mut used_snapshot = false;

    let history_items = record
        .and_then(|record| record.items.clone())
        .filter(|items| !items.is_empty());
    let (items, total_item_count) = match (history_items, snapshot) {
        (Some(items), _) => {
            let count = items.iter().map(|item| item.quantity).sum();
            (items, count)
        }
        (None, Some(snapshot)) => {
            used_snapshot = true;
            let items = snapshot.items.iter().map(OrderItem::from).collect();
            (items, snapshot.total_item_count)
        }
        (None, None) => (Vec::new(), 0),
    };

    let total_price = match (record.and_then(|record| record.total_price), snapshot) {
        (Some(total), _) => total,
        (None, Some(snapshot)) => {
            used_snapshot = true;
            snapshot.total_price
        }
        (None, None) => Decimal::ZERO,
    };

    let placed_at = match (record.and_then(|record| record.created_at), snapshot) {
        (Some(created), _) => Some(created),
        (None, Some(snapshot)) => {
            used_snapshot = true;
            Some(snapshot.captured_at)
        }
        (None, None) => None,
    };

    DisplayedOrder {
        order_id: completion.order_id,
        status: record
            .and_then(|record| record.status)
            .unwrap_or(OrderStatus::Completed),
        items,
        total_price,
        total_item_count,
        placed_at,
        message: completion.message.clone(),
        from_history: record.is_some(),
        used_snapshot,
    }
}

/// Where the payment provider sent the user back to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderReturn {
    Success { session_id: String },
    Cancel { session_id: Option<String> },
}

impl ProviderReturn {
    /// Decode a provider return URL.
    ///
    /// The outcome comes from a `status` query parameter if present, otherwise from
    /// the last path segment (`.../success`, `.../cancel`). A success needs a
    /// `session_id` query parameter. Relative URLs are accepted.
    ///
    /// ```rust
    /// use storefront_sync::checkout::ProviderReturn;
    ///
    /// let ret = ProviderReturn::parse("/checkout/success?session_id=sess_1").unwrap();
    /// assert_eq!(ret, ProviderReturn::Success { session_id: "sess_1".into() });
    /// ```
    pub fn parse(return_url: &str) -> Result<Self, CheckoutError> {
        let unrecognised = || CheckoutError::UnrecognisedReturn(return_url.to_string());
        let base = Url::parse("http://return.invalid/").ok();
        let url = Url::options()
            .base_url(base.as_ref())
            .parse(return_url)
            .map_err(|_| unrecognised())?;

        let mut session_id = None;
        let mut status = None;
        for (name, value) in url.query_pairs() {
            match name.as_ref() {
                "session_id" if !value.is_empty() => session_id = Some(value.into_owned()),
                "status" => status = Some(value.into_owned()),
                _ => {}
            }
        }
        let last_segment = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|segment| !segment.is_empty());

        match status.as_deref().or(last_segment) {
            Some("success") => session_id
                .map(|session_id| Self::Success { session_id })
                .ok_or_else(unrecognised),
            Some("cancel" | "cancelled" | "canceled") => Ok(Self::Cancel { session_id }),
            _ => Err(unrecognised()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckoutState {
    Empty,
    Populated,
    /// Validating the cart and creating the payment session.
    CheckoutInitiated,
    /// The user is with the payment provider.
    AwaitingProvider { checkout_url: Option<String> },
    /// Completing the order. `last_error` is set while a failed attempt awaits retry.
    Reconciling {
        session_id: String,
        attempts: u32,
        last_error: Option<SyncError>,
    },
    Completed {
        session_id: String,
        order: DisplayedOrder,
    },
}

impl CheckoutState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Populated => "populated",
            Self::CheckoutInitiated => "initiating checkout",
            Self::AwaitingProvider { .. } => "awaiting the payment provider",
            Self::Reconciling { .. } => "reconciling",
            Self::Completed { .. } => "completed",
        }
    }

    fn from_cart(cart: Option<&Cart>) -> Self {
        match cart {
            Some(cart) if !cart.is_empty() => Self::Populated,
            _ => Self::Empty,
        }
    }
}

/// Redirect target handed to the view after a successful initiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutRedirect {
    pub checkout_url: String,
    pub snapshot: PendingOrderSnapshot,
}

struct LifecycleInner<A: StorefrontApi> {
    cart: CartStore<A>,
    state: watch::Sender<CheckoutState>,
}

/// Drives a cart through checkout. Clones share state.
pub struct CheckoutLifecycle<A: StorefrontApi> {
    inner: Arc<LifecycleInner<A>>,
}

impl<A: StorefrontApi> Clone for CheckoutLifecycle<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: StorefrontApi> CheckoutLifecycle<A> {
    /// Create the lifecycle for `cart`, restoring `AwaitingProvider` if a snapshot
    /// from an earlier process is still persisted and was not cancelled.
    pub fn new(cart: CartStore<A>) -> Self {
        let initial = CheckoutState::from_cart(cart.cart().as_ref());
        let (state, _) = watch::channel(initial);
        let lifecycle = Self {
            inner: Arc::new(LifecycleInner { cart, state }),
        };
        lifecycle.restore();
        lifecycle
    }

    pub fn state(&self) -> CheckoutState {
        self.inner.state.borrow().clone()
    }

    pub fn changes(&self) -> watch::Receiver<CheckoutState> {
        self.inner.state.subscribe()
    }

    pub fn cart(&self) -> &CartStore<A> {
        &self.inner.cart
    }

    /// The persisted snapshot, if any.
    pub fn pending_snapshot(&self) -> Option<PendingOrderSnapshot> {
        match self.storage().load::<PendingOrderSnapshot>(PENDING_ORDER_KEY) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                crate::warn_log!("Ignoring unreadable pending order snapshot: {}", err);
                None
            }
        }
    }

    /// Re-derive the idle state from the cart and the persisted snapshot.
    ///
    /// Only `Empty` and `Populated` are re-derived; other states are left alone. A
    /// cancelled snapshot yields `Populated` until the cart says otherwise.
    pub fn restore(&self) -> CheckoutState {
        if matches!(self.state(), CheckoutState::Empty | CheckoutState::Populated) {
            let next = match self.pending_snapshot() {
                Some(snapshot) if snapshot.cancelled => match self.inner.cart.cart() {
                    Some(cart) => CheckoutState::from_cart(Some(&cart)),
                    None => CheckoutState::Populated,
                },
                Some(snapshot) => {
                    crate::log_checkout!("Restored pending checkout from snapshot");
                    CheckoutState::AwaitingProvider {
                        checkout_url: snapshot.checkout_url,
                    }
                }
                None => CheckoutState::from_cart(self.inner.cart.cart().as_ref()),
            };
            self.set_state(next);
        }
        self.state()
    }

    /// Validate the cart, create the payment session and persist the snapshot.
    ///
    /// Returns the URL to send the user to. Nothing is persisted if validation or
    /// session creation fails.
    pub async fn begin_checkout(&self) -> Result<CheckoutRedirect, CheckoutError> {
        let current = self.state();
        if matches!(
            current,
            CheckoutState::CheckoutInitiated | CheckoutState::Reconciling { .. }
        ) {
            return Err(CheckoutError::InvalidState(current.label()));
        }

        let cart = self.inner.cart.revalidate().await?;
        if cart.is_empty() {
            self.set_state(CheckoutState::Empty);
            return Err(CheckoutError::EmptyCart);
        }
        let violations = stock_violations(&cart);
        if !violations.is_empty() {
            self.set_state(CheckoutState::Populated);
            return Err(CheckoutError::InsufficientStock(violations));
        }

        self.set_state(CheckoutState::CheckoutInitiated);
        let session = match self.inner.cart.api().create_checkout().await {
            Ok(session) => session,
            Err(err) => {
                self.set_state(CheckoutState::Populated);
                return Err(err.into());
            }
        };

        let snapshot = PendingOrderSnapshot::capture(&cart, Some(session.checkout_url.clone()));
        if let Err(err) = self.storage().save(PENDING_ORDER_KEY, &snapshot) {
            self.set_state(CheckoutState::Populated);
            return Err(err.into());
        }

        crate::log_checkout!(
            "Checkout initiated: {} item(s), total {}",
            snapshot.total_item_count,
            snapshot.total_price
        );
        self.set_state(CheckoutState::AwaitingProvider {
            checkout_url: Some(session.checkout_url.clone()),
        });
        Ok(CheckoutRedirect {
            checkout_url: session.checkout_url,
            snapshot,
        })
    }

    /// Handle the provider's return URL.
    pub async fn handle_return(&self, return_url: &str) -> Result<CheckoutState, CheckoutError> {
        match ProviderReturn::parse(return_url)? {
            ProviderReturn::Success { session_id } => {
                self.complete(&session_id).await?;
                Ok(self.state())
            }
            ProviderReturn::Cancel { .. } => self.cancel().await,
        }
    }

    /// Complete the order for `session_id` and produce the displayed order.
    ///
    /// Safe to call repeatedly: concurrent calls for one session share a single
    /// completion and merge, and a call for an already completed session returns the
    /// same order.
    pub async fn complete(&self, session_id: &str) -> Result<DisplayedOrder, CheckoutError> {
        if let Some(order) = self.completed_order(session_id) {
            return Ok(order);
        }

        let attempts = match self.state() {
            CheckoutState::Reconciling {
                session_id: current,
                attempts,
                last_error,
            } if current == session_id => {
                // joining an attempt that is still running
                if last_error.is_none() {
                    attempts
                } else {
                    attempts + 1
                }
            }
            _ => 1,
        };
        self.set_state(CheckoutState::Reconciling {
            session_id: session_id.to_string(),
            attempts,
            last_error: None,
        });
        crate::log_checkout!("Completing order for {} (attempt {})", session_id, attempts);

        let key = ResourceKey::builder(COMPLETE_ORDER_RESOURCE)
            .param("session_id", session_id)
            .build();
        let lifecycle = self.clone();
        let session = session_id.to_string();
        let result = self
            .inner
            .cart
            .runtime()
            .single_flight()
            .run(&key, move || -> FetchFuture<DisplayedOrder> {
                Box::pin(async move { lifecycle.settle_session(&session).await })
            })
            .await;

        result.map_err(|err| {
            crate::warn_log!("Order completion for {} failed: {}", session_id, err);
            self.set_state(CheckoutState::Reconciling {
                session_id: session_id.to_string(),
                attempts,
                last_error: Some(err.clone()),
            });
            err.into()
        })
    }

    /// Re-issue the completion for the session currently being reconciled.
    pub async fn retry_completion(&self) -> Result<DisplayedOrder, CheckoutError> {
        match self.state() {
            CheckoutState::Reconciling { session_id, .. } => self.complete(&session_id).await,
            other => Err(CheckoutError::InvalidState(other.label())),
        }
    }

    /// The user abandoned payment.
    ///
    /// The snapshot is kept while the server-side cart is still populated and cleared
    /// once it is empty. Nothing is sent to the backend besides `GET /cart`.
    pub async fn cancel(&self) -> Result<CheckoutState, CheckoutError> {
        let current = self.state();
        if matches!(
            current,
            CheckoutState::Reconciling { .. } | CheckoutState::Completed { .. }
        ) {
            return Err(CheckoutError::InvalidState(current.label()));
        }

        match self.inner.cart.revalidate().await {
            Ok(cart) if cart.is_empty() => {
                if let Err(err) = self.storage().remove(PENDING_ORDER_KEY) {
                    crate::warn_log!("Failed to remove pending order snapshot: {}", err);
                }
                crate::log_checkout!("Checkout cancelled, cart is empty");
                self.set_state(CheckoutState::Empty);
            }
            Ok(_) => {
                self.mark_snapshot_cancelled();
                crate::log_checkout!("Checkout cancelled, cart kept");
                self.set_state(CheckoutState::Populated);
            }
            Err(err) => {
                self.set_state(CheckoutState::from_cart(self.inner.cart.cart().as_ref()));
                return Err(err.into());
            }
        }
        Ok(self.state())
    }

    /// Leave `Completed` and follow the cart again.
    pub fn acknowledge(&self) -> CheckoutState {
        if matches!(self.state(), CheckoutState::Completed { .. }) {
            self.set_state(CheckoutState::from_cart(self.inner.cart.cart().as_ref()));
        }
        self.state()
    }

    /// Completion, history lookup and merge for one session. Runs once per
    /// concurrent group of [`complete`](Self::complete) calls.
    async fn settle_session(&self, session_id: &str) -> SyncResult<DisplayedOrder> {
        let api = self.inner.cart.api();
        let completion = api.complete_order(session_id).await?;

        let record = match api.order_history().await {
            Ok(orders) => orders
                .into_iter()
                .find(|order| order.id == completion.order_id),
            Err(err) => {
                crate::warn_log!("Order history unavailable, using snapshot: {}", err);
                None
            }
        };
        let snapshot = self.pending_snapshot();
        let order = reconcile_order(&completion, record.as_ref(), snapshot.as_ref());

        if let Err(err) = self.storage().remove(PENDING_ORDER_KEY) {
            crate::warn_log!("Failed to remove pending order snapshot: {}", err);
        }
        self.inner.cart.reset();

        crate::log_checkout!(
            "Order {} completed (history: {}, snapshot used: {})",
            order.order_id,
            order.from_history,
            order.used_snapshot
        );
        self.set_state(CheckoutState::Completed {
            session_id: session_id.to_string(),
            order: order.clone(),
        });
        Ok(order)
    }

    fn completed_order(&self, session_id: &str) -> Option<DisplayedOrder> {
        match &*self.inner.state.borrow() {
            CheckoutState::Completed {
                session_id: done,
                order,
            } if done == session_id => Some(order.clone()),
            _ => None,
        }
    }

    /// Keep the snapshot for a later return but stop treating it as a live redirect.
    fn mark_snapshot_cancelled(&self) {
        let Some(mut snapshot) = self.pending_snapshot() else {
            return;
        };
        if snapshot.cancelled {
            return;
        }
        snapshot.cancelled = true;
        if let Err(err) = self.storage().save(PENDING_ORDER_KEY, &snapshot) {
            crate::warn_log!("Failed to mark pending order snapshot cancelled: {}", err);
        }
    }

    fn storage(&self) -> &ClientStorage {
        self.inner.cart.runtime().storage()
    }

    fn set_state(&self, next: CheckoutState) {
        self.inner.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            crate::debug_log!("Checkout: {} -> {}", state.label(), next.label());
            *state = next;
            true
        });
    }
}

fn stock_violations(cart: &Cart) -> Vec<StockViolation> {
    cart.items
        .iter()
        .filter(|item| item.quantity > item.stock)
        .map(|item| StockViolation {
            product_id: item.product_id,
            name: item.name.clone(),
            requested: item.quantity,
            available: item.stock,
        })
        .collect()
}
