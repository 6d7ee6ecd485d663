mod common;

use std::time::Duration;

use common::{
    ADD_ITEM, COMPLETE_ORDER, CREATE_CHECKOUT, FIRST_ORDER_ID, FakeStorefront, GET_CART,
    UPDATE_ITEM, init_tracing,
};
use rust_decimal::Decimal;
use storefront_sync::{
    cart::{CartState, CartStore},
    checkout::{CheckoutLifecycle, CheckoutState},
    config::SyncConfig,
    errors::{CheckoutError, StockViolation, SyncError},
    models::OrderStatus,
    runtime::SyncRuntime,
    storage::{CART_CACHE_KEY, ClientStorage, PENDING_ORDER_KEY},
};
use tokio::time::sleep;

const MANGO: u64 = 100;
const TEA: u64 = 200;

fn storefront() -> FakeStorefront {
    let api = FakeStorefront::new();
    api.add_product(MANGO, "Mango", Decimal::new(10, 0), 8);
    api.add_product(TEA, "Tea", Decimal::new(25, 0), 2);
    api
}

fn runtime_with(storage: ClientStorage) -> SyncRuntime {
    SyncRuntime::new(SyncConfig::new().without_maintenance(), storage)
}

/// Three mangoes and one tea: 4 items, $55.
async fn fill_cart(cart: &CartStore<FakeStorefront>) {
    cart.add_item(MANGO, 3, 8).await.unwrap();
    cart.add_item(TEA, 1, 2).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn quantities_are_clamped_to_stock() {
    init_tracing();
    let api = storefront();
    let cart = CartStore::new(&SyncRuntime::in_memory(), api.clone());

    let after_add = cart.add_item(MANGO, 12, 8).await.unwrap();
    assert_eq!(after_add.items[0].quantity, 8);

    // adding to an existing line raises it, still clamped
    cart.add_item(MANGO, 1, 8).await.unwrap();
    assert_eq!(cart.item_count(), 8);
    assert_eq!(api.calls(ADD_ITEM), 1);
    assert_eq!(api.calls(UPDATE_ITEM), 1);

    let item_id = cart.cart().unwrap().items[0].id;
    cart.set_quantity(item_id, 0).await.unwrap();
    assert_eq!(cart.state(), CartState::Empty);

    assert!(matches!(
        cart.add_item(TEA, 1, 0).await,
        Err(SyncError::Conflict(_))
    ));
    assert_eq!(api.calls(ADD_ITEM), 1);
}

#[tokio::test(start_paused = true)]
async fn mutations_are_applied_one_at_a_time() {
    let api = storefront();
    let cart = CartStore::new(&SyncRuntime::in_memory(), api.clone());

    let (first, second) = tokio::join!(cart.add_item(MANGO, 1, 8), cart.add_item(MANGO, 1, 8));
    assert!(first.is_ok());
    assert!(second.is_ok());

    // the second add saw the first's response and raised the existing line
    assert_eq!(api.calls(ADD_ITEM), 1);
    assert_eq!(api.calls(UPDATE_ITEM), 1);
    assert_eq!(cart.item_count(), 2);
    assert_eq!(cart.total_price(), Decimal::new(20, 0));
    assert_eq!(api.server_cart(), cart.cart().unwrap());
}

#[tokio::test(start_paused = true)]
async fn persisted_cart_is_shown_before_the_first_fetch() {
    let storage = ClientStorage::in_memory();
    let api = storefront();
    let cart = CartStore::new(&runtime_with(storage.clone()), api.clone());
    fill_cart(&cart).await;
    assert!(storage.contains(CART_CACHE_KEY).unwrap());

    // a reload: fresh runtime, same storage
    let reloaded = CartStore::new(&runtime_with(storage.clone()), api.clone());
    let hydrated = reloaded.hydrate().unwrap();
    assert_eq!(hydrated.total_item_count(), 4);
    assert_eq!(reloaded.state(), CartState::Populated);
    assert_eq!(api.calls(GET_CART), 0);

    let loaded = reloaded.load().await.unwrap();
    assert_eq!(loaded, hydrated);
    assert_eq!(api.calls(GET_CART), 1);
}

#[tokio::test(start_paused = true)]
async fn expired_or_unreadable_persisted_cart_is_ignored() {
    let storage = ClientStorage::in_memory();
    let api = storefront();
    let config = SyncConfig::new()
        .without_maintenance()
        .with_cart_persist_ttl(Duration::ZERO);
    let cart = CartStore::new(&SyncRuntime::new(config, storage.clone()), api.clone());
    fill_cart(&cart).await;

    let reloaded = CartStore::new(&runtime_with(storage.clone()), api.clone());
    assert_eq!(reloaded.hydrate(), None);
    assert!(!storage.contains(CART_CACHE_KEY).unwrap());

    storage.save(CART_CACHE_KEY, &"not a cart").unwrap();
    assert_eq!(reloaded.hydrate(), None);
    assert!(!storage.contains(CART_CACHE_KEY).unwrap());
    assert_eq!(reloaded.state(), CartState::Empty);
}

#[tokio::test(start_paused = true)]
async fn identity_change_discards_the_previous_cart() {
    let api = storefront();
    let cart = CartStore::new(&SyncRuntime::in_memory(), api.clone());
    fill_cart(&cart).await;

    let pending = {
        let cart = cart.clone();
        tokio::spawn(async move { cart.add_item(MANGO, 1, 8).await })
    };
    sleep(Duration::from_millis(10)).await;

    let fresh = cart.on_identity_change().await.unwrap();
    assert_eq!(pending.await.unwrap(), Err(SyncError::Superseded));
    assert_eq!(fresh, api.server_cart());
    assert_eq!(cart.cart(), Some(fresh));

    // the next identity's server cart is empty
    api.empty_server_cart();
    assert!(cart.on_identity_change().await.unwrap().is_empty());
    assert_eq!(cart.state(), CartState::Empty);
}

#[tokio::test(start_paused = true)]
async fn empty_cart_cannot_be_checked_out() {
    let api = storefront();
    let cart = CartStore::new(&SyncRuntime::in_memory(), api.clone());
    let checkout = CheckoutLifecycle::new(cart);

    assert_eq!(checkout.begin_checkout().await, Err(CheckoutError::EmptyCart));
    assert_eq!(checkout.state(), CheckoutState::Empty);
    assert_eq!(api.calls(CREATE_CHECKOUT), 0);
}

#[tokio::test(start_paused = true)]
async fn insufficient_stock_blocks_checkout() {
    let api = storefront();
    // stock dropped after the line was added
    api.put_in_cart(TEA, 3);
    let cart = CartStore::new(&SyncRuntime::in_memory(), api.clone());
    let checkout = CheckoutLifecycle::new(cart);

    let err = checkout.begin_checkout().await.unwrap_err();
    assert_eq!(
        err,
        CheckoutError::InsufficientStock(vec![StockViolation {
            product_id: TEA,
            name: Some("Tea".into()),
            requested: 3,
            available: 2,
        }])
    );
    assert_eq!(checkout.state(), CheckoutState::Populated);
    assert_eq!(checkout.pending_snapshot(), None);
    assert_eq!(api.calls(CREATE_CHECKOUT), 0);
}

#[tokio::test(start_paused = true)]
async fn snapshot_is_persisted_before_the_redirect() {
    let api = storefront();
    let runtime = SyncRuntime::in_memory();
    let cart = CartStore::new(&runtime, api.clone());
    fill_cart(&cart).await;
    let checkout = CheckoutLifecycle::new(cart);
    assert_eq!(checkout.state(), CheckoutState::Populated);

    let redirect = checkout.begin_checkout().await.unwrap();
    assert_eq!(redirect.checkout_url, "https://pay.example/session/sess_1");
    assert_eq!(redirect.snapshot.total_item_count, 4);
    assert_eq!(redirect.snapshot.total_price, Decimal::new(55, 0));

    assert_eq!(checkout.pending_snapshot(), Some(redirect.snapshot.clone()));
    assert!(runtime.storage().contains(PENDING_ORDER_KEY).unwrap());
    assert_eq!(
        checkout.state(),
        CheckoutState::AwaitingProvider {
            checkout_url: Some(redirect.checkout_url)
        }
    );
}

#[tokio::test(start_paused = true)]
async fn snapshot_fills_in_for_a_lagging_order_history() {
    init_tracing();
    let api = storefront();
    let runtime = SyncRuntime::in_memory();
    let cart = CartStore::new(&runtime, api.clone());
    fill_cart(&cart).await;
    let checkout = CheckoutLifecycle::new(cart);
    checkout.begin_checkout().await.unwrap();

    api.set_history_lagging(true);
    api.set_history_latency(Duration::from_secs(2));
    let state = checkout
        .handle_return("/checkout/success?session_id=sess_1")
        .await
        .unwrap();

    let (session_id, order) = match state {
        CheckoutState::Completed { session_id, order } => (session_id, order),
        other => panic!("expected a completed checkout, got {other:?}"),
    };
    assert_eq!(session_id, "sess_1");
    assert_eq!(order.order_id, FIRST_ORDER_ID);
    assert_eq!(order.status, OrderStatus::Completed);
    assert_eq!(order.total_price, Decimal::new(55, 0));
    assert_eq!(order.total_item_count, 4);
    assert!(order.used_snapshot);
    assert!(!order.from_history);

    assert_eq!(checkout.pending_snapshot(), None);
    assert_eq!(checkout.cart().cart(), None);
    assert!(!runtime.storage().contains(CART_CACHE_KEY).unwrap());
}

#[tokio::test(start_paused = true)]
async fn history_record_wins_when_available() {
    let api = storefront();
    let cart = CartStore::new(&SyncRuntime::in_memory(), api.clone());
    fill_cart(&cart).await;
    let checkout = CheckoutLifecycle::new(cart);
    checkout.begin_checkout().await.unwrap();

    let order = checkout.complete("sess_1").await.unwrap();
    assert!(order.from_history);
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(order.total_price, Decimal::new(55, 0));
    assert_eq!(order.items.len(), 2);
    // the fake's history has no timestamps
    assert!(order.used_snapshot);
}

#[tokio::test(start_paused = true)]
async fn repeated_completion_creates_one_order() {
    let api = storefront();
    let cart = CartStore::new(&SyncRuntime::in_memory(), api.clone());
    fill_cart(&cart).await;
    let checkout = CheckoutLifecycle::new(cart);
    checkout.begin_checkout().await.unwrap();

    let (first, second) = tokio::join!(checkout.complete("sess_1"), checkout.complete("sess_1"));
    let first = first.unwrap();
    assert_eq!(first, second.unwrap());
    assert_eq!(api.calls(COMPLETE_ORDER), 1);
    assert_eq!(api.orders_created(), 1);

    // a reload of the success page
    let again = checkout
        .handle_return("https://shop.example/checkout/success?session_id=sess_1")
        .await
        .unwrap();
    assert!(matches!(again, CheckoutState::Completed { ref order, .. } if *order == first));
    assert_eq!(api.calls(COMPLETE_ORDER), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_completion_can_be_retried() {
    let api = storefront();
    let cart = CartStore::new(&SyncRuntime::in_memory(), api.clone());
    fill_cart(&cart).await;
    let checkout = CheckoutLifecycle::new(cart);
    checkout.begin_checkout().await.unwrap();

    let outage = SyncError::ServerFault {
        status: 502,
        message: "bad gateway".into(),
    };
    api.fail(COMPLETE_ORDER, outage.clone());
    let err = checkout.complete("sess_1").await.unwrap_err();
    assert_eq!(err, CheckoutError::Backend(outage.clone()));
    assert!(err.is_retryable());
    assert_eq!(
        checkout.state(),
        CheckoutState::Reconciling {
            session_id: "sess_1".into(),
            attempts: 1,
            last_error: Some(outage),
        }
    );
    assert!(checkout.pending_snapshot().is_some());

    api.recover(COMPLETE_ORDER);
    let order = checkout.retry_completion().await.unwrap();
    assert_eq!(order.order_id, FIRST_ORDER_ID);
    assert_eq!(api.calls(COMPLETE_ORDER), 2);
    assert!(matches!(checkout.state(), CheckoutState::Completed { .. }));

    assert_eq!(checkout.acknowledge(), CheckoutState::Empty);
}

#[tokio::test(start_paused = true)]
async fn cancel_keeps_snapshot_until_the_server_cart_empties() {
    let api = storefront();
    let cart = CartStore::new(&SyncRuntime::in_memory(), api.clone());
    fill_cart(&cart).await;
    let checkout = CheckoutLifecycle::new(cart);
    checkout.begin_checkout().await.unwrap();

    let state = checkout.handle_return("/checkout/cancel").await.unwrap();
    assert_eq!(state, CheckoutState::Populated);
    assert!(checkout.pending_snapshot().is_some());
    assert_eq!(checkout.cart().item_count(), 4);

    api.empty_server_cart();
    assert_eq!(checkout.cancel().await.unwrap(), CheckoutState::Empty);
    assert_eq!(checkout.pending_snapshot(), None);
}

#[tokio::test(start_paused = true)]
async fn pending_checkout_survives_a_reload() {
    let storage = ClientStorage::in_memory();
    let api = storefront();
    let cart = CartStore::new(&runtime_with(storage.clone()), api.clone());
    fill_cart(&cart).await;
    let redirect = CheckoutLifecycle::new(cart).begin_checkout().await.unwrap();

    let restored = CheckoutLifecycle::new(CartStore::new(&runtime_with(storage), api.clone()));
    assert_eq!(
        restored.state(),
        CheckoutState::AwaitingProvider {
            checkout_url: Some(redirect.checkout_url)
        }
    );

    let order = restored.complete("sess_1").await.unwrap();
    assert_eq!(order.total_item_count, 4);
    assert_eq!(restored.pending_snapshot(), None);
}

#[tokio::test(start_paused = true)]
async fn cancelled_checkout_is_not_resumed_after_a_reload() {
    let storage = ClientStorage::in_memory();
    let api = storefront();
    let cart = CartStore::new(&runtime_with(storage.clone()), api.clone());
    fill_cart(&cart).await;
    let checkout = CheckoutLifecycle::new(cart);
    checkout.begin_checkout().await.unwrap();
    assert_eq!(
        checkout.handle_return("/checkout/cancel").await.unwrap(),
        CheckoutState::Populated
    );

    let reloaded = CheckoutLifecycle::new(CartStore::new(&runtime_with(storage), api.clone()));
    assert_eq!(reloaded.state(), CheckoutState::Populated);
    let snapshot = reloaded.pending_snapshot().unwrap();
    assert!(snapshot.cancelled);
    assert_eq!(snapshot.total_item_count, 4);

    // a new attempt starts a live redirect again
    reloaded.cart().load().await.unwrap();
    reloaded.begin_checkout().await.unwrap();
    assert!(!reloaded.pending_snapshot().unwrap().cancelled);
    assert!(matches!(
        reloaded.restore(),
        CheckoutState::AwaitingProvider { .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn reset_discards_an_in_flight_mutation() {
    let storage = ClientStorage::in_memory();
    let api = storefront();
    let cart = CartStore::new(&runtime_with(storage.clone()), api.clone());
    fill_cart(&cart).await;

    api.set_latency(Duration::from_millis(500));
    let pending = tokio::spawn({
        let cart = cart.clone();
        async move { cart.add_item(MANGO, 1, 8).await }
    });
    sleep(Duration::from_millis(10)).await;
    cart.reset();

    assert_eq!(pending.await.unwrap(), Err(SyncError::Superseded));
    assert_eq!(cart.cart(), None);
    assert_eq!(cart.state(), CartState::Empty);
    assert!(!storage.contains(CART_CACHE_KEY).unwrap());
}
