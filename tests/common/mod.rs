#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, Once},
    time::Duration,
};

use rust_decimal::Decimal;
use storefront_sync::{
    backend::StorefrontApi,
    errors::{SyncError, SyncResult},
    models::{
        AlertLevel, Cart, CartItem, CheckoutSession, CompleteOrderResponse, DashboardSummary,
        ModelMetadata, OrderItem, OrderRecord, OrderStatus, PredictionQuery, ProductPrediction,
        ProductPredictionQuery, SalesPredictions, StockAlert,
    },
};
use tokio::time::sleep;

pub const DASHBOARD: &str = "dashboard";
pub const PREDICTIONS: &str = "predictions";
pub const PRODUCT_PREDICTION: &str = "product_prediction";
pub const STOCK_ALERTS: &str = "stock_alerts";
pub const GET_CART: &str = "get_cart";
pub const ADD_ITEM: &str = "add_cart_item";
pub const UPDATE_ITEM: &str = "update_cart_item";
pub const REMOVE_ITEM: &str = "remove_cart_item";
pub const CREATE_CHECKOUT: &str = "create_checkout";
pub const COMPLETE_ORDER: &str = "complete_order";
pub const ORDER_HISTORY: &str = "order_history";

/// First order id handed out by the fake.
pub const FIRST_ORDER_ID: u64 = 42;

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
            .try_init();
    });
}

#[derive(Clone)]
struct Product {
    name: String,
    price: Decimal,
    stock: u32,
}

struct FakeState {
    latency: Duration,
    history_latency: Duration,
    /// While set, history does not list orders completed through the fake yet.
    history_lagging: bool,
    products: HashMap<u64, Product>,
    cart: Vec<CartItem>,
    next_item_id: u64,
    next_order_id: u64,
    completed: HashMap<String, u64>,
    orders: Vec<OrderRecord>,
    unauthorized: HashSet<&'static str>,
    failures: HashMap<&'static str, SyncError>,
    calls: HashMap<&'static str, u32>,
    dashboard_sales: Decimal,
}

/// In-memory backend with per-route call counters and failure injection.
#[derive(Clone)]
pub struct FakeStorefront {
    state: Arc<Mutex<FakeState>>,
}

impl Default for FakeStorefront {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeStorefront {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                latency: Duration::from_millis(50),
                history_latency: Duration::from_millis(50),
                history_lagging: false,
                products: HashMap::new(),
                cart: Vec::new(),
                next_item_id: 1,
                next_order_id: FIRST_ORDER_ID,
                completed: HashMap::new(),
                orders: Vec::new(),
                unauthorized: HashSet::new(),
                failures: HashMap::new(),
                calls: HashMap::new(),
                dashboard_sales: Decimal::new(1000, 0),
            })),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn add_product(&self, product_id: u64, name: &str, price: Decimal, stock: u32) {
        self.with_state(|state| {
            state.products.insert(
                product_id,
                Product {
                    name: name.to_string(),
                    price,
                    stock,
                },
            );
        });
    }

    pub fn set_stock(&self, product_id: u64, stock: u32) {
        self.with_state(|state| {
            if let Some(product) = state.products.get_mut(&product_id) {
                product.stock = stock;
            }
            for item in state.cart.iter_mut().filter(|i| i.product_id == product_id) {
                item.stock = stock;
            }
        });
    }

    /// Put a line straight into the server-side cart, bypassing stock checks.
    pub fn put_in_cart(&self, product_id: u64, quantity: u32) {
        self.with_state(|state| {
            let product = state.products[&product_id].clone();
            let id = state.next_item_id;
            state.next_item_id += 1;
            state.cart.push(CartItem {
                id,
                product_id,
                name: Some(product.name),
                quantity,
                unit_price: product.price,
                stock: product.stock,
            });
        });
    }

    pub fn empty_server_cart(&self) {
        self.with_state(|state| state.cart.clear());
    }

    pub fn set_latency(&self, latency: Duration) {
        self.with_state(|state| state.latency = latency);
    }

    pub fn set_history_latency(&self, latency: Duration) {
        self.with_state(|state| state.history_latency = latency);
    }

    pub fn set_history_lagging(&self, lagging: bool) {
        self.with_state(|state| state.history_lagging = lagging);
    }

    pub fn set_unauthorized(&self, route: &'static str, unauthorized: bool) {
        self.with_state(|state| {
            if unauthorized {
                state.unauthorized.insert(route);
            } else {
                state.unauthorized.remove(route);
            }
        });
    }

    pub fn fail(&self, route: &'static str, err: SyncError) {
        self.with_state(|state| {
            state.failures.insert(route, err);
        });
    }

    pub fn recover(&self, route: &'static str) {
        self.with_state(|state| {
            state.failures.remove(route);
        });
    }

    pub fn set_dashboard_sales(&self, sales: Decimal) {
        self.with_state(|state| state.dashboard_sales = sales);
    }

    pub fn calls(&self, route: &'static str) -> u32 {
        self.with_state(|state| state.calls.get(route).copied().unwrap_or(0))
    }

    pub fn orders_created(&self) -> usize {
        self.with_state(|state| state.orders.len())
    }

    pub fn server_cart(&self) -> Cart {
        self.with_state(|state| cart_of(&state.cart))
    }

    async fn enter(&self, route: &'static str) -> SyncResult<()> {
        let latency = self.with_state(|state| {
            *state.calls.entry(route).or_default() += 1;
            if route == ORDER_HISTORY {
                state.history_latency
            } else {
                state.latency
            }
        });
        sleep(latency).await;
        self.with_state(|state| {
            if state.unauthorized.contains(route) {
                return Err(SyncError::Unauthorized);
            }
            match state.failures.get(route) {
                Some(err) => Err(err.clone()),
                None => Ok(()),
            }
        })
    }
}

fn cart_of(items: &[CartItem]) -> Cart {
    Cart {
        items: items.to_vec(),
        total_price: items.iter().map(CartItem::line_total).sum(),
    }
}

fn check_quantity(stock: u32, quantity: u32) -> SyncResult<()> {
    if quantity == 0 || quantity > stock {
        return Err(SyncError::Validation {
            message: format!("quantity must be between 1 and {stock}"),
            fields: Vec::new(),
        });
    }
    Ok(())
}

impl StorefrontApi for FakeStorefront {
    async fn dashboard_realtime(&self) -> SyncResult<DashboardSummary> {
        self.enter(DASHBOARD).await?;
        Ok(self.with_state(|state| DashboardSummary {
            total_sales: state.dashboard_sales,
            orders_today: state.orders.len() as u32,
            active_customers: 3,
            low_stock_products: 1,
            generated_at: None,
        }))
    }

    async fn predictions(&self, query: PredictionQuery) -> SyncResult<SalesPredictions> {
        self.enter(PREDICTIONS).await?;
        Ok(SalesPredictions {
            series: Vec::new(),
            model: ModelMetadata {
                name: format!("forecast-{}d", query.days),
                accuracy: Some(0.9),
                trained_at: None,
            },
        })
    }

    async fn product_prediction(
        &self,
        query: ProductPredictionQuery,
    ) -> SyncResult<ProductPrediction> {
        self.enter(PRODUCT_PREDICTION).await?;
        Ok(ProductPrediction {
            product_id: query.product_id,
            series: Vec::new(),
            confidence: query.min_confidence,
            recommended_restock: Some(5),
        })
    }

    async fn stock_alerts(&self) -> SyncResult<Vec<StockAlert>> {
        self.enter(STOCK_ALERTS).await?;
        Ok(self.with_state(|state| {
            state
                .products
                .iter()
                .filter(|(_, product)| product.stock < 5)
                .map(|(id, product)| StockAlert {
                    product_id: *id,
                    alert_level: if product.stock == 0 {
                        AlertLevel::Critical
                    } else {
                        AlertLevel::Warning
                    },
                    current_stock: product.stock,
                    min_stock: 5,
                    days_until_stockout: None,
                })
                .collect()
        }))
    }

    async fn get_cart(&self) -> SyncResult<Cart> {
        self.enter(GET_CART).await?;
        Ok(self.server_cart())
    }

    async fn add_cart_item(&self, product_id: u64, quantity: u32) -> SyncResult<Cart> {
        self.enter(ADD_ITEM).await?;
        self.with_state(|state| {
            let Some(product) = state.products.get(&product_id).cloned() else {
                return Err(SyncError::Conflict(format!("product {product_id} not found")));
            };
            check_quantity(product.stock, quantity)?;
            let id = state.next_item_id;
            state.next_item_id += 1;
            state.cart.push(CartItem {
                id,
                product_id,
                name: Some(product.name),
                quantity,
                unit_price: product.price,
                stock: product.stock,
            });
            Ok(cart_of(&state.cart))
        })
    }

    async fn update_cart_item(&self, item_id: u64, quantity: u32) -> SyncResult<Cart> {
        self.enter(UPDATE_ITEM).await?;
        self.with_state(|state| {
            let Some(item) = state.cart.iter_mut().find(|item| item.id == item_id) else {
                return Err(SyncError::Conflict(format!("item {item_id} not found")));
            };
            check_quantity(item.stock, quantity)?;
            item.quantity = quantity;
            Ok(cart_of(&state.cart))
        })
    }

    async fn remove_cart_item(&self, item_id: u64) -> SyncResult<Cart> {
        self.enter(REMOVE_ITEM).await?;
        self.with_state(|state| {
            state.cart.retain(|item| item.id != item_id);
            Ok(cart_of(&state.cart))
        })
    }

    async fn create_checkout(&self) -> SyncResult<CheckoutSession> {
        self.enter(CREATE_CHECKOUT).await?;
        Ok(CheckoutSession {
            checkout_url: "https://pay.example/session/sess_1".to_string(),
        })
    }

    async fn complete_order(&self, session_id: &str) -> SyncResult<CompleteOrderResponse> {
        self.enter(COMPLETE_ORDER).await?;
        Ok(self.with_state(|state| {
            if let Some(order_id) = state.completed.get(session_id) {
                return CompleteOrderResponse {
                    order_id: *order_id,
                    message: "Order already completed".to_string(),
                };
            }
            let order_id = state.next_order_id;
            state.next_order_id += 1;
            let cart = cart_of(&state.cart);
            state.orders.push(OrderRecord {
                id: order_id,
                status: Some(OrderStatus::Paid),
                items: Some(cart.items.iter().map(OrderItem::from).collect()),
                total_price: Some(cart.total_price),
                created_at: None,
            });
            state.completed.insert(session_id.to_string(), order_id);
            state.cart.clear();
            CompleteOrderResponse {
                order_id,
                message: "Order placed".to_string(),
            }
        }))
    }

    async fn order_history(&self) -> SyncResult<Vec<OrderRecord>> {
        self.enter(ORDER_HISTORY).await?;
        Ok(self.with_state(|state| {
            if state.history_lagging {
                Vec::new()
            } else {
                state.orders.clone()
            }
        }))
    }
}
