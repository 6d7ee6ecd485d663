//! Backend payload types.
//!
//! Money is [`Decimal`], serialized as a string so totals survive the round trip
//! through persisted storage without float drift.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One line in the active cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    /// Cart line ID (used by `PATCH`/`DELETE /cart/items/{id}`).
    pub id: u64,
    pub product_id: u64,
    #[serde(default)]
    pub name: Option<String>,
    /// Always in `1..=stock` once accepted by the backend.
    pub quantity: u32,
    pub unit_price: Decimal,
    /// Current stock of the product.
    pub stock: u32,
}

impl CartItem {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// The canonical cart as returned by every cart route.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Cart {
    pub items: Vec<CartItem>,
    pub total_price: Decimal,
}

impl Cart {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Sum of quantities across all lines.
    pub fn total_item_count(&self) -> u32 {
        self.items.iter().map(|item| item.quantity).sum()
    }

    /// Total recomputed from the lines, for comparison with `total_price`.
    pub fn computed_total(&self) -> Decimal {
        self.items.iter().map(CartItem::line_total).sum()
    }

    pub fn item(&self, item_id: u64) -> Option<&CartItem> {
        self.items.iter().find(|item| item.id == item_id)
    }

    pub fn item_for_product(&self, product_id: u64) -> Option<&CartItem> {
        self.items.iter().find(|item| item.product_id == product_id)
    }
}

/// Advisory copy of the cart taken immediately before the payment redirect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOrderSnapshot {
    pub items: Vec<CartItem>,
    pub total_price: Decimal,
    pub total_item_count: u32,
    pub captured_at: DateTime<Utc>,
    #[serde(default)]
    pub checkout_url: Option<String>,
    /// Set when the user came back through the cancel path with items still in the cart.
    #[serde(default)]
    pub cancelled: bool,
}

impl PendingOrderSnapshot {
    pub fn capture(cart: &Cart, checkout_url: Option<String>) -> Self {
        Self {
            items: cart.items.clone(),
            total_price: cart.total_price,
            total_item_count: cart.total_item_count(),
            captured_at: Utc::now(),
            checkout_url,
            cancelled: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Paid,
    Completed,
    Shipped,
    Cancelled,
    Refunded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: u64,
    #[serde(default)]
    pub name: Option<String>,
    pub quantity: u32,
    pub unit_price: Decimal,
}

impl From<&CartItem> for OrderItem {
    fn from(item: &CartItem) -> Self {
        Self {
            product_id: item.product_id,
            name: item.name.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
        }
    }
}

/// An order as reported by `GET /orders/history`.
///
/// Everything but `id` may be missing while the backend is still settling a
/// just-paid order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: u64,
    #[serde(default)]
    pub status: Option<OrderStatus>,
    #[serde(default)]
    pub items: Option<Vec<OrderItem>>,
    #[serde(default)]
    pub total_price: Option<Decimal>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Response of `POST /cart/checkout`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub checkout_url: String,
}

/// Response of `POST /cart/complete-order`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteOrderResponse {
    pub order_id: u64,
    #[serde(default)]
    pub message: String,
}

/// Aggregate KPIs from `GET /dashboard/realtime`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub total_sales: Decimal,
    pub orders_today: u32,
    pub active_customers: u32,
    pub low_stock_products: u32,
    #[serde(default)]
    pub generated_at: Option<DateTime<Utc>>,
}

/// Query for `GET /predictions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PredictionQuery {
    pub days: u32,
    pub include_historical: bool,
    pub chart_format: bool,
}

impl Default for PredictionQuery {
    fn default() -> Self {
        Self {
            days: 30,
            include_historical: true,
            chart_format: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionPoint {
    pub date: NaiveDate,
    pub predicted: f64,
    #[serde(default)]
    pub lower: Option<f64>,
    #[serde(default)]
    pub upper: Option<f64>,
    /// Present for historical points.
    #[serde(default)]
    pub actual: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub name: String,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub trained_at: Option<DateTime<Utc>>,
}

/// Forecast series plus model metadata from `GET /predictions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesPredictions {
    pub series: Vec<PredictionPoint>,
    pub model: ModelMetadata,
}

/// Query for `GET /products/{id}/prediction`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProductPredictionQuery {
    pub product_id: u64,
    pub days: u32,
    pub min_confidence: f64,
}

impl ProductPredictionQuery {
    pub fn new(product_id: u64) -> Self {
        Self {
            product_id,
            days: 30,
            min_confidence: 0.8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductPrediction {
    pub product_id: u64,
    pub series: Vec<PredictionPoint>,
    pub confidence: f64,
    #[serde(default)]
    pub recommended_restock: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertLevel {
    Critical,
    Warning,
    Caution,
    Ok,
}

/// One row of `GET /stock-alerts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockAlert {
    pub product_id: u64,
    pub alert_level: AlertLevel,
    pub current_stock: u32,
    pub min_stock: u32,
    #[serde(default)]
    pub days_until_stockout: Option<f64>,
}
