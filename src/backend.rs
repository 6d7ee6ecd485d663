//! Backend operations consumed by the core.
//!
//! The REST backend itself is out of scope; the core only needs this trait. The
//! `http` feature provides a `reqwest` implementation, and tests use an in-memory
//! fake. Implementations are cheap handles (typically an `Arc` inside), cloned into
//! every fetcher.

use std::future::Future;

use crate::{
    errors::SyncResult,
    models::{
        Cart, CheckoutSession, CompleteOrderResponse, DashboardSummary, OrderRecord,
        PredictionQuery, ProductPrediction, ProductPredictionQuery, SalesPredictions, StockAlert,
    },
};

pub trait StorefrontApi: Clone + Send + Sync + 'static {
    /// `GET /dashboard/realtime`
    fn dashboard_realtime(&self) -> impl Future<Output = SyncResult<DashboardSummary>> + Send;

    /// `GET /predictions?days&include_historical&chart_format`
    fn predictions(
        &self,
        query: PredictionQuery,
    ) -> impl Future<Output = SyncResult<SalesPredictions>> + Send;

    /// `GET /products/{id}/prediction?days&min_confidence`
    fn product_prediction(
        &self,
        query: ProductPredictionQuery,
    ) -> impl Future<Output = SyncResult<ProductPrediction>> + Send;

    /// `GET /stock-alerts`
    fn stock_alerts(&self) -> impl Future<Output = SyncResult<Vec<StockAlert>>> + Send;

    /// `GET /cart`
    fn get_cart(&self) -> impl Future<Output = SyncResult<Cart>> + Send;

    /// `POST /cart/items {product_id, quantity}`
    fn add_cart_item(
        &self,
        product_id: u64,
        quantity: u32,
    ) -> impl Future<Output = SyncResult<Cart>> + Send;

    /// `PATCH /cart/items/{id} {quantity}`
    fn update_cart_item(
        &self,
        item_id: u64,
        quantity: u32,
    ) -> impl Future<Output = SyncResult<Cart>> + Send;

    /// `DELETE /cart/items/{id}`
    fn remove_cart_item(&self, item_id: u64) -> impl Future<Output = SyncResult<Cart>> + Send;

    /// `POST /cart/checkout`
    fn create_checkout(&self) -> impl Future<Output = SyncResult<CheckoutSession>> + Send;

    /// `POST /cart/complete-order {session_id}`. Idempotent per session.
    fn complete_order(
        &self,
        session_id: &str,
    ) -> impl Future<Output = SyncResult<CompleteOrderResponse>> + Send;

    /// `GET /orders/history`
    fn order_history(&self) -> impl Future<Output = SyncResult<Vec<OrderRecord>>> + Send;
}
