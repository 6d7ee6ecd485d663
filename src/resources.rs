//! The analytics resources consumed by the admin dashboard.
//!
//! Each resource has a key constructor, so views and invalidation agree on identity,
//! and a `subscribe_*` function that wires the backend call to the policy from
//! [`SyncConfig`](crate::config::SyncConfig). Results are persisted under their key,
//! so a reload within the TTL renders without a request.

use crate::{
    backend::StorefrontApi,
    key::ResourceKey,
    models::{
        DashboardSummary, PredictionQuery, ProductPrediction, ProductPredictionQuery,
        SalesPredictions, StockAlert,
    },
    runtime::SyncRuntime,
    subscription::Subscription,
};

pub const DASHBOARD_RESOURCE: &str = "dashboard-realtime";
pub const PREDICTIONS_RESOURCE: &str = "predictions";
pub const PRODUCT_PREDICTION_RESOURCE: &str = "product-prediction";
pub const STOCK_ALERTS_RESOURCE: &str = "stock-alerts";

pub fn dashboard_key() -> ResourceKey {
    ResourceKey::new(DASHBOARD_RESOURCE)
}

pub fn predictions_key(query: &PredictionQuery) -> ResourceKey {
    ResourceKey::builder(PREDICTIONS_RESOURCE)
        .param("days", query.days)
        .param("include_historical", query.include_historical)
        .param("chart_format", query.chart_format)
        .build()
}

pub fn product_prediction_key(query: &ProductPredictionQuery) -> ResourceKey {
    ResourceKey::builder(PRODUCT_PREDICTION_RESOURCE)
        .param("product_id", query.product_id)
        .param("days", query.days)
        .param("min_confidence", query.min_confidence)
        .build()
}

pub fn stock_alerts_key() -> ResourceKey {
    ResourceKey::new(STOCK_ALERTS_RESOURCE)
}

/// Real-time KPIs, polled.
pub fn subscribe_dashboard<A: StorefrontApi>(
    runtime: &SyncRuntime,
    api: &A,
) -> Subscription<DashboardSummary> {
    let api = api.clone();
    runtime.subscribe_persisted(
        dashboard_key(),
        move || {
            let api = api.clone();
            async move { api.dashboard_realtime().await }
        },
        runtime.config().policies().dashboard.options(),
    )
}

pub fn subscribe_predictions<A: StorefrontApi>(
    runtime: &SyncRuntime,
    api: &A,
    query: PredictionQuery,
) -> Subscription<SalesPredictions> {
    let api = api.clone();
    runtime.subscribe_persisted(
        predictions_key(&query),
        move || {
            let api = api.clone();
            async move { api.predictions(query).await }
        },
        runtime.config().policies().predictions.options(),
    )
}

pub fn subscribe_product_prediction<A: StorefrontApi>(
    runtime: &SyncRuntime,
    api: &A,
    query: ProductPredictionQuery,
) -> Subscription<ProductPrediction> {
    let api = api.clone();
    runtime.subscribe_persisted(
        product_prediction_key(&query),
        move || {
            let api = api.clone();
            async move { api.product_prediction(query).await }
        },
        runtime.config().policies().product_prediction.options(),
    )
}

/// Low-stock alerts, polled.
pub fn subscribe_stock_alerts<A: StorefrontApi>(
    runtime: &SyncRuntime,
    api: &A,
) -> Subscription<Vec<StockAlert>> {
    let api = api.clone();
    runtime.subscribe_persisted(
        stock_alerts_key(),
        move || {
            let api = api.clone();
            async move { api.stock_alerts().await }
        },
        runtime.config().policies().stock_alerts.options(),
    )
}
