//! `reqwest` implementation of [`StorefrontApi`].
//!
//! Transport failures and non-success statuses are classified into [`SyncError`]
//! here, so the rest of the crate never sees a `reqwest` type. Each request carries
//! the client-level timeout; an elapsed timeout surfaces as [`SyncError::Timeout`].

use std::{collections::BTreeMap, time::Duration};

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    backend::StorefrontApi,
    errors::{FieldError, SyncError, SyncResult},
    models::{
        Cart, CheckoutSession, CompleteOrderResponse, DashboardSummary, OrderRecord,
        PredictionQuery, ProductPrediction, ProductPredictionQuery, SalesPredictions, StockAlert,
    },
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Settings for [`HttpStorefront`].
#[derive(Debug, Clone)]
pub struct HttpConfig {
    base_url: String,
    timeout: Duration,
    bearer_token: Option<String>,
}

impl HttpConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: DEFAULT_TIMEOUT,
            bearer_token: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}

#[derive(Clone)]
pub struct HttpStorefront {
    client: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl HttpStorefront {
    pub fn new(config: HttpConfig) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(classify_transport)?;
        Ok(Self {
            client,
            base_url: config.base_url,
            bearer_token: config.bearer_token,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let request = self.client.request(method, url);
        match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_json<T, Q>(&self, path: &str, query: Option<&Q>) -> SyncResult<T>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let mut request = self.request(Method::GET, path);
        if let Some(query) = query {
            request = request.query(query);
        }
        let response = request.send().await.map_err(classify_transport)?;
        parse_response(response).await
    }

    async fn send_json<T, B>(&self, method: Method, path: &str, body: Option<&B>) -> SyncResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let mut request = self.request(method, path);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(classify_transport)?;
        parse_response(response).await
    }
}

#[derive(Serialize)]
struct AddItemBody {
    product_id: u64,
    quantity: u32,
}

#[derive(Serialize)]
struct QuantityBody {
    quantity: u32,
}

#[derive(Serialize)]
struct CompleteOrderBody<'a> {
    session_id: &'a str,
}

#[derive(Serialize)]
struct ProductPredictionParams {
    days: u32,
    min_confidence: f64,
}

impl StorefrontApi for HttpStorefront {
    async fn dashboard_realtime(&self) -> SyncResult<DashboardSummary> {
        self.get_json::<_, ()>("/dashboard/realtime", None).await
    }

    async fn predictions(&self, query: PredictionQuery) -> SyncResult<SalesPredictions> {
        self.get_json("/predictions", Some(&query)).await
    }

    async fn product_prediction(
        &self,
        query: ProductPredictionQuery,
    ) -> SyncResult<ProductPrediction> {
        let path = format!("/products/{}/prediction", query.product_id);
        let params = ProductPredictionParams {
            days: query.days,
            min_confidence: query.min_confidence,
        };
        self.get_json(&path, Some(&params)).await
    }

    async fn stock_alerts(&self) -> SyncResult<Vec<StockAlert>> {
        self.get_json::<_, ()>("/stock-alerts", None).await
    }

    async fn get_cart(&self) -> SyncResult<Cart> {
        self.get_json::<_, ()>("/cart", None).await
    }

    async fn add_cart_item(&self, product_id: u64, quantity: u32) -> SyncResult<Cart> {
        let body = AddItemBody {
            product_id,
            quantity,
        };
        self.send_json(Method::POST, "/cart/items", Some(&body))
            .await
    }

    async fn update_cart_item(&self, item_id: u64, quantity: u32) -> SyncResult<Cart> {
        let path = format!("/cart/items/{item_id}");
        self.send_json(Method::PATCH, &path, Some(&QuantityBody { quantity }))
            .await
    }

    async fn remove_cart_item(&self, item_id: u64) -> SyncResult<Cart> {
        let path = format!("/cart/items/{item_id}");
        self.send_json::<_, ()>(Method::DELETE, &path, None).await
    }

    async fn create_checkout(&self) -> SyncResult<CheckoutSession> {
        self.send_json::<_, ()>(Method::POST, "/cart/checkout", None)
            .await
    }

    async fn complete_order(&self, session_id: &str) -> SyncResult<CompleteOrderResponse> {
        self.send_json(
            Method::POST,
            "/cart/complete-order",
            Some(&CompleteOrderBody { session_id }),
        )
        .await
    }

    async fn order_history(&self) -> SyncResult<Vec<OrderRecord>> {
        self.get_json::<_, ()>("/orders/history", None).await
    }
}

fn classify_transport(err: reqwest::Error) -> SyncError {
    if err.is_timeout() {
        SyncError::Timeout
    } else if err.is_decode() {
        SyncError::Decode(err.to_string())
    } else {
        SyncError::Network(err.to_string())
    }
}

/// Error body shape used by the backend for 400 responses.
#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default, alias = "detail")]
    message: Option<String>,
    #[serde(default)]
    errors: BTreeMap<String, Vec<String>>,
}

async fn parse_response<T: DeserializeOwned>(response: Response) -> SyncResult<T> {
    let status = response.status();
    if status.is_success() {
        let bytes = response.bytes().await.map_err(classify_transport)?;
        return Ok(serde_json::from_slice(&bytes)?);
    }

    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status, &body))
}

fn classify_status(status: StatusCode, body: &str) -> SyncError {
    let message = match SyncError::from_status(status.as_u16(), body) {
        SyncError::Validation { message, .. } => message,
        other => return other,
    };
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => SyncError::Validation {
            message: parsed.message.unwrap_or(message),
            fields: parsed
                .errors
                .into_iter()
                .flat_map(|(field, messages)| {
                    messages.into_iter().map(move |message| FieldError {
                        field: field.clone(),
                        message,
                    })
                })
                .collect(),
        },
        Err(_) => SyncError::Validation {
            message,
            fields: Vec::new(),
        },
    }
}
