//! Remote order gateway.
//!
//! Thin authenticated HTTP client for the canteen server: today's orders,
//! batched status updates for pre-paid and walk-in orders, menu fetch and the
//! admin dashboard counters. The sync core depends only on the
//! [`OrderGateway`] contract so tests can substitute an in-memory fake.

use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::future::Future;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::PosConfig;
use crate::error::{PosError, Result};
use crate::models::{DashboardData, RemoteMenu, RemoteOrder, StatusUpdateAck, WalkinWithItems};
use crate::session::Session;

/// Message the server puts in a 200 body when the token has expired.
const EXPIRED_TOKEN_MESSAGE: &str = "Invalid or expired token";

/// Request/response contract of the canteen server used by the sync core.
pub trait OrderGateway: Send + Sync {
    /// `GET /order/getTodaysOrdersByCanteen/{canteenId}` → `{data: Order[]}`.
    fn fetch_todays_orders(
        &self,
        session: &Session,
    ) -> impl Future<Output = Result<Vec<RemoteOrder>>> + Send;

    /// `POST /order/updateOrderStatus {orderIds: [[...]]}` in one batch.
    fn update_order_status(
        &self,
        session: &Session,
        order_ids: &[i64],
    ) -> impl Future<Output = Result<StatusUpdateAck>> + Send;

    /// `POST /walkin/updateOrderStatus {orders: [...]}` in one batch.
    fn update_walkin_status(
        &self,
        session: &Session,
        walkins: &[WalkinWithItems],
    ) -> impl Future<Output = Result<StatusUpdateAck>> + Send;

    /// `GET /menu/getMenuById?id={menuId}` → `{data: Menu}`.
    fn fetch_menu(
        &self,
        session: &Session,
        menu_id: i64,
    ) -> impl Future<Output = Result<RemoteMenu>> + Send;

    /// `GET /adminDasboard/dashboard` → `{data: {...}}`.
    fn fetch_dashboard(
        &self,
        session: &Session,
    ) -> impl Future<Output = Result<DashboardData>> + Send;

    /// Lightweight probe used to skip sync cycles while offline.
    fn is_reachable(&self) -> impl Future<Output = bool> + Send;
}

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the server base URL:
/// - ensure a scheme is present (https, or http for localhost)
/// - strip trailing slashes
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();
    if url.is_empty() {
        return url;
    }

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into a user-friendly network error.
fn friendly_error(url: &str, err: &reqwest::Error) -> PosError {
    if err.is_connect() {
        return PosError::Network(format!("Cannot reach canteen server at {url}"));
    }
    if err.is_timeout() {
        return PosError::Network(format!("Connection to {url} timed out"));
    }
    if err.is_builder() {
        return PosError::Config(format!("Invalid canteen server URL: {url}"));
    }
    PosError::Network(format!("Network error communicating with {url}: {err}"))
}

/// Convert a non-success HTTP status into the error taxonomy.
fn status_error(status: StatusCode, body: &str) -> PosError {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|json| {
            json.get("message")
                .or_else(|| json.get("error"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string());

    match status.as_u16() {
        401 | 403 => PosError::Unauthorized(if detail.is_empty() {
            EXPIRED_TOKEN_MESSAGE.to_string()
        } else {
            detail
        }),
        404 => PosError::Network("Canteen server endpoint not found (HTTP 404)".to_string()),
        s if s >= 500 => PosError::Network(format!("Canteen server error (HTTP {s}): {detail}")),
        s => PosError::Network(format!("Unexpected response from canteen server (HTTP {s}): {detail}")),
    }
}

/// Pull `data` out of the `{data: ...}` envelope the server wraps every
/// payload in.
fn envelope_data(body: Value) -> Result<Value> {
    if body
        .get("message")
        .and_then(Value::as_str)
        .is_some_and(|m| m == EXPIRED_TOKEN_MESSAGE)
    {
        return Err(PosError::Unauthorized(EXPIRED_TOKEN_MESSAGE.to_string()));
    }
    match body {
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Null) | None => Err(PosError::MalformedResponse(
                "response has no \"data\" field".to_string(),
            )),
            Some(data) => Ok(data),
        },
        other => Err(PosError::MalformedResponse(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// `reqwest`-backed gateway.
#[derive(Clone)]
pub struct HttpGateway {
    client: Client,
    probe_client: Client,
    base_url: String,
}

impl HttpGateway {
    pub fn new(config: &PosConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| PosError::Config(format!("Failed to create HTTP client: {e}")))?;
        let probe_client = Client::builder()
            .timeout(config.connectivity_timeout())
            .build()
            .map_err(|e| PosError::Config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            probe_client,
            base_url: normalize_base_url(&config.api_base_url),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Perform an authenticated request and return the parsed JSON body.
    ///
    /// `path` should include the leading slash, e.g. `/order/updateOrderStatus`.
    async fn request(
        &self,
        session: &Session,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value> {
        let full_url = format!("{}{path}", self.base_url);
        debug!(method = %method, url = %full_url, "gateway request");

        let mut req = self
            .client
            .request(method, &full_url)
            .header("Authorization", session.token())
            .header("Content-Type", "application/json");
        if let Some(b) = body {
            req = req.json(&b);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| friendly_error(&self.base_url, &e))?;
        let status = resp.status();
        let body_text = resp
            .text()
            .await
            .map_err(|e| friendly_error(&self.base_url, &e))?;

        if !status.is_success() {
            return Err(status_error(status, &body_text));
        }
        if body_text.trim().is_empty() {
            return Err(PosError::MalformedResponse("empty response body".to_string()));
        }
        serde_json::from_str(&body_text)
            .map_err(|e| PosError::MalformedResponse(format!("invalid JSON from server: {e}")))
    }
}

impl OrderGateway for HttpGateway {
    async fn fetch_todays_orders(&self, session: &Session) -> Result<Vec<RemoteOrder>> {
        let path = format!("/order/getTodaysOrdersByCanteen/{}", session.canteen_id());
        let body = self.request(session, Method::GET, &path, None).await?;
        let data = envelope_data(body)?;
        if !data.is_array() {
            return Err(PosError::MalformedResponse(format!(
                "expected \"data\" to be an array of orders, got {}",
                json_kind(&data)
            )));
        }
        let orders: Vec<RemoteOrder> = serde_json::from_value(data)?;
        info!(count = orders.len(), "fetched today's orders");
        Ok(orders)
    }

    async fn update_order_status(
        &self,
        session: &Session,
        order_ids: &[i64],
    ) -> Result<StatusUpdateAck> {
        let body = serde_json::json!({ "orderIds": [order_ids] });
        let resp = self
            .request(session, Method::POST, "/order/updateOrderStatus", Some(body))
            .await?;
        let ack: StatusUpdateAck = serde_json::from_value(envelope_data(resp)?)?;
        Ok(ack)
    }

    async fn update_walkin_status(
        &self,
        session: &Session,
        walkins: &[WalkinWithItems],
    ) -> Result<StatusUpdateAck> {
        let body = serde_json::json!({ "orders": walkins });
        let resp = self
            .request(session, Method::POST, "/walkin/updateOrderStatus", Some(body))
            .await?;
        let ack: StatusUpdateAck = serde_json::from_value(envelope_data(resp)?)?;
        Ok(ack)
    }

    async fn fetch_menu(&self, session: &Session, menu_id: i64) -> Result<RemoteMenu> {
        let path = format!("/menu/getMenuById?id={menu_id}");
        let body = self.request(session, Method::GET, &path, None).await?;
        let menu: RemoteMenu = serde_json::from_value(envelope_data(body)?)?;
        Ok(menu)
    }

    async fn fetch_dashboard(&self, session: &Session) -> Result<DashboardData> {
        let body = self
            .request(session, Method::GET, "/adminDasboard/dashboard", None)
            .await?;
        let data: DashboardData = serde_json::from_value(envelope_data(body)?)?;
        Ok(data)
    }

    async fn is_reachable(&self) -> bool {
        let start = Instant::now();
        match self.probe_client.head(&self.base_url).send().await {
            Ok(resp) => {
                let latency = start.elapsed().as_millis() as u64;
                debug!(latency_ms = latency, status = %resp.status(), "connectivity probe");
                true
            }
            Err(e) => {
                warn!(error = %e, "connectivity probe failed");
                false
            }
        }
    }
}
