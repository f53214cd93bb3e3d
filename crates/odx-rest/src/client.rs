//! Onederx REST client.
//!
//! Stateless signed requests over `reqwest` with a fixed overall timeout.
//!
//! # Public endpoints (GET, JSON body)
//!
//! | Operation        | Path                 |
//! |------------------|----------------------|
//! | Status           | `/v1/status`         |
//! | Symbol details   | `/v1/symbol_details` |
//! | Ticker           | `/v1/ticker`         |
//! | L2 / L3 snapshot | `/v1/l2`, `/v1/l3`   |
//! | Candles          | `/v1/candles`        |
//!
//! # Private endpoints (POST)
//!
//! The payload gets `timestamp` (ns) and `symbol`, is serialized once, and
//! that exact body is signed: `SIGNATURE = hmac_sha512(secret, path + body)`,
//! sent with `APIKEY`.

use std::collections::BTreeMap;

use odx_core::config::OdxConfig;
use odx_core::error::ORDER_NOT_FOUND_CODE;
use odx_core::{Credentials, NewOrder, OdxError, time_util};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

pub struct OdxRestClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Option<Credentials>,
}

impl OdxRestClient {
    pub fn new(config: &OdxConfig) -> Result<Self, OdxError> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .build()
            .map_err(|e| OdxError::Http(format!("client build failed: {e}")))?;
        Ok(Self { http, base_url: config.rest_base()?, credentials: config.credentials() })
    }

    // -----------------------------------------------------------------------
    // Public endpoints
    // -----------------------------------------------------------------------

    pub async fn get_status(&self) -> Result<Value, OdxError> {
        self.get_json("/v1/status", json!({})).await
    }

    pub async fn get_symbols_details(&self) -> Result<Value, OdxError> {
        self.get_json("/v1/symbol_details", json!({})).await
    }

    pub async fn get_ticker(&self, symbol: &str) -> Result<Value, OdxError> {
        self.get_json("/v1/ticker", json!({ "symbol": symbol })).await
    }

    pub async fn get_l2_snapshot(&self, symbol: &str) -> Result<Value, OdxError> {
        self.get_json("/v1/l2", json!({ "symbol": symbol })).await
    }

    pub async fn get_l3_snapshot(&self, symbol: &str) -> Result<Value, OdxError> {
        self.get_json("/v1/l3", json!({ "symbol": symbol })).await
    }

    /// Candles between two nanosecond timestamps.
    pub async fn get_historic_candles(
        &self,
        symbol: &str,
        resolution: Value,
        from_ns: u64,
        to_ns: u64,
    ) -> Result<Value, OdxError> {
        let payload = json!({ "symbol": symbol, "resolution": resolution, "from": from_ns, "to": to_ns });
        self.get_json("/v1/candles", payload).await
    }

    // -----------------------------------------------------------------------
    // Orders
    // -----------------------------------------------------------------------

    pub async fn new_order(&self, order: &NewOrder) -> Result<Value, OdxError> {
        let payload = order.to_payload()?;
        self.private_call(Some(&order.symbol), "/v1/order/new", payload).await
    }

    /// Cancel one order. Error code 42 becomes [`OdxError::OrderNotFound`].
    pub async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), OdxError> {
        let payload = object([("order_id", Value::from(order_id))]);
        match self.private_call(Some(symbol), "/v1/order/cancel", payload).await {
            Ok(_) => Ok(()),
            Err(e) if e.error_code() == Some(ORDER_NOT_FOUND_CODE) => {
                Err(OdxError::OrderNotFound(e.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn cancel_all_orders(&self, symbol: &str) -> Result<Value, OdxError> {
        self.private_call(Some(symbol), "/v1/order/cancel/all", Map::new()).await
    }

    pub async fn cancel_all_stop_orders(&self, symbol: &str) -> Result<Value, OdxError> {
        self.private_call(Some(symbol), "/v1/order/cancel_all_stop", Map::new()).await
    }

    pub async fn get_orders(&self, symbol: &str) -> Result<Value, OdxError> {
        self.private_call(Some(symbol), "/v1/l3_private", Map::new()).await
    }

    pub async fn get_stop_orders(&self, symbol: &str) -> Result<Value, OdxError> {
        self.private_call(Some(symbol), "/v1/stop_orders", Map::new()).await
    }

    pub async fn get_my_trades(&self, symbol: &str) -> Result<Value, OdxError> {
        self.private_call(Some(symbol), "/v1/trades_private", Map::new()).await
    }

    // -----------------------------------------------------------------------
    // Account and wallets
    // -----------------------------------------------------------------------

    pub async fn get_balances(&self) -> Result<Value, OdxError> {
        self.private_call(None, "/v1/balances", Map::new()).await
    }

    pub async fn get_positions(&self) -> Result<Value, OdxError> {
        self.private_call(None, "/v1/positions", Map::new()).await
    }

    pub async fn generate_new_wallet(&self, currency: &str) -> Result<Value, OdxError> {
        self.private_call(None, "/v1/wallets/generate", object([("curr", Value::from(currency))])).await
    }

    pub async fn generate_withdraw(
        &self,
        currency: &str,
        amount: rust_decimal::Decimal,
        address: &str,
    ) -> Result<Value, OdxError> {
        let payload = object([
            ("curr", Value::from(currency)),
            ("amount", Value::from(amount.to_string())),
            ("address", Value::from(address)),
        ]);
        self.private_call(None, "/v1/wallets/withdraw", payload).await
    }

    pub async fn get_wallets_list(&self) -> Result<Value, OdxError> {
        self.private_call(None, "/v1/wallets/list", Map::new()).await
    }

    pub async fn get_withdrawal_history(&self) -> Result<Value, OdxError> {
        self.private_call(None, "/v1/wallets/withdrawal_history", Map::new()).await
    }

    pub async fn get_deposit_history(&self) -> Result<Value, OdxError> {
        self.private_call(None, "/v1/wallets/deposit_history", Map::new()).await
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    async fn get_json(&self, path: &str, payload: Value) -> Result<Value, OdxError> {
        let url = format!("{}{path}", self.base_url);
        let resp = self.http.get(&url).json(&payload).send().await.map_err(http_error)?;

        let status = resp.status();
        let body = resp.text().await.map_err(http_error)?;
        if status != reqwest::StatusCode::OK {
            warn!("[rest] GET {path} -> {status}");
            return Err(OdxError::bad_response(path, payload, BTreeMap::new(), body));
        }
        parse_body(&body)
    }

    async fn private_call(
        &self,
        symbol: Option<&str>,
        path: &str,
        mut payload: Map<String, Value>,
    ) -> Result<Value, OdxError> {
        let creds = self.credentials.as_ref().ok_or(OdxError::MissingCredentials)?;

        payload.insert("timestamp".into(), Value::from(time_util::now_ns()));
        payload.insert("symbol".into(), symbol.map_or(Value::Null, Value::from));
        let body = Value::Object(payload);
        let body_text = body.to_string();

        let headers = signed_headers(creds, path, &body_text);
        let url = format!("{}{path}", self.base_url);
        debug!("[rest] POST {path}");

        let mut req = self.http.post(&url).body(body_text);
        for (k, v) in &headers {
            req = req.header(k.as_str(), v.as_str());
        }
        let resp = req.send().await.map_err(http_error)?;

        let status = resp.status();
        let text = resp.text().await.map_err(http_error)?;
        if status != reqwest::StatusCode::OK {
            warn!("[rest] POST {path} -> {status}");
            return Err(OdxError::bad_response(path, body, headers, text));
        }
        parse_body(&text)
    }
}

/// `APIKEY` + `SIGNATURE` headers for a private call.
fn signed_headers(creds: &Credentials, path: &str, body: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("APIKEY".to_string(), creds.api_key().to_string()),
        ("SIGNATURE".to_string(), creds.sign(path, body)),
    ])
}

/// An empty 200 body means "no data".
fn parse_body(text: &str) -> Result<Value, OdxError> {
    if text.is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_str(text).map_err(|e| OdxError::Parse(format!("response body is not JSON: {e}")))
}

fn http_error(e: reqwest::Error) -> OdxError {
    OdxError::Http(e.to_string())
}

fn object<const N: usize>(entries: [(&str, Value); N]) -> Map<String, Value> {
    entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}
