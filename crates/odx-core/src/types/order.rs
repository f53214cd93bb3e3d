//! Order requests shared by the stream and REST clients.
//!
//! Prices and volumes are [`Decimal`]s and go over the wire as decimal
//! strings, so `"0.1"` arrives as `"0.1"` and never as a binary float.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::enums::{OrderType, Side, TimeInForce};
use crate::error::OdxError;

/// A new-order request.
///
/// Field names match the venue's `order_new` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrder {
    pub symbol: String,
    /// Client-assigned order id.
    #[serde(rename = "cl_ord_id")]
    pub client_order_id: String,
    pub side: Side,
    pub price: Decimal,
    pub volume: Decimal,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    /// Required for limit orders, forbidden for market orders.
    pub time_in_force: Option<TimeInForce>,
    pub post_only: bool,
    pub stop: bool,
}

impl NewOrder {
    /// Limit order with the given time-in-force.
    pub fn limit(
        symbol: impl Into<String>,
        client_order_id: impl ToString,
        side: Side,
        price: Decimal,
        volume: Decimal,
        time_in_force: TimeInForce,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            client_order_id: client_order_id.to_string(),
            side,
            price,
            volume,
            order_type: OrderType::Limit,
            time_in_force: Some(time_in_force),
            post_only: false,
            stop: false,
        }
    }

    /// Market order. `price` is still sent; the venue uses it as a bound.
    pub fn market(
        symbol: impl Into<String>,
        client_order_id: impl ToString,
        side: Side,
        price: Decimal,
        volume: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            client_order_id: client_order_id.to_string(),
            side,
            price,
            volume,
            order_type: OrderType::Market,
            time_in_force: None,
            post_only: false,
            stop: false,
        }
    }

    pub fn post_only(mut self, post_only: bool) -> Self {
        self.post_only = post_only;
        self
    }

    pub fn stop(mut self, stop: bool) -> Self {
        self.stop = stop;
        self
    }

    /// Check the time-in-force rule for the order type.
    pub fn validate(&self) -> Result<(), OdxError> {
        match (self.order_type, self.time_in_force) {
            (OrderType::Limit, None) => Err(OdxError::Validation(
                "time_in_force must be set for orders with order_type='limit'".into(),
            )),
            (OrderType::Market, Some(tif)) => Err(OdxError::Validation(format!(
                "time_in_force must be None for orders with order_type='market', got {tif:?}"
            ))),
            _ => Ok(()),
        }
    }

    /// Validate and render as a JSON payload object.
    pub fn to_payload(&self) -> Result<serde_json::Map<String, serde_json::Value>, OdxError> {
        self.validate()?;
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => Ok(map),
            Ok(other) => Err(OdxError::Validation(format!("order rendered as non-object: {other}"))),
            Err(e) => Err(OdxError::Validation(format!("order serialization failed: {e}"))),
        }
    }
}
