//! Typed error definitions for the Onederx client.
//!
//! [`OdxError`] is shared by the stream client and the REST client. Local
//! faults (validation, missing credentials) are raised before any I/O;
//! transport and parse faults end the current connection.

use std::collections::BTreeMap;

use thiserror::Error;

/// Error code the venue returns when a cancel targets an unknown order.
pub const ORDER_NOT_FOUND_CODE: i64 = 42;

/// Domain-specific errors for the Onederx client.
#[derive(Debug, Error)]
pub enum OdxError {
    /// Malformed caller input, rejected before anything is sent.
    #[error("validation error: {0}")]
    Validation(String),

    /// An authenticated operation was called without `api_key`/`secret`.
    #[error("api_key and secret must be provided before calling private methods")]
    MissingCredentials,

    /// Configuration parsing or validation error.
    #[error("config error: {0}")]
    Config(String),

    /// WebSocket connect, read, write or close failure.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// Inbound frame that is not a JSON object.
    #[error("parse error: {0}")]
    Parse(String),

    /// `run()` was called while another connection owns the outbound queue.
    #[error("connection driver is already running")]
    AlreadyRunning,

    /// HTTP transport failure (connect, timeout, body decode).
    #[error("http error: {0}")]
    Http(String),

    /// Non-200 reply from the REST API.
    #[error("Fail to call {url}, payload={payload}, headers={headers:?}. Reply: {body}")]
    BadResponse {
        url: String,
        payload: serde_json::Value,
        headers: BTreeMap<String, String>,
        body: String,
        error_code: Option<i64>,
        error_msg: Option<String>,
    },

    /// Cancel of an order the venue does not know about.
    #[error("order not found: {0}")]
    OrderNotFound(String),
}

impl OdxError {
    /// Build a [`OdxError::BadResponse`], pulling `error_code`/`error_msg`
    /// out of the body when it carries them.
    pub fn bad_response(
        url: impl Into<String>,
        payload: serde_json::Value,
        headers: BTreeMap<String, String>,
        body: impl Into<String>,
    ) -> Self {
        let body = body.into();
        let (error_code, error_msg) = if body.contains("error_code") {
            match serde_json::from_str::<serde_json::Value>(&body) {
                Ok(json) => (
                    json.get("error_code").and_then(serde_json::Value::as_i64),
                    json.get("error_msg").and_then(|m| m.as_str()).map(str::to_string),
                ),
                Err(_) => (None, None),
            }
        } else {
            (None, None)
        };

        Self::BadResponse { url: url.into(), payload, headers, body, error_code, error_msg }
    }

    /// Venue error code for a [`OdxError::BadResponse`], if one was parsed.
    pub fn error_code(&self) -> Option<i64> {
        match self {
            Self::BadResponse { error_code, .. } => *error_code,
            _ => None,
        }
    }
}
