//! Configuration for the Onederx clients.
//!
//! Both transports and the runner read their settings from one JSON file.
//! Only the two base URLs are mandatory; credentials are optional and gate
//! the private operations.
//!
//! # Example config
//!
//! ```json
//! {
//!   "rest_url": "https://api.example.com",
//!   "ws_url": "wss://api.example.com",
//!   "api_key": "...",
//!   "secret": "...",
//!   "log": { "module_name": "odx-runner", "log_path": "/tmp/log" },
//!   "subscriptions": [
//!     { "channel": "l2", "params": { "symbol": "BTC-PERP" } },
//!     { "channel": "balances" }
//!   ]
//! }
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::auth::{Credentials, WS_AUTH_PATH};
use crate::error::OdxError;

/// Top-level client config, deserialized from a JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct OdxConfig {
    /// REST base URL (e.g. `https://host`), without a trailing path.
    pub rest_url: String,

    /// WebSocket base URL (e.g. `wss://host`); `/v1/ws` is appended.
    pub ws_url: String,

    /// API key for private operations.
    #[serde(default)]
    pub api_key: Option<String>,

    /// API secret for HMAC-SHA512 signing.
    #[serde(default)]
    pub secret: Option<String>,

    /// Largest inbound WebSocket message/frame accepted, in bytes.
    /// Full-depth book snapshots are large, so this defaults to 256 MiB.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Overall timeout for one REST call, in seconds.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// How long `shutdown()` waits for the close frame before dropping the socket.
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,

    /// Logging metadata (used by the runner).
    #[serde(default)]
    pub log: Option<LogMeta>,

    /// Channels the runner subscribes on every connection.
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionConfig>,
}

/// Logging metadata block.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogMeta {
    pub module_name: Option<String>,
    pub log_path: Option<String>,
    /// Emit JSON lines to the log file instead of plain text.
    #[serde(default)]
    pub json: bool,
}

/// One channel subscription request.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionConfig {
    pub channel: String,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl OdxConfig {
    /// Minimal config for the given endpoints; everything else defaults.
    pub fn new(rest_url: impl Into<String>, ws_url: impl Into<String>) -> Self {
        Self {
            rest_url: rest_url.into(),
            ws_url: ws_url.into(),
            api_key: None,
            secret: None,
            max_frame_size: default_max_frame_size(),
            http_timeout_secs: default_http_timeout_secs(),
            close_timeout_ms: default_close_timeout_ms(),
            log: None,
            subscriptions: Vec::new(),
        }
    }

    /// Attach credentials.
    pub fn with_credentials(mut self, api_key: impl Into<String>, secret: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self.secret = Some(secret.into());
        self
    }

    /// Credentials, present only when both key and secret are set.
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.api_key, &self.secret) {
            (Some(key), Some(secret)) => Some(Credentials::new(key.clone(), secret.clone())),
            _ => None,
        }
    }

    /// Full duplex endpoint (`<ws_url>/v1/ws`), validated.
    pub fn ws_endpoint(&self) -> Result<String, OdxError> {
        let endpoint = format!("{}{WS_AUTH_PATH}", self.ws_url.trim_end_matches('/'));
        let parsed = url::Url::parse(&endpoint)
            .map_err(|e| OdxError::Config(format!("invalid ws_url {:?}: {e}", self.ws_url)))?;
        match parsed.scheme() {
            "ws" | "wss" => Ok(endpoint),
            other => Err(OdxError::Config(format!("ws_url scheme must be ws or wss, got {other}"))),
        }
    }

    /// REST base URL with any trailing slash removed, validated.
    pub fn rest_base(&self) -> Result<String, OdxError> {
        let base = self.rest_url.trim_end_matches('/');
        let parsed = url::Url::parse(base)
            .map_err(|e| OdxError::Config(format!("invalid rest_url {:?}: {e}", self.rest_url)))?;
        match parsed.scheme() {
            "http" | "https" => Ok(base.to_string()),
            other => Err(OdxError::Config(format!("rest_url scheme must be http or https, got {other}"))),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    /// Module name for log file prefixes.
    pub fn module_name(&self) -> String {
        self.log
            .as_ref()
            .and_then(|m| m.module_name.clone())
            .unwrap_or_else(|| "odx".to_string())
    }
}

/// Load and parse a JSON config file.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<OdxConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: OdxConfig = serde_json::from_str(&content)?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Defaults (used by serde)
// ---------------------------------------------------------------------------

fn default_max_frame_size() -> usize {
    1 << 28
}

fn default_http_timeout_secs() -> u64 {
    10
}

fn default_close_timeout_ms() -> u64 {
    1000
}
