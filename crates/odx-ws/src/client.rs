//! Onederx stream client.
//!
//! [`OdxWsClient`] ties the pieces together:
//!
//! ```text
//! caller ─► CommandEncoder ─► OutboundQueue ─► ConnectionDriver (send loop) ─► socket
//! socket ─► ConnectionDriver (recv loop) ─► Dispatcher ─► registry handler + generic handler
//! ```
//!
//! Command methods take `&self` and only enqueue, so they can be called from
//! any task, before or while [`run`](OdxWsClient::run) is active. Frames
//! queued while disconnected go out on the next connection. Replies arrive
//! asynchronously on the generic handler; match them by [`CorrelationId`].
//!
//! Handlers run on the receive loop and must not block.

use std::sync::Arc;

use odx_core::auth::WS_AUTH_PATH;
use odx_core::config::OdxConfig;
use odx_core::{Credentials, NewOrder, OdxError, time_util};
use serde_json::{Map, Value, json};
use tokio::sync::watch;
use tracing::info;

use crate::dispatch::Dispatcher;
use crate::driver::{ConnectionDriver, ConnectionState, WsConnConfig};
use crate::encoder::CommandEncoder;
use crate::message::{CommandKind, CorrelationId, SubscriptionKey};
use crate::queue::outbound_queue;
use crate::registry::{Handler, SubscriptionRegistry};

pub struct OdxWsClient {
    credentials: Option<Credentials>,
    encoder: CommandEncoder,
    registry: Arc<SubscriptionRegistry>,
    driver: ConnectionDriver,
}

impl OdxWsClient {
    /// Build a client from config. `on_message` sees every inbound message.
    pub fn new(config: &OdxConfig, on_message: Handler) -> Result<Self, OdxError> {
        let conn = WsConnConfig {
            url: config.ws_endpoint()?,
            max_frame_size: config.max_frame_size,
            close_timeout: config.close_timeout(),
        };
        Ok(Self::with_conn_config(conn, config.credentials(), on_message))
    }

    /// Build a client for an explicit endpoint.
    pub fn with_conn_config(
        conn: WsConnConfig,
        credentials: Option<Credentials>,
        on_message: Handler,
    ) -> Self {
        let (tx, rx) = outbound_queue();
        let registry = Arc::new(SubscriptionRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&registry), on_message));
        Self {
            credentials,
            encoder: CommandEncoder::new(tx),
            registry,
            driver: ConnectionDriver::new(conn, rx, dispatcher),
        }
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    /// Connect and process traffic until the connection ends.
    ///
    /// See [`ConnectionDriver::run`]. No automatic reconnect.
    pub async fn run(&self) -> Result<(), OdxError> {
        self.driver.run().await
    }

    /// Close the running connection; `run` then returns `Ok(())`.
    ///
    /// A request made while `run` is still starting is honoured.
    pub fn shutdown(&self) {
        self.driver.shutdown();
    }

    pub fn state(&self) -> ConnectionState {
        self.driver.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.driver.watch_state()
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    // -----------------------------------------------------------------------
    // Session
    // -----------------------------------------------------------------------

    /// Queue an `auth` command signed over `"/v1/ws" + timestamp`.
    ///
    /// Does not wait for the ack; it arrives on the generic handler.
    pub fn auth(&self) -> Result<CorrelationId, OdxError> {
        let creds = self.credentials.as_ref().ok_or(OdxError::MissingCredentials)?;
        let timestamp = time_util::now_ns().to_string();
        let signature = creds.sign(WS_AUTH_PATH, &timestamp);
        let payload = object([
            ("api_key", Value::from(creds.api_key())),
            ("signature", Value::from(signature)),
            ("timestamp", Value::from(timestamp)),
        ]);
        let id = self.encoder.send(CommandKind::Auth, Some(payload))?;
        info!("[ws] auth queued id={id}");
        Ok(id)
    }

    pub fn deauth(&self) -> Result<(), OdxError> {
        self.encoder.send_bare(CommandKind::Deauth)
    }

    pub fn symbol_details(&self) -> Result<CorrelationId, OdxError> {
        self.encoder.send(CommandKind::SymbolDetails, None)
    }

    // -----------------------------------------------------------------------
    // Orders (correlated via `cl_req_id`)
    // -----------------------------------------------------------------------

    /// Validate and queue a new order. Invalid orders never reach the queue.
    pub fn new_order(&self, order: &NewOrder) -> Result<CorrelationId, OdxError> {
        let payload = order.to_payload()?;
        self.encoder.send(CommandKind::OrderNew, Some(payload))
    }

    pub fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<CorrelationId, OdxError> {
        let payload = object([("symbol", Value::from(symbol)), ("order_id", Value::from(order_id))]);
        self.encoder.send(CommandKind::OrderCancel, Some(payload))
    }

    pub fn cancel_all_orders(&self, symbol: &str) -> Result<CorrelationId, OdxError> {
        self.encoder.send(CommandKind::OrderCancelAll, Some(object([("symbol", Value::from(symbol))])))
    }

    pub fn cancel_all_stop_orders(&self, symbol: &str) -> Result<CorrelationId, OdxError> {
        self.encoder.send(CommandKind::OrderCancelAllStop, Some(object([("symbol", Value::from(symbol))])))
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    /// Route `channel`/`params` pushes to `handler` and queue a `subscribe`.
    ///
    /// Subscribing the same key again replaces the handler. Registrations
    /// outlive the connection, but the remote side forgets them on
    /// disconnect: re-subscribe after reconnecting.
    pub fn subscribe<I, K, V>(
        &self,
        handler: Handler,
        channel: &str,
        params: I,
    ) -> Result<CorrelationId, OdxError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let params = collect_params(params);
        self.registry.insert(SubscriptionKey::new(channel, &params), handler);
        self.encoder.send(CommandKind::Subscribe, Some(subscriptions_payload(channel, params)))
    }

    /// Drop the handler for `channel`/`params` and queue an `unsubscribe`.
    pub fn unsubscribe<I, K, V>(&self, channel: &str, params: I) -> Result<CorrelationId, OdxError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let params = collect_params(params);
        self.registry.remove(&SubscriptionKey::new(channel, &params));
        self.encoder.send(CommandKind::Unsubscribe, Some(subscriptions_payload(channel, params)))
    }

    // Public channels.

    pub fn subscribe_l2(&self, handler: Handler, symbol: &str) -> Result<CorrelationId, OdxError> {
        self.subscribe(handler, "l2", [("symbol", symbol)])
    }

    pub fn subscribe_l3(&self, handler: Handler, symbol: &str) -> Result<CorrelationId, OdxError> {
        self.subscribe(handler, "l3", [("symbol", symbol)])
    }

    pub fn subscribe_trades(&self, handler: Handler, symbol: &str) -> Result<CorrelationId, OdxError> {
        self.subscribe(handler, "trades", [("symbol", symbol)])
    }

    pub fn subscribe_ticker(&self, handler: Handler, symbol: &str) -> Result<CorrelationId, OdxError> {
        self.subscribe(handler, "ticker", [("symbol", symbol)])
    }

    pub fn subscribe_candles(
        &self,
        handler: Handler,
        symbol: &str,
        resolution: Value,
    ) -> Result<CorrelationId, OdxError> {
        self.subscribe(handler, "candles", [("symbol", Value::from(symbol)), ("resolution", resolution)])
    }

    pub fn subscribe_index(&self, handler: Handler, name: &str) -> Result<CorrelationId, OdxError> {
        self.subscribe(handler, "index", [("name", name)])
    }

    // Private channels (send `auth` first).

    pub fn subscribe_trades_private(&self, handler: Handler, symbol: &str) -> Result<CorrelationId, OdxError> {
        self.subscribe(handler, "trades_private", [("symbol", symbol)])
    }

    pub fn subscribe_l3_private(&self, handler: Handler, symbol: &str) -> Result<CorrelationId, OdxError> {
        self.subscribe(handler, "l3_private", [("symbol", symbol)])
    }

    pub fn subscribe_action_replies(&self, handler: Handler, symbol: &str) -> Result<CorrelationId, OdxError> {
        self.subscribe(handler, "action_replies", [("symbol", symbol)])
    }

    pub fn subscribe_stop_orders(&self, handler: Handler, symbol: &str) -> Result<CorrelationId, OdxError> {
        self.subscribe(handler, "stop_orders", [("symbol", symbol)])
    }

    pub fn subscribe_balances(&self, handler: Handler) -> Result<CorrelationId, OdxError> {
        self.subscribe(handler, "balances", no_params())
    }

    pub fn subscribe_positions(&self, handler: Handler) -> Result<CorrelationId, OdxError> {
        self.subscribe(handler, "positions", no_params())
    }
}

fn no_params() -> [(&'static str, Value); 0] {
    []
}

fn collect_params<I, K, V>(params: I) -> Map<String, Value>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    params.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}

fn subscriptions_payload(channel: &str, params: Map<String, Value>) -> Map<String, Value> {
    object([("subscriptions", json!([{ "channel": channel, "params": params }]))])
}

fn object<const N: usize>(entries: [(&str, Value); N]) -> Map<String, Value> {
    entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}
