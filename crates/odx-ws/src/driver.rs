//! Connection driver: one WebSocket connection attempt.
//!
//! [`ConnectionDriver::run`] connects, then runs two loops until either ends:
//!
//! 1. **send loop** (spawned task) pops the outbound queue and writes each
//!    frame in pop order.
//! 2. **receive loop** (the `run` task) reads frames, parses them and
//!    dispatches synchronously before reading the next one.
//!
//! A closed socket, read/write error or unparseable frame ends both loops
//! and `run` returns the error. There is no reconnect here; call `run` again.
//! [`ConnectionDriver::shutdown`] ends a running connection cleanly even when
//! the queue is idle and the read is blocked.
//!
//! The send task holds the queue guard. `run` waits for that task to finish on
//! every exit path, so a failed connection can be retried at once.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use odx_core::OdxError;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, OwnedMutexGuard, oneshot, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::dispatch::Dispatcher;
use crate::message::Inbound;
use crate::queue::OutboundReceiver;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Lifecycle of the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
    Failed,
}

/// Settings for one driver.
#[derive(Debug, Clone)]
pub struct WsConnConfig {
    /// Full endpoint URL (e.g. `wss://host/v1/ws`).
    pub url: String,
    /// Largest inbound message and frame, in bytes.
    pub max_frame_size: usize,
    /// How long shutdown waits for the close frame to go out.
    pub close_timeout: Duration,
}

pub struct ConnectionDriver {
    config: WsConnConfig,
    /// Held for the whole of `run`, which makes the send loop the only consumer.
    outbound: Arc<Mutex<OutboundReceiver>>,
    dispatcher: Arc<Dispatcher>,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
}

impl ConnectionDriver {
    pub fn new(config: WsConnConfig, outbound: OutboundReceiver, dispatcher: Arc<Dispatcher>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            outbound: Arc::new(Mutex::new(outbound)),
            dispatcher,
            state_tx,
            shutdown_tx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Watch state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Ask the running connection to close.
    ///
    /// The request stays raised until a `run` consumes it, so a shutdown
    /// issued while `run` is starting is not lost. With nothing running, the
    /// next `run` returns `Ok(())` straight away.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    fn fail(&self, err: &OdxError) {
        error!("[ws] connection failed: {err}");
        self.set_state(ConnectionState::Failed);
        self.set_state(ConnectionState::Disconnected);
    }

    /// Connect and run both loops until the connection ends.
    ///
    /// Returns `Ok(())` after [`shutdown`](Self::shutdown), the transport or
    /// parse error otherwise. The outbound queue is released before this
    /// returns, so `run` may be called again immediately.
    pub async fn run(&self) -> Result<(), OdxError> {
        let outbound =
            Arc::clone(&self.outbound).try_lock_owned().map_err(|_| OdxError::AlreadyRunning)?;

        let result = self.run_connection(outbound).await;
        // The request has been served by this connection.
        self.shutdown_tx.send_replace(false);

        match result {
            Ok(()) => {
                self.set_state(ConnectionState::Disconnected);
                info!("[ws] disconnected");
                Ok(())
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    async fn run_connection(&self, outbound: OwnedMutexGuard<OutboundReceiver>) -> Result<(), OdxError> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if *shutdown_rx.borrow_and_update() {
            info!("[ws] shutdown requested before connect");
            return Ok(());
        }

        self.set_state(ConnectionState::Connecting);
        info!("[ws] connecting to {}", self.config.url);

        let ws = tokio::select! {
            res = connect_ws(&self.config) => res?,
            _ = shutdown_requested(&mut shutdown_rx) => {
                info!("[ws] shutdown during connect");
                return Ok(());
            }
        };

        self.set_state(ConnectionState::Connected);
        info!("[ws] connected ({} frame(s) queued)", outbound.len());

        let (ws_write, ws_read) = ws.split();
        let (close_tx, close_rx) = oneshot::channel();
        let mut send_task = AbortOnDrop(tokio::spawn(send_loop(ws_write, outbound, close_rx)));
        let mut send_done = false;

        let result = tokio::select! {
            res = &mut send_task.0 => {
                send_done = true;
                match res {
                    Ok(res) => res,
                    Err(e) => Err(OdxError::WebSocket(format!("send loop aborted: {e}"))),
                }
            }
            res = recv_loop(ws_read, &self.dispatcher) => res,
            _ = shutdown_requested(&mut shutdown_rx) => {
                info!("[ws] shutdown signal received");
                self.set_state(ConnectionState::Closing);
                let _ = close_tx.send(());
                match tokio::time::timeout(self.config.close_timeout, &mut send_task.0).await {
                    Ok(_) => send_done = true,
                    Err(_) => warn!("[ws] close frame not sent within {:?}", self.config.close_timeout),
                }
                Ok(())
            }
        };

        // The send task owns the queue guard; wait until it is gone.
        if !send_done {
            send_task.0.abort();
            let _ = (&mut send_task.0).await;
        }
        result
    }
}

/// Resolves once a shutdown has been requested.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|requested| *requested).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Aborts the send task if `run` is dropped mid-connection.
struct AbortOnDrop<T>(tokio::task::JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Drain the queue onto the socket until closed or a write fails.
async fn send_loop(
    mut ws_write: SplitSink<WsStream, Message>,
    mut outbound: OwnedMutexGuard<OutboundReceiver>,
    mut close_rx: oneshot::Receiver<()>,
) -> Result<(), OdxError> {
    loop {
        tokio::select! {
            biased;

            _ = &mut close_rx => {
                let _ = ws_write.close().await;
                return Ok(());
            }

            frame = outbound.pop() => {
                let Some(frame) = frame else {
                    debug!("[ws] outbound queue closed");
                    let _ = ws_write.close().await;
                    return Ok(());
                };
                debug!("[ws] send: {frame}");
                ws_write
                    .send(Message::Text(frame.into()))
                    .await
                    .map_err(|e| OdxError::WebSocket(format!("send error: {e}")))?;
            }
        }
    }
}

/// Read, parse and dispatch frames in arrival order. Only returns on failure.
async fn recv_loop(mut ws_read: SplitStream<WsStream>, dispatcher: &Dispatcher) -> Result<(), OdxError> {
    loop {
        let inbound = match ws_read.next().await {
            Some(Ok(Message::Text(text))) => Inbound::parse(text.as_str())?,
            Some(Ok(Message::Binary(data))) => {
                let value: serde_json::Value = serde_json::from_slice(&data)
                    .map_err(|e| OdxError::Parse(format!("binary frame is not JSON: {e}")))?;
                Inbound::from_value(value)?
            }
            Some(Ok(Message::Close(frame))) => {
                warn!("[ws] received close frame: {frame:?}");
                return Err(OdxError::WebSocket("connection closed by remote".into()));
            }
            Some(Ok(_)) => continue, // Ping/Pong/Frame; pongs are queued by tungstenite
            Some(Err(e)) => return Err(OdxError::WebSocket(format!("read error: {e}"))),
            None => return Err(OdxError::WebSocket("stream ended".into())),
        };
        dispatcher.dispatch(&inbound);
    }
}

/// Open the socket with the configured size limits.
async fn connect_ws(config: &WsConnConfig) -> Result<WsStream, OdxError> {
    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(config.max_frame_size);
    ws_config.max_frame_size = Some(config.max_frame_size);

    let (stream, _response) =
        tokio_tungstenite::connect_async_with_config(config.url.as_str(), Some(ws_config), false)
            .await
            .map_err(|e| OdxError::WebSocket(format!("connect to {} failed: {e}", config.url)))?;
    Ok(stream)
}
