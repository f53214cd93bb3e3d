//! # odx-ws
//!
//! Duplex WebSocket client for the Onederx API.
//!
//! ## Components
//!
//! - [`encoder`]: typed commands → envelopes, correlation ids
//! - [`queue`]: unbounded FIFO of outbound frames
//! - [`registry`]: (channel, params) → handler table
//! - [`dispatch`]: routes inbound messages to handlers
//! - [`driver`]: connection state machine, send and receive loops
//! - [`client`]: [`OdxWsClient`], the public entry point

pub mod client;
pub mod dispatch;
pub mod driver;
pub mod encoder;
pub mod message;
pub mod queue;
pub mod registry;

pub use client::OdxWsClient;
pub use driver::{ConnectionState, WsConnConfig};
pub use message::{CorrelationId, Inbound, SubscriptionKey};
pub use registry::Handler;
