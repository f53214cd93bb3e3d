//! # odx-rest
//!
//! Request/response client for the Onederx HTTP API. Shares signing,
//! config and errors with the stream client through `odx-core`.

pub mod client;

pub use client::OdxRestClient;
