//! # odx-core
//!
//! Shared building blocks for the Onederx client crates:
//!
//! - **Types** (`types`): order enums and the [`NewOrder`] request
//! - **Configuration** (`config`): JSON config deserialization
//! - **Error types** (`error`): domain-specific [`OdxError`] via thiserror
//! - **Signing** (`auth`): HMAC-SHA512 request signer and [`Credentials`]
//! - **Time utilities** (`time_util`): nanosecond timestamps
//! - **Logging** (`logging`): tracing-based structured logging

pub mod auth;
pub mod config;
pub mod error;
pub mod logging;
pub mod time_util;
pub mod types;

pub use auth::Credentials;
pub use error::OdxError;
pub use types::*;
