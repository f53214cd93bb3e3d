//! Subscription registry: (channel, params) → handler.
//!
//! Entries belong to the client, not to a connection, and survive
//! reconnects. Lookups clone the handler out so no lock is held while it
//! runs.

use std::sync::{Arc, PoisonError, RwLock};

use ahash::AHashMap;
use serde_json::Value;

use crate::message::SubscriptionKey;

/// Callback invoked with each inbound message routed to it.
///
/// Runs on the receive loop; it must return quickly.
pub type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Default)]
pub struct SubscriptionRegistry {
    handlers: RwLock<AHashMap<SubscriptionKey, Handler>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `handler` for `key`, returning the one it replaced.
    pub fn insert(&self, key: SubscriptionKey, handler: Handler) -> Option<Handler> {
        self.handlers.write().unwrap_or_else(PoisonError::into_inner).insert(key, handler)
    }

    pub fn remove(&self, key: &SubscriptionKey) -> Option<Handler> {
        self.handlers.write().unwrap_or_else(PoisonError::into_inner).remove(key)
    }

    pub fn get(&self, key: &SubscriptionKey) -> Option<Handler> {
        self.handlers.read().unwrap_or_else(PoisonError::into_inner).get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
