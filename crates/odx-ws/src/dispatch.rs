//! Inbound dispatch.
//!
//! Every message goes to the generic handler. Channel pushes additionally go
//! to the registry handler for their key, if one is registered; unmatched
//! pushes are not an error. Both calls happen synchronously on the receive
//! loop, so a slow handler stalls inbound processing.

use std::sync::Arc;

use tracing::trace;

use crate::message::Inbound;
use crate::registry::{Handler, SubscriptionRegistry};

pub struct Dispatcher {
    registry: Arc<SubscriptionRegistry>,
    on_message: Handler,
}

impl Dispatcher {
    pub fn new(registry: Arc<SubscriptionRegistry>, on_message: Handler) -> Self {
        Self { registry, on_message }
    }

    pub fn dispatch(&self, inbound: &Inbound) {
        if let Inbound::Push { key, message } = inbound {
            match self.registry.get(key) {
                Some(handler) => handler(message),
                None => trace!("[ws] no handler for {key:?}"),
            }
        }
        (self.on_message)(inbound.message());
    }
}
