//! Command encoder: typed call → envelope → outbound queue.
//!
//! Owns the correlation counter. Allocation and the queue push happen under
//! one lock, so ids on the wire are strictly increasing in queue order.

use std::sync::{Mutex, PoisonError};

use odx_core::OdxError;
use serde_json::{Map, Value};
use tracing::debug;

use crate::message::{CORRELATION_FIELD, CommandKind, CorrelationId, Envelope};
use crate::queue::OutboundSender;

pub struct CommandEncoder {
    /// Last id handed out; 0 means none yet.
    last_id: Mutex<u64>,
    queue: OutboundSender,
}

impl CommandEncoder {
    pub fn new(queue: OutboundSender) -> Self {
        Self { last_id: Mutex::new(0), queue }
    }

    /// Encode and enqueue a command, returning its correlation id.
    ///
    /// Order commands get the id written into the payload under `cl_req_id`;
    /// other kinds only return it.
    pub fn send(
        &self,
        kind: CommandKind,
        payload: Option<Map<String, Value>>,
    ) -> Result<CorrelationId, OdxError> {
        let mut last_id = self.last_id.lock().unwrap_or_else(PoisonError::into_inner);
        let id = CorrelationId::new(*last_id + 1);

        let payload = match payload {
            Some(mut map) if kind.injects_correlation() => {
                map.insert(CORRELATION_FIELD.to_string(), Value::from(id.get()));
                Some(map)
            }
            other => other,
        };

        let frame = Envelope::new(kind, payload).to_frame()?;
        debug!("[ws] queue {kind:?} id={id}: {frame}");
        self.queue.push(frame)?;
        // Only count ids that actually made it into the queue.
        *last_id = id.get();
        Ok(id)
    }

    /// Enqueue a bare, uncorrelated command (e.g. `deauth`).
    pub fn send_bare(&self, kind: CommandKind) -> Result<(), OdxError> {
        let frame = Envelope::new(kind, None).to_frame()?;
        let _guard = self.last_id.lock().unwrap_or_else(PoisonError::into_inner);
        debug!("[ws] queue {kind:?}: {frame}");
        self.queue.push(frame)
    }

    /// Most recently allocated id, if any.
    #[cfg(test)]
    fn last_id(&self) -> Option<CorrelationId> {
        let last_id = *self.last_id.lock().unwrap_or_else(PoisonError::into_inner);
        (last_id > 0).then(|| CorrelationId::new(last_id))
    }
}
