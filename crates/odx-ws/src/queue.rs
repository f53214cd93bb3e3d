//! Outbound frame queue.
//!
//! Unbounded FIFO of serialized envelopes. Any number of producers push;
//! the connection driver's send loop is the single consumer and suspends on
//! an empty queue until the next push.

use odx_core::OdxError;
use tokio::sync::mpsc;

/// Create a connected sender/receiver pair.
pub fn outbound_queue() -> (OutboundSender, OutboundReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (OutboundSender { tx }, OutboundReceiver { rx })
}

/// Producer half. Cheap to clone.
#[derive(Debug, Clone)]
pub struct OutboundSender {
    tx: mpsc::UnboundedSender<String>,
}

impl OutboundSender {
    /// Append a frame. Never blocks.
    pub fn push(&self, frame: String) -> Result<(), OdxError> {
        self.tx
            .send(frame)
            .map_err(|_| OdxError::WebSocket("outbound queue closed".into()))
    }
}

/// Consumer half, owned by whichever connection is currently running.
#[derive(Debug)]
pub struct OutboundReceiver {
    rx: mpsc::UnboundedReceiver<String>,
}

impl OutboundReceiver {
    /// Wait for the next frame. `None` once every sender is gone.
    pub async fn pop(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Next frame if one is already queued.
    pub fn try_pop(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }

    /// Frames waiting to be sent.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
