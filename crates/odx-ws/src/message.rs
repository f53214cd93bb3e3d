//! Wire messages for the duplex endpoint.
//!
//! Outbound frames are [`Envelope`]s: `{"type": <tag>, "payload": {...}}`
//! with `payload` omitted when absent. Inbound frames are arbitrary JSON
//! objects; [`Inbound`] sorts them into channel pushes and everything else.

use std::collections::BTreeMap;

use odx_core::OdxError;
use serde::Serialize;
use serde_json::{Map, Value};

/// Payload field carrying the correlation id of order commands.
pub const CORRELATION_FIELD: &str = "cl_req_id";

/// Outbound command tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Auth,
    Deauth,
    SymbolDetails,
    Subscribe,
    Unsubscribe,
    OrderNew,
    OrderCancel,
    OrderCancelAll,
    OrderCancelAllStop,
}

impl CommandKind {
    /// Whether the allocated correlation id is written into the payload.
    pub fn injects_correlation(self) -> bool {
        matches!(
            self,
            Self::OrderNew | Self::OrderCancel | Self::OrderCancelAll | Self::OrderCancelAllStop
        )
    }
}

/// Correlation id handed back to callers so they can match async replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct CorrelationId(u64);

impl CorrelationId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One outbound frame.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: CommandKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Map<String, Value>>,
}

impl Envelope {
    pub fn new(kind: CommandKind, payload: Option<Map<String, Value>>) -> Self {
        Self { kind, payload }
    }

    /// Serialize to the text sent on the socket.
    pub fn to_frame(&self) -> Result<String, OdxError> {
        serde_json::to_string(self).map_err(|e| OdxError::Parse(format!("envelope encode: {e}")))
    }
}

/// Routing key for channel traffic: channel name plus an unordered parameter set.
///
/// Parameter values are held as canonical JSON text, so the key is hashable
/// and `{"a":1,"b":2}` equals `{"b":2,"a":1}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey {
    channel: String,
    params: BTreeMap<String, String>,
}

impl SubscriptionKey {
    pub fn new(channel: impl Into<String>, params: &Map<String, Value>) -> Self {
        Self {
            channel: channel.into(),
            params: params.iter().map(|(k, v)| (k.clone(), v.to_string())).collect(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Build a key from an inbound `params` value; anything but an object is
    /// treated as the empty set.
    fn from_inbound(channel: &str, params: Option<&Value>) -> Self {
        match params.and_then(Value::as_object) {
            Some(map) => Self::new(channel, map),
            None => Self { channel: channel.to_string(), params: BTreeMap::new() },
        }
    }
}

/// A parsed inbound frame.
#[derive(Debug, Clone)]
pub enum Inbound {
    /// Channel-scoped push traffic.
    Push { key: SubscriptionKey, message: Value },
    /// Replies, acks, errors and anything else without a `channel`.
    Reply { message: Value },
}

impl Inbound {
    /// Parse one text frame. Non-JSON or non-object frames are errors.
    pub fn parse(text: &str) -> Result<Self, OdxError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| OdxError::Parse(format!("inbound frame is not JSON: {e}")))?;
        Self::from_value(value)
    }

    pub fn from_value(message: Value) -> Result<Self, OdxError> {
        let Some(obj) = message.as_object() else {
            return Err(OdxError::Parse(format!("inbound frame is not an object: {message}")));
        };

        match obj.get("channel").and_then(Value::as_str) {
            Some(channel) => {
                let key = SubscriptionKey::from_inbound(channel, obj.get("params"));
                Ok(Self::Push { key, message })
            }
            None => Ok(Self::Reply { message }),
        }
    }

    /// The full message as received.
    pub fn message(&self) -> &Value {
        match self {
            Self::Push { message, .. } | Self::Reply { message } => message,
        }
    }
}
