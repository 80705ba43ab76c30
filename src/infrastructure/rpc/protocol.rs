//! Backend wire frames.
//!
//! The backend speaks JSON objects over a single text stream. Every frame
//! carries a `msg` discriminator; calls and replies are correlated by `id`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::ports::BackendError;

/// Protocol version offered in the handshake.
pub const PROTOCOL_VERSION: &str = "1";

/// Method used to authenticate a fresh connection.
pub const LOGIN_METHOD: &str = "auth.login_with_api_key";

/// Client handshake, sent once right after the transport opens.
#[derive(Debug, Serialize)]
pub struct ConnectFrame {
    pub msg: &'static str,
    pub version: &'static str,
    pub support: [&'static str; 1],
}

impl Default for ConnectFrame {
    fn default() -> Self {
        Self {
            msg: "connect",
            version: PROTOCOL_VERSION,
            support: [PROTOCOL_VERSION],
        }
    }
}

/// A method invocation.
#[derive(Debug, Serialize)]
pub struct MethodFrame<'a> {
    pub id: &'a str,
    pub msg: &'static str,
    pub method: &'a str,
    pub params: &'a [Value],
}

impl<'a> MethodFrame<'a> {
    pub fn new(id: &'a str, method: &'a str, params: &'a [Value]) -> Self {
        Self {
            id,
            msg: "method",
            method,
            params,
        }
    }
}

/// Reply to a server-initiated ping.
#[derive(Debug, Serialize)]
pub struct PongFrame {
    pub msg: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl PongFrame {
    pub fn answering(id: Option<Value>) -> Self {
        Self { msg: "pong", id }
    }
}

/// Error object carried by a `failed` reply.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireError {
    #[serde(default, alias = "error")]
    pub code: i64,
    #[serde(default, alias = "reason")]
    pub message: String,
    #[serde(default)]
    pub trace: Option<Value>,
}

impl From<WireError> for BackendError {
    fn from(err: WireError) -> Self {
        BackendError::Backend {
            code: err.code,
            message: err.message,
            trace: err.trace.filter(|t| !t.is_null()),
        }
    }
}

/// Any frame received from the backend.
#[derive(Debug, Deserialize)]
pub struct InboundFrame {
    pub msg: String,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<WireError>,
}

/// What the read loop should do with a decoded frame.
#[derive(Debug)]
pub enum Inbound {
    /// A reply for the pending call with this id.
    Reply {
        id: String,
        outcome: Result<Value, BackendError>,
    },
    /// A liveness probe that must be answered.
    Ping { id: Option<Value> },
    /// Handshake acknowledgement.
    Connected,
    /// Handshake rejection.
    Refused(String),
    /// Subscription events and anything else this client does not consume.
    Other(String),
}

impl InboundFrame {
    pub fn parse(text: &str) -> Result<Inbound, BackendError> {
        let frame: InboundFrame = serde_json::from_str(text)
            .map_err(|e| BackendError::Protocol(format!("malformed frame: {e}")))?;
        Ok(frame.classify())
    }

    fn classify(self) -> Inbound {
        match self.msg.as_str() {
            "result" | "failed" => {
                let Some(id) = self.id.as_ref().and_then(correlation_id) else {
                    return Inbound::Other(format!("{} without id", self.msg));
                };
                let outcome = match (self.msg.as_str(), self.error) {
                    (_, Some(error)) => Err(error.into()),
                    ("failed", None) => Err(WireError {
                        message: "call failed without error detail".to_string(),
                        ..WireError::default()
                    }
                    .into()),
                    _ => Ok(self.result.unwrap_or(Value::Null)),
                };
                Inbound::Reply { id, outcome }
            }
            "ping" => Inbound::Ping { id: self.id },
            "connected" => Inbound::Connected,
            "failed_connect" => Inbound::Refused(
                self.error
                    .map(|e| e.message)
                    .unwrap_or_else(|| "handshake refused".to_string()),
            ),
            other => Inbound::Other(other.to_string()),
        }
    }
}

/// Request ids are sent as strings; tolerate numeric echoes.
fn correlation_id(id: &Value) -> Option<String> {
    match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn encode<T: Serialize>(frame: &T) -> Result<String, BackendError> {
    serde_json::to_string(frame).map_err(|e| BackendError::Protocol(format!("encode failed: {e}")))
}
