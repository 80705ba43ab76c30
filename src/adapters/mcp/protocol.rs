//! JSON-RPC 2.0 message types for the tool-invocation protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol revision announced by `initialize`.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// An inbound request or notification.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct JsonRpcRequest {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    /// Absent for notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

fn default_version() -> String {
    JSONRPC_VERSION.to_string()
}

impl JsonRpcRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A reply. Field order matches the conventional wire layout.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    pub fn to_line(&self) -> String {
        // Serializing plain data structs cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// How a raw line of protocol traffic should be routed.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageKind {
    /// Carries `method` and `id`; a reply is expected.
    Request { id: Value },
    /// Carries `method` but no `id`.
    Notification,
    /// Carries `id` but no `method`: a reply to an earlier request.
    Response { id: Value },
    Invalid,
}

pub fn classify(message: &Value) -> MessageKind {
    let id = message.get("id").filter(|id| !id.is_null()).cloned();
    let has_method = message.get("method").is_some_and(Value::is_string);
    match (has_method, id) {
        (true, Some(id)) => MessageKind::Request { id },
        (true, None) => MessageKind::Notification,
        (false, Some(id)) => MessageKind::Response { id },
        (false, None) => MessageKind::Invalid,
    }
}

/// Stable map key for a request id (`1` and `"1"` stay distinct).
pub fn id_key(id: &Value) -> String {
    id.to_string()
}
