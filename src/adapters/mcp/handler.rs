//! Request dispatch shared by the stdio server and the event-stream hub.

use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use super::protocol::{
    classify, JsonRpcRequest, JsonRpcResponse, MessageKind, INVALID_PARAMS, INVALID_REQUEST, MCP_PROTOCOL_VERSION,
    METHOD_NOT_FOUND, PARSE_ERROR,
};
use crate::services::{ToolError, ToolRegistry};

pub const SERVER_NAME: &str = "nas-mcp";

#[derive(Debug, Deserialize)]
struct CallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Answers tool-invocation protocol requests against a tool registry.
#[derive(Clone)]
pub struct McpHandler {
    registry: Arc<ToolRegistry>,
}

impl McpHandler {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Handle one raw message. Returns `None` when no reply is owed.
    pub async fn handle_message(&self, line: &str) -> Option<JsonRpcResponse> {
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Discarding malformed message");
                return Some(JsonRpcResponse::error(
                    Value::Null,
                    PARSE_ERROR,
                    format!("Parse error: {e}"),
                ));
            }
        };
        self.handle_value(value).await
    }

    pub async fn handle_value(&self, value: Value) -> Option<JsonRpcResponse> {
        match classify(&value) {
            MessageKind::Response { id } => {
                debug!(id = %id, "Ignoring unsolicited response");
                None
            }
            MessageKind::Invalid => Some(JsonRpcResponse::error(
                Value::Null,
                INVALID_REQUEST,
                "Invalid request",
            )),
            MessageKind::Request { .. } | MessageKind::Notification => {
                let id = value.get("id").cloned().unwrap_or(Value::Null);
                match serde_json::from_value::<JsonRpcRequest>(value) {
                    Ok(request) => self.handle(request).await,
                    Err(e) => Some(JsonRpcResponse::error(
                        id,
                        INVALID_REQUEST,
                        format!("Invalid request: {e}"),
                    )),
                }
            }
        }
    }

    pub async fn handle(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let Some(id) = request.id else {
            debug!(method = %request.method, "Notification received");
            return None;
        };

        let response = match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(id, self.initialize_result()),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => {
                JsonRpcResponse::success(id, json!({ "tools": self.registry.definitions() }))
            }
            "tools/call" => self.call_tool(id, request.params).await,
            other => JsonRpcResponse::error(
                id,
                METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
            ),
        };
        Some(response)
    }

    fn initialize_result(&self) -> Value {
        json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {
                "tools": {}
            },
            "serverInfo": {
                "name": SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION")
            }
        })
    }

    async fn call_tool(&self, id: Value, params: Value) -> JsonRpcResponse {
        let params: CallParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(e) => {
                return JsonRpcResponse::error(id, INVALID_PARAMS, format!("Invalid params: {e}"))
            }
        };

        debug!(tool = %params.name, "Calling tool");
        match self.registry.call(&params.name, params.arguments).await {
            Ok(value) => JsonRpcResponse::success(id, tool_content(&value, false)),
            Err(err @ (ToolError::NotFound(_) | ToolError::InvalidArguments(_))) => {
                JsonRpcResponse::error(id, INVALID_PARAMS, err.to_string())
            }
            Err(ToolError::Execution(message)) => {
                warn!(tool = %params.name, error = %message, "Tool call failed");
                JsonRpcResponse::success(id, tool_content(&Value::String(message), true))
            }
        }
    }
}

/// Wrap a tool outcome as a single text content block.
fn tool_content(value: &Value, is_error: bool) -> Value {
    let text = match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_default(),
    };
    let mut result = json!({
        "content": [{ "type": "text", "text": text }]
    });
    if is_error {
        result["isError"] = Value::Bool(true);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{ToolDefinition, ToolHandler};
    use async_trait::async_trait;

    struct Flaky;

    #[async_trait]
    impl ToolHandler for Flaky {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "flaky".to_string(),
                description: "Fails when asked to".to_string(),
                input_schema: json!({"type": "object"}),
            }
        }

        async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
            if arguments.get("fail").and_then(Value::as_bool).unwrap_or(false) {
                Err(ToolError::Execution("pool is busy".to_string()))
            } else {
                Ok(json!({"ok": true}))
            }
        }
    }

    fn handler() -> McpHandler {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Flaky));
        McpHandler::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn test_initialize_announces_tools_capability() {
        let response = handler()
            .handle_message(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#)
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], MCP_PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], SERVER_NAME);
    }

    #[tokio::test]
    async fn test_notifications_get_no_reply() {
        let reply = handler()
            .handle_message(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await;
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn test_tools_list() {
        let response = handler()
            .handle_message(r#"{"jsonrpc":"2.0","id":"a","method":"tools/list"}"#)
            .await
            .unwrap();
        assert_eq!(response.id, json!("a"));
        assert_eq!(response.result.unwrap()["tools"][0]["name"], "flaky");
    }

    #[tokio::test]
    async fn test_tool_failure_is_reported_in_result() {
        let response = handler()
            .handle_message(
                r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"flaky","arguments":{"fail":true}}}"#,
            )
            .await
            .unwrap();
        assert!(response.error.is_none());
        let result = response.result.unwrap();
        assert_eq!(result["isError"], true);
        assert_eq!(result["content"][0]["text"], "pool is busy");
    }

    #[tokio::test]
    async fn test_tool_success_is_text_content() {
        let response = handler()
            .handle_message(
                r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"flaky"}}"#,
            )
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert!(result.get("isError").is_none());
        let text = result["content"][0]["text"].as_str().unwrap();
        assert_eq!(serde_json::from_str::<Value>(text).unwrap(), json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_unknown_tool_and_method() {
        let h = handler();
        let unknown_tool = h
            .handle_message(
                r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"nope"}}"#,
            )
            .await
            .unwrap();
        assert_eq!(unknown_tool.error.unwrap().code, INVALID_PARAMS);

        let unknown_method = h
            .handle_message(r#"{"jsonrpc":"2.0","id":5,"method":"resources/list"}"#)
            .await
            .unwrap();
        assert_eq!(unknown_method.error.unwrap().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_parse_error() {
        let response = handler().handle_message("{not json").await.unwrap();
        assert_eq!(response.id, Value::Null);
        assert_eq!(response.error.unwrap().code, PARSE_ERROR);
    }
}
