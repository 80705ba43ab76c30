use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Errors surfaced by a backend RPC call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    /// The client was configured with an unusable endpoint or credential.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Establishing the connection or handshake failed.
    #[error("Connect failed: {0}")]
    Connect(String),

    /// Reading or writing frames on a live connection failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The connection went away while the call was pending.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The backend rejected the credential.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The backend executed the call and reported an application error.
    #[error("{}", format_backend_error(.code, .message, .trace))]
    Backend {
        code: i64,
        message: String,
        trace: Option<Value>,
    },

    /// No reply arrived within the call timeout.
    #[error("Timed out after {0}s waiting for reply")]
    Timeout(u64),

    /// The reply did not have the expected shape.
    #[error("Unexpected reply shape from {method}: {message}")]
    Decode { method: String, message: String },

    /// The backend sent a frame that violates the wire protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

fn format_backend_error(code: &i64, message: &str, trace: &Option<Value>) -> String {
    let mut out = format!("Backend error {code}: {message}");
    match trace {
        None | Some(Value::Null) => {}
        Some(trace) => {
            // Backends send either a pre-formatted traceback or a structured frame list.
            let text = trace
                .get("formatted")
                .and_then(Value::as_str)
                .map_or_else(|| trace.to_string(), str::to_string);
            out.push_str("\nTrace: ");
            out.push_str(text.trim_end());
        }
    }
    out
}

impl BackendError {
    /// Whether the failure is a connection-level fault that a fresh
    /// connection may cure. Application errors are never retried.
    pub fn is_connection_level(&self) -> bool {
        match self {
            Self::Connect(_) | Self::ConnectionClosed | Self::Timeout(_) => true,
            Self::Transport(message) => {
                let message = message.to_lowercase();
                message.contains("broken pipe")
                    || message.contains("connection reset")
                    || message.contains("eof")
                    || message.contains("timeout")
                    || message.contains("timed out")
                    || message.contains("use of closed")
                    || message.contains("already closed")
                    || message.contains("connection closed")
            }
            Self::Config(_)
            | Self::Auth(_)
            | Self::Backend { .. }
            | Self::Decode { .. }
            | Self::Protocol(_) => false,
        }
    }
}

/// Port for issuing calls against the storage appliance backend.
///
/// Implementations multiplex any number of concurrent callers over one
/// connection; every call returns its own reply or an error.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Invoke a backend method with positional params.
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, BackendError>;
}

/// Decode a backend reply into a typed shape.
pub async fn call_as<T, C>(client: &C, method: &str, params: Vec<Value>) -> Result<T, BackendError>
where
    T: DeserializeOwned,
    C: BackendClient + ?Sized,
{
    let value = client.call(method, params).await?;
    serde_json::from_value(value).map_err(|e| BackendError::Decode {
        method: method.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_connection_level_classification() {
        assert!(BackendError::ConnectionClosed.is_connection_level());
        assert!(BackendError::Timeout(120).is_connection_level());
        assert!(BackendError::Transport("write: broken pipe".into()).is_connection_level());
        assert!(BackendError::Transport("Connection reset by peer".into()).is_connection_level());
        assert!(BackendError::Transport("unexpected EOF".into()).is_connection_level());
        assert!(BackendError::Transport("use of closed network connection".into()).is_connection_level());
        assert!(!BackendError::Transport("invalid utf-8".into()).is_connection_level());
        assert!(!BackendError::Auth("bad key".into()).is_connection_level());
        assert!(!BackendError::Backend { code: 22, message: "EINVAL".into(), trace: None }
            .is_connection_level());
    }

    #[test]
    fn test_backend_error_formats_code_message_and_trace() {
        let err = BackendError::Backend {
            code: 2,
            message: "[ENOENT] pool tank does not exist".into(),
            trace: Some(json!({"class": "CallError", "formatted": "Traceback (most recent call last):\n  ...\n"})),
        };
        let text = err.to_string();
        assert!(text.starts_with("Backend error 2: [ENOENT] pool tank does not exist"));
        assert!(text.contains("Trace: Traceback (most recent call last):"));

        let bare = BackendError::Backend { code: 13, message: "denied".into(), trace: None };
        assert_eq!(bare.to_string(), "Backend error 13: denied");
    }

    struct Fixed(Value);

    #[async_trait]
    impl BackendClient for Fixed {
        async fn call(&self, _method: &str, _params: Vec<Value>) -> Result<Value, BackendError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_call_as_reports_shape_mismatch() {
        #[derive(Debug, serde::Deserialize)]
        struct Info {
            #[allow(dead_code)]
            hostname: String,
        }

        let ok = Fixed(json!({"hostname": "nas01"}));
        assert!(call_as::<Info, _>(&ok, "system.info", vec![]).await.is_ok());

        let bad = Fixed(json!([1, 2, 3]));
        let err = call_as::<Info, _>(&bad, "system.info", vec![]).await.unwrap_err();
        assert!(matches!(err, BackendError::Decode { ref method, .. } if method == "system.info"));
    }
}
