use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for nas-mcp
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Backend JSON-RPC connection
    #[serde(default)]
    pub backend: BackendConfig,

    /// Task polling and retention
    #[serde(default)]
    pub tasks: TaskConfig,

    /// stdio to event-stream bridge
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Event-stream hub server
    #[serde(default)]
    pub hub: HubConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Backend connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BackendConfig {
    /// WebSocket endpoint of the backend API (must be `wss://`)
    #[serde(default = "default_backend_url")]
    pub url: String,

    /// API key used to authenticate the session
    #[serde(default)]
    pub api_key: Option<String>,

    /// Accept certificates that fail verification (self-signed appliances).
    /// The connection is still encrypted.
    #[serde(default)]
    pub insecure_skip_verify: bool,

    /// Maximum wait for a single call's reply
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    /// Maximum wait for connect + handshake
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_backend_url() -> String {
    "wss://localhost/websocket".to_string()
}

const fn default_call_timeout_secs() -> u64 {
    120
}

const fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: default_backend_url(),
            api_key: None,
            insecure_skip_verify: false,
            call_timeout_secs: default_call_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl BackendConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Task manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TaskConfig {
    /// Period of the background poll cycle
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Period of the expired-task sweep
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// TTL applied to tasks when a tool does not choose one
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Poll attempts before a task is failed; 0 means unlimited
    #[serde(default)]
    pub max_poll_attempts: u32,
}

const fn default_poll_interval_secs() -> u64 {
    5
}

const fn default_cleanup_interval_secs() -> u64 {
    60
}

const fn default_ttl_secs() -> u64 {
    48 * 60 * 60
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            default_ttl_secs: default_ttl_secs(),
            max_poll_attempts: 0,
        }
    }
}

/// Protocol bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BridgeConfig {
    /// Base URL of the remote event-stream hub
    #[serde(default = "default_bridge_server_url")]
    pub server_url: String,

    /// Path of the subscriber stream on the hub
    #[serde(default = "default_sse_path")]
    pub sse_path: String,

    /// Bearer token presented to the hub
    #[serde(default)]
    pub api_key: Option<String>,

    /// Maximum wait for a reply to a forwarded request
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Maximum wait for the hub to announce its POST endpoint
    #[serde(default = "default_endpoint_timeout_secs")]
    pub endpoint_timeout_secs: u64,

    /// Retries for a failed POST (network failure or 5xx)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First retry delay; doubles on each retry
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Cap on the retry delay
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_bridge_server_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_sse_path() -> String {
    "/sse".to_string()
}

const fn default_request_timeout_secs() -> u64 {
    60
}

const fn default_endpoint_timeout_secs() -> u64 {
    5
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    1_000
}

const fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            server_url: default_bridge_server_url(),
            sse_path: default_sse_path(),
            api_key: None,
            request_timeout_secs: default_request_timeout_secs(),
            endpoint_timeout_secs: default_endpoint_timeout_secs(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Event-stream hub configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HubConfig {
    /// Host to bind to
    #[serde(default = "default_hub_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_hub_port")]
    pub port: u16,

    /// Bearer token required on every route except `/health`
    #[serde(default)]
    pub api_key: Option<String>,

    /// Capacity of each subscriber's outbound queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// How long a broadcast waits on one full subscriber queue
    #[serde(default = "default_broadcast_timeout_secs")]
    pub broadcast_timeout_secs: u64,

    /// Whether to enable CORS
    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

fn default_hub_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_hub_port() -> u16 {
    8080
}

const fn default_queue_capacity() -> usize {
    100
}

const fn default_broadcast_timeout_secs() -> u64 {
    30
}

const fn default_true() -> bool {
    true
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            host: default_hub_host(),
            port: default_hub_port(),
            api_key: None,
            queue_capacity: default_queue_capacity(),
            broadcast_timeout_secs: default_broadcast_timeout_secs(),
            enable_cors: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files (stderr only when unset)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Rotation for file output: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}
