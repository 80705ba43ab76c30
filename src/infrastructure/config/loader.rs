use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use reqwest::Url;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Default project config file, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "nas-mcp.yaml";

/// Prefix for environment overrides (`NAS_MCP_BACKEND__API_KEY`, ...).
pub const ENV_PREFIX: &str = "NAS_MCP_";

/// Configuration error types
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid backend URL {0}: {1}")]
    InvalidUrl(String, String),

    #[error("Refusing insecure backend transport {0}: use wss://")]
    InsecureTransport(String),

    #[error("Unsupported backend URL scheme {0}: expected wss")]
    UnsupportedScheme(String),

    #[error("Invalid {0}: must be greater than zero")]
    ZeroValue(&'static str),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must not exceed max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Invalid bridge server URL {0}: {1}")]
    InvalidBridgeUrl(String, String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. `nas-mcp.yaml` in the working directory (optional)
    /// 3. Environment variables (`NAS_MCP_*` prefix, `__` for nesting)
    pub fn load() -> Result<Config> {
        Self::load_with(Path::new(DEFAULT_CONFIG_FILE))
    }

    /// Load configuration from a specific file, still honoring env overrides
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        Self::load_with(path)
    }

    fn load_with(path: &Path) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context(format!("Failed to load config from {}", path.display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        validate_backend_url(&config.backend.url)?;

        if config.backend.call_timeout_secs == 0 {
            return Err(ConfigError::ZeroValue("backend.call_timeout_secs"));
        }
        if config.backend.connect_timeout_secs == 0 {
            return Err(ConfigError::ZeroValue("backend.connect_timeout_secs"));
        }

        if config.tasks.poll_interval_secs == 0 {
            return Err(ConfigError::ZeroValue("tasks.poll_interval_secs"));
        }
        if config.tasks.cleanup_interval_secs == 0 {
            return Err(ConfigError::ZeroValue("tasks.cleanup_interval_secs"));
        }
        if config.tasks.default_ttl_secs == 0 {
            return Err(ConfigError::ZeroValue("tasks.default_ttl_secs"));
        }

        Url::parse(&config.bridge.server_url).map_err(|e| {
            ConfigError::InvalidBridgeUrl(config.bridge.server_url.clone(), e.to_string())
        })?;
        if config.bridge.request_timeout_secs == 0 {
            return Err(ConfigError::ZeroValue("bridge.request_timeout_secs"));
        }
        if config.bridge.endpoint_timeout_secs == 0 {
            return Err(ConfigError::ZeroValue("bridge.endpoint_timeout_secs"));
        }
        if config.bridge.initial_backoff_ms > config.bridge.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                config.bridge.initial_backoff_ms,
                config.bridge.max_backoff_ms,
            ));
        }

        if config.hub.queue_capacity == 0 {
            return Err(ConfigError::ZeroValue("hub.queue_capacity"));
        }
        if config.hub.broadcast_timeout_secs == 0 {
            return Err(ConfigError::ZeroValue("hub.broadcast_timeout_secs"));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        Ok(())
    }
}

/// Enforce the backend transport policy: only `wss://` endpoints.
///
/// A plain `ws://` URL is a configuration error, never downgraded.
pub fn validate_backend_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl(raw.to_string(), e.to_string()))?;
    match url.scheme() {
        "wss" => Ok(url),
        "ws" => Err(ConfigError::InsecureTransport(raw.to_string())),
        other => Err(ConfigError::UnsupportedScheme(other.to_string())),
    }
}
