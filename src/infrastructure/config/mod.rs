//! Configuration management infrastructure
//!
//! Hierarchical configuration using figment:
//! - YAML file loading
//! - Environment variable overrides
//! - Configuration validation, including the backend transport policy

pub mod loader;

pub use loader::{validate_backend_url, ConfigError, ConfigLoader};
