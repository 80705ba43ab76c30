//! Adapters exposing the tool registry to callers.

pub mod mcp;
