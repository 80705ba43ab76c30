//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "nas-mcp")]
#[command(about = "Tool server and stdio/SSE bridge for a storage appliance backend", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to nas-mcp.yaml in the working directory)
    #[arg(short, long, global = true, env = "NAS_MCP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve tools over line-delimited JSON-RPC on stdin/stdout
    Serve,

    /// Serve tools to event-stream subscribers over HTTP
    Hub(HubArgs),

    /// Proxy stdin/stdout to a remote event-stream hub
    Bridge(BridgeArgs),
}

#[derive(Args, Debug, Default)]
pub struct HubArgs {
    /// Address to bind
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,
}

#[derive(Args, Debug, Default)]
pub struct BridgeArgs {
    /// Base URL of the remote hub
    #[arg(long)]
    pub server_url: Option<String>,
}
