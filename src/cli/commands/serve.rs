//! `serve`: tool server on stdin/stdout.

use anyhow::Result;

use super::ToolRuntime;
use crate::adapters::mcp::StdioServer;
use crate::domain::models::Config;

pub async fn execute(config: Config) -> Result<()> {
    let runtime = ToolRuntime::start(&config)?;
    let server = StdioServer::new(runtime.handler());

    let result = server.run().await;
    runtime.shutdown().await;
    result
}
