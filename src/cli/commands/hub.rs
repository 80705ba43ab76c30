//! `hub`: tool server for event-stream subscribers.

use anyhow::Result;

use super::{interrupt, ToolRuntime};
use crate::adapters::mcp::EventStreamHub;
use crate::cli::types::HubArgs;
use crate::domain::models::Config;

pub async fn execute(config: Config, args: HubArgs) -> Result<()> {
    let mut hub_config = config.hub.clone();
    if let Some(host) = args.host {
        hub_config.host = host;
    }
    if let Some(port) = args.port {
        hub_config.port = port;
    }

    let runtime = ToolRuntime::start(&config)?;
    let hub = EventStreamHub::new(runtime.handler(), hub_config);

    let result = hub.serve_with_shutdown(interrupt()).await;
    runtime.shutdown().await;
    result
}
