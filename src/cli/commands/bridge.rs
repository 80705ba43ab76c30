//! `bridge`: local stdio endpoint proxied to a remote hub.

use anyhow::{Context, Result};

use crate::adapters::mcp::Bridge;
use crate::cli::types::BridgeArgs;
use crate::domain::models::Config;

pub async fn execute(config: Config, args: BridgeArgs) -> Result<()> {
    let mut bridge_config = config.bridge;
    if let Some(server_url) = args.server_url {
        bridge_config.server_url = server_url;
    }

    let bridge = Bridge::new(&bridge_config).context("Failed to configure bridge")?;
    bridge.run().await
}
