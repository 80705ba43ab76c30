//! CLI command implementations.

pub mod bridge;
pub mod hub;
pub mod serve;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::adapters::mcp::McpHandler;
use crate::domain::models::Config;
use crate::domain::ports::BackendClient;
use crate::infrastructure::rpc::RpcClient;
use crate::services::{TaskManager, TaskManagerConfig, TaskStore, ToolRegistry};

/// Backend client, task poller and tool registry shared by the tool-serving
/// commands.
pub(crate) struct ToolRuntime {
    client: Arc<RpcClient>,
    manager: Arc<TaskManager>,
    poller: JoinHandle<()>,
    handler: McpHandler,
}

impl ToolRuntime {
    pub(crate) fn start(config: &Config) -> Result<Self> {
        let client = Arc::new(
            RpcClient::from_config(&config.backend).context("Failed to configure backend client")?,
        );
        let backend: Arc<dyn BackendClient> = client.clone();

        let manager = Arc::new(TaskManager::new(
            Arc::new(TaskStore::new()),
            Arc::clone(&backend),
            TaskManagerConfig::from(&config.tasks),
        ));
        let poller = manager.spawn();

        let registry = ToolRegistry::with_builtin_tools(Arc::clone(&manager), backend);
        info!(tools = registry.len(), backend = %config.backend.url, "Tool runtime ready");

        Ok(Self {
            client,
            manager,
            poller,
            handler: McpHandler::new(Arc::new(registry)),
        })
    }

    pub(crate) fn handler(&self) -> McpHandler {
        self.handler.clone()
    }

    pub(crate) async fn shutdown(self) {
        self.manager.stop();
        let _ = self.poller.await;
        self.client.close().await;
    }
}

/// Resolves once the process receives Ctrl-C.
pub(crate) async fn interrupt() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}
