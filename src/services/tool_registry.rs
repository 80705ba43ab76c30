//! Named, schema-described tools and their dispatch.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::domain::errors::TaskError;
use crate::domain::ports::{BackendClient, BackendError};
use crate::services::task_manager::TaskManager;
use crate::services::tools;

/// Errors raised while resolving or running a tool.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    NotFound(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Execution(String),
}

impl From<BackendError> for ToolError {
    fn from(err: BackendError) -> Self {
        ToolError::Execution(err.to_string())
    }
}

impl From<TaskError> for ToolError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::InvalidCursor(_) => ToolError::InvalidArguments(err.to_string()),
            TaskError::NotFound(_) | TaskError::AlreadyTerminal { .. } => {
                ToolError::Execution(err.to_string())
            }
        }
    }
}

/// Tool metadata as advertised by `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// A single tool implementation.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn call(&self, arguments: Value) -> Result<Value, ToolError>;
}

/// Decode tool arguments into their typed shape.
pub fn parse_arguments<T: DeserializeOwned>(arguments: Value) -> Result<T, ToolError> {
    let arguments = if arguments.is_null() {
        Value::Object(Default::default())
    } else {
        arguments
    };
    serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

/// Registry of tools in registration order.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn ToolHandler>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the task tools and the backend tools.
    pub fn with_builtin_tools(manager: Arc<TaskManager>, backend: Arc<dyn BackendClient>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(tools::TasksGet::new(manager.clone())));
        registry.register(Arc::new(tools::TasksList::new(manager.clone())));
        registry.register(Arc::new(tools::TasksCancel::new(manager.clone())));
        registry.register(Arc::new(tools::SystemInfoTool::new(backend.clone())));
        registry.register(Arc::new(tools::PoolScrub::new(backend, manager)));
        registry
    }

    /// Add a tool; a later registration under the same name replaces the earlier one.
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        let name = handler.definition().name;
        match self.index.get(&name) {
            Some(&slot) => self.tools[slot] = handler,
            None => {
                self.index.insert(name, self.tools.len());
                self.tools.push(handler);
            }
        }
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|tool| tool.definition()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub async fn call(&self, name: &str, arguments: Value) -> Result<Value, ToolError> {
        let slot = self
            .index
            .get(name)
            .copied()
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        self.tools[slot].call(arguments).await
    }
}
