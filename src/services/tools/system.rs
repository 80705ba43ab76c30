use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::domain::ports::{call_as, BackendClient};
use crate::services::tool_registry::{ToolDefinition, ToolError, ToolHandler};

/// Decoded reply of `system.info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub version: String,
    pub hostname: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub cores: Option<u32>,
    #[serde(default)]
    pub physmem: Option<u64>,
    #[serde(default)]
    pub uptime_seconds: Option<f64>,
    #[serde(default)]
    pub timezone: Option<String>,
}

/// `system_info`: synchronous typed backend call.
pub struct SystemInfoTool {
    backend: Arc<dyn BackendClient>,
}

impl SystemInfoTool {
    pub fn new(backend: Arc<dyn BackendClient>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ToolHandler for SystemInfoTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "system_info".to_string(),
            description: "Report the appliance hostname, software version, hardware model, memory and uptime.".to_string(),
            input_schema: json!({ "type": "object", "properties": {} }),
        }
    }

    async fn call(&self, _arguments: Value) -> Result<Value, ToolError> {
        let info: SystemInfo = call_as(self.backend.as_ref(), "system.info", vec![]).await?;
        serde_json::to_value(info).map_err(|e| ToolError::Execution(e.to_string()))
    }
}
