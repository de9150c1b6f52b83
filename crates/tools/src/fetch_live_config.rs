//! Live configuration fetch — reads a device's running configuration.

use async_trait::async_trait;
use dispatch_core::error::ToolError;
use dispatch_core::network::ConfigExecutor;
use dispatch_core::tool::{Tool, ToolResult};
use std::sync::Arc;

use crate::required_str;

pub struct FetchLiveConfigTool {
    executor: Arc<dyn ConfigExecutor>,
}

impl FetchLiveConfigTool {
    pub fn new(executor: Arc<dyn ConfigExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl Tool for FetchLiveConfigTool {
    fn name(&self) -> &str {
        "fetch_live_config"
    }

    fn description(&self) -> &str {
        "Connects to the device, runs 'show running-config' and returns the configuration. \
         Use this to inspect the device state before making any changes."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "topology_id": { "type": "string" },
                "device_name": {
                    "type": "string",
                    "description": "Device to read, e.g. \"R1\""
                }
            },
            "required": ["topology_id", "device_name"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let topology_id = required_str(&arguments, "topology_id")?;
        let device_name = required_str(&arguments, "device_name")?;

        match self.executor.fetch_config(topology_id, device_name).await {
            Ok(config) if config.trim().is_empty() => Ok(ToolResult::failed(format!(
                "No configuration found for device {device_name}"
            ))),
            Ok(config) => Ok(ToolResult::ok(config)),
            Err(e) => Ok(ToolResult::failed(e.to_string())),
        }
    }
}
