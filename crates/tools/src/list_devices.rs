//! Device listing tool — the agent's map of the topology.

use async_trait::async_trait;
use dispatch_core::error::ToolError;
use dispatch_core::network::DeviceInventory;
use dispatch_core::tool::{Tool, ToolResult};
use std::sync::Arc;

use crate::required_str;

pub struct ListDevicesTool {
    inventory: Arc<dyn DeviceInventory>,
}

impl ListDevicesTool {
    pub fn new(inventory: Arc<dyn DeviceInventory>) -> Self {
        Self { inventory }
    }
}

#[async_trait]
impl Tool for ListDevicesTool {
    fn name(&self) -> &str {
        "list_devices"
    }

    fn description(&self) -> &str {
        "List all devices in the specified topology to understand the network map. \
         Returns a JSON array of devices with names, types, port and IP address."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "topology_id": {
                    "type": "string",
                    "description": "Topology to inspect"
                }
            },
            "required": ["topology_id"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let topology_id = required_str(&arguments, "topology_id")?;

        match self.inventory.list_devices(topology_id).await {
            Ok(devices) => {
                let output = serde_json::to_string_pretty(&devices).map_err(|e| {
                    ToolError::ExecutionFailed {
                        tool_name: self.name().into(),
                        reason: e.to_string(),
                    }
                })?;
                Ok(ToolResult::ok(output))
            }
            Err(e) => Ok(ToolResult::failed(e.to_string())),
        }
    }
}
