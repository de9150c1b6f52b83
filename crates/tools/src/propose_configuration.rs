//! Configuration proposal — validates and structures a push without side
//! effects, so the operator (and the model) can review it first.

use async_trait::async_trait;
use dispatch_core::error::ToolError;
use dispatch_core::tool::{Tool, ToolResult};

use crate::{device_configs_schema, parse_device_configs};

pub struct ProposeConfigurationTool;

#[async_trait]
impl Tool for ProposeConfigurationTool {
    fn name(&self) -> &str {
        "propose_configuration"
    }

    fn description(&self) -> &str {
        "Validates and structures configuration commands before pushing to devices. \
         Returns a formatted proposal showing how commands will be organized. \
         Each entry needs device_name, commands, and parent for commands that require a \
         context (\"interface GigabitEthernet1/0\", \"router ospf 1\", \"vlan 10\"); \
         omit parent for global commands."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "topology_id": { "type": "string" },
                "device_configs": device_configs_schema()
            },
            "required": ["topology_id", "device_configs"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let configs = parse_device_configs(&arguments)?;

        let empty: Vec<&str> = configs
            .iter()
            .filter(|c| c.commands.is_empty())
            .map(|c| c.device_name.as_str())
            .collect();
        if !empty.is_empty() {
            return Ok(ToolResult::failed(format!(
                "Proposal has no commands for: {}",
                empty.join(", ")
            )));
        }

        let proposal = serde_json::json!({
            "devices": configs,
            "reasoning": "Configuration validated and structured with proper parent contexts."
        });
        let proposal = serde_json::to_string_pretty(&proposal).map_err(|e| {
            ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: e.to_string(),
            }
        })?;

        Ok(ToolResult::ok(format!(
            "<config_proposal>{proposal}</config_proposal>\n\n\
             Ready to push. Call push_configuration with the same device_configs structure."
        )))
    }
}
