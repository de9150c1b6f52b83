//! Configuration push — applies a batch of device configurations.
//!
//! Entries are applied in order. One device failing does not stop the
//! rest; every entry gets a `Device <name>: <result>` paragraph, failed
//! ones reading `Device <name>: Error: ...`. The batch itself always
//! completes, so the report is returned as a successful result.

use async_trait::async_trait;
use dispatch_core::error::ToolError;
use dispatch_core::network::ConfigExecutor;
use dispatch_core::tool::{Tool, ToolResult};
use std::sync::Arc;
use tracing::info;

use crate::{device_configs_schema, parse_device_configs, required_str};

pub struct PushConfigurationTool {
    executor: Arc<dyn ConfigExecutor>,
}

impl PushConfigurationTool {
    pub fn new(executor: Arc<dyn ConfigExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl Tool for PushConfigurationTool {
    fn name(&self) -> &str {
        "push_configuration"
    }

    fn description(&self) -> &str {
        "Pushes configuration commands to one or more live devices in a single call. \
         Call propose_configuration first. Each entry has device_name, commands and \
         parent; every non-global command group needs its own entry with the correct parent."
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
        let topology_id = required_str(&arguments, "topology_id")?;
        let configs = parse_device_configs(&arguments)?;

        let mut results = Vec::with_capacity(configs.len());

        for config in &configs {
            info!(
                topology = %topology_id,
                device = %config.device_name,
                lines = config.commands.len(),
                "Pushing configuration"
            );
            let outcome = self
                .executor
                .push_config(
                    topology_id,
                    &config.device_name,
                    &config.commands,
                    config.context(),
                )
                .await;
            match outcome {
                Ok(text) => results.push(format!("Device {}: {text}", config.device_name)),
                Err(e) => results.push(format!("Device {}: Error: {e}", config.device_name)),
            }
        }

        Ok(ToolResult::ok(results.join("\n\n")))
    }
}
