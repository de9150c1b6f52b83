//! Network tools for the Dispatch agent.
//!
//! Tools give the agent the ability to act on a topology: list its
//! devices, read running configurations, propose and push configuration,
//! and look up documentation in the knowledge base.
//!
//! The network itself is reached through `DeviceInventory` and
//! `ConfigExecutor`; [`SimulatedLab`] implements both in-process.

pub mod fetch_live_config;
pub mod fetch_related_knowledge;
pub mod lab;
pub mod list_devices;
pub mod propose_configuration;
pub mod push_configuration;

pub use lab::SimulatedLab;

use dispatch_core::error::ToolError;
use dispatch_core::knowledge::KnowledgeSource;
use dispatch_core::network::{ConfigExecutor, DeviceConfig, DeviceInventory};
use dispatch_core::tool::ToolRegistry;
use std::sync::Arc;

/// Create the tool registry served to the agent.
pub fn default_registry(
    inventory: Arc<dyn DeviceInventory>,
    executor: Arc<dyn ConfigExecutor>,
    knowledge: Arc<dyn KnowledgeSource>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(list_devices::ListDevicesTool::new(inventory)));
    registry.register(Box::new(fetch_live_config::FetchLiveConfigTool::new(
        executor.clone(),
    )));
    registry.register(Box::new(propose_configuration::ProposeConfigurationTool));
    registry.register(Box::new(push_configuration::PushConfigurationTool::new(
        executor,
    )));
    registry.register(Box::new(
        fetch_related_knowledge::FetchRelatedKnowledgeTool::new(knowledge),
    ));
    registry
}

/// A required string argument.
pub(crate) fn required_str<'a>(
    arguments: &'a serde_json::Value,
    key: &str,
) -> Result<&'a str, ToolError> {
    arguments[key]
        .as_str()
        .ok_or_else(|| ToolError::InvalidArguments(format!("Missing '{key}' argument")))
}

/// The `device_configs` list shared by the proposal and push tools.
pub(crate) fn parse_device_configs(
    arguments: &serde_json::Value,
) -> Result<Vec<DeviceConfig>, ToolError> {
    let value = arguments
        .get("device_configs")
        .ok_or_else(|| ToolError::InvalidArguments("Missing 'device_configs' argument".into()))?;

    let configs: Vec<DeviceConfig> = serde_json::from_value(value.clone())
        .map_err(|e| ToolError::InvalidArguments(format!("Invalid 'device_configs': {e}")))?;

    if configs.is_empty() {
        return Err(ToolError::InvalidArguments(
            "'device_configs' must name at least one device".into(),
        ));
    }
    Ok(configs)
}

pub(crate) fn device_configs_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "array",
        "description": "One entry per device and parent context",
        "items": {
            "type": "object",
            "properties": {
                "device_name": {
                    "type": "string",
                    "description": "Target device, e.g. \"R1\""
                },
                "commands": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Configuration lines"
                },
                "parent": {
                    "type": "string",
                    "description": "Context command such as \"interface GigabitEthernet1/0\"; omit for global commands"
                }
            },
            "required": ["device_name", "commands"]
        }
    })
}

#[cfg(test)]
pub(crate) async fn test_lab() -> Arc<SimulatedLab> {
    use dispatch_core::network::Device;

    let lab = SimulatedLab::new();
    for (name, port) in [("R1", 5000), ("R2", 5001)] {
        lab.add_device(
            "lab",
            Device {
                name: name.into(),
                device_type: Some("router".into()),
                port: Some(port),
                ip_address: None,
            },
            &format!("hostname {name}\n!\nend"),
        )
        .await;
    }
    Arc::new(lab)
}
