//! Network collaborators: device inventory and configuration executor.
//!
//! The topology simulator and the configuration executor are external
//! systems. The agent only reaches them through tools, and the tools only
//! reach them through these traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::NetworkError;

/// A device in a topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    /// Console port on the simulator host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

/// Configuration lines for one device under one parent context.
///
/// `parent` is the command that enters the context the lines apply in
/// (`interface GigabitEthernet0/0`, `router ospf 1`); `None` or an empty
/// string means global configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub device_name: String,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl DeviceConfig {
    /// The parent context, with empty strings treated as global.
    pub fn context(&self) -> Option<&str> {
        self.parent.as_deref().filter(|p| !p.trim().is_empty())
    }
}

#[async_trait]
pub trait DeviceInventory: Send + Sync {
    async fn topology_exists(&self, topology_id: &str) -> Result<bool, NetworkError>;

    async fn list_devices(&self, topology_id: &str) -> Result<Vec<Device>, NetworkError>;
}

#[async_trait]
pub trait ConfigExecutor: Send + Sync {
    /// Read the running configuration of a device.
    async fn fetch_config(&self, topology_id: &str, device_name: &str)
    -> Result<String, NetworkError>;

    /// Apply `lines` on a device, entering `parent` first when given.
    async fn push_config(
        &self,
        topology_id: &str,
        device_name: &str,
        lines: &[String],
        parent: Option<&str>,
    ) -> Result<String, NetworkError>;
}
