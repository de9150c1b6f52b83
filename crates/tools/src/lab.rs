//! Simulated lab — an in-process stand-in for the topology simulator and
//! the configuration executor.
//!
//! Each device keeps a running configuration as plain IOS-style text.
//! Pushed lines land inside their parent section (created on demand) or
//! at global level, always ahead of the closing `end`.

use async_trait::async_trait;
use dispatch_config::LabConfig;
use dispatch_core::error::NetworkError;
use dispatch_core::network::{ConfigExecutor, Device, DeviceInventory};
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

struct LabDevice {
    device: Device,
    running_config: Vec<String>,
    unreachable: bool,
}

/// Topologies keyed by id, devices in declaration order.
pub struct SimulatedLab {
    topologies: RwLock<BTreeMap<String, Vec<LabDevice>>>,
}

impl SimulatedLab {
    pub fn new() -> Self {
        Self {
            topologies: RwLock::new(BTreeMap::new()),
        }
    }

    /// Seed the lab from the `lab` configuration section.
    pub fn from_config(config: &LabConfig) -> Self {
        let topologies = config
            .topologies
            .iter()
            .map(|t| {
                let devices = t
                    .devices
                    .iter()
                    .map(|d| LabDevice {
                        device: Device {
                            name: d.name.clone(),
                            device_type: d.device_type.clone(),
                            port: d.port,
                            ip_address: d.ip_address.clone(),
                        },
                        running_config: d.running_config.lines().map(String::from).collect(),
                        unreachable: d.unreachable,
                    })
                    .collect();
                (t.id.clone(), devices)
            })
            .collect::<BTreeMap<_, _>>();

        info!(topologies = topologies.len(), "Simulated lab loaded");
        Self {
            topologies: RwLock::new(topologies),
        }
    }

    /// Add a device, creating its topology when needed.
    pub async fn add_device(&self, topology_id: &str, device: Device, running_config: &str) {
        let mut topologies = self.topologies.write().await;
        topologies
            .entry(topology_id.to_string())
            .or_default()
            .push(LabDevice {
                device,
                running_config: running_config.lines().map(String::from).collect(),
                unreachable: false,
            });
    }

    /// Mark a device as unreachable (or reachable again).
    pub async fn set_unreachable(
        &self,
        topology_id: &str,
        device_name: &str,
        unreachable: bool,
    ) -> Result<(), NetworkError> {
        let mut topologies = self.topologies.write().await;
        let device = find_device_mut(&mut topologies, topology_id, device_name)?;
        device.unreachable = unreachable;
        Ok(())
    }
}

impl Default for SimulatedLab {
    fn default() -> Self {
        Self::new()
    }
}

fn find_device_mut<'a>(
    topologies: &'a mut BTreeMap<String, Vec<LabDevice>>,
    topology_id: &str,
    device_name: &str,
) -> Result<&'a mut LabDevice, NetworkError> {
    let devices = topologies
        .get_mut(topology_id)
        .ok_or_else(|| NetworkError::TopologyNotFound(topology_id.to_string()))?;
    devices
        .iter_mut()
        .find(|d| d.device.name == device_name)
        .ok_or_else(|| NetworkError::DeviceNotFound {
            topology: topology_id.to_string(),
            device: device_name.to_string(),
        })
}

/// Insert `lines` into `config`, under `parent` when given.
fn apply_lines(config: &mut Vec<String>, lines: &[String], parent: Option<&str>) {
    let end = config
        .iter()
        .rposition(|l| l.trim() == "end")
        .unwrap_or(config.len());

    match parent {
        None => {
            let at = end;
            for (offset, line) in lines.iter().enumerate() {
                config.insert(at + offset, line.trim().to_string());
            }
        }
        Some(parent) => {
            let header = config[..end].iter().position(|l| l.trim() == parent.trim());
            let at = match header {
                Some(h) => {
                    // Skip the indented body of the existing section
                    let mut i = h + 1;
                    while i < end && config[i].starts_with(' ') {
                        i += 1;
                    }
                    i
                }
                None => {
                    config.insert(end, parent.trim().to_string());
                    end + 1
                }
            };
            for (offset, line) in lines.iter().enumerate() {
                config.insert(at + offset, format!(" {}", line.trim()));
            }
        }
    }
}

#[async_trait]
impl DeviceInventory for SimulatedLab {
    async fn topology_exists(&self, topology_id: &str) -> Result<bool, NetworkError> {
        Ok(self.topologies.read().await.contains_key(topology_id))
    }

    async fn list_devices(&self, topology_id: &str) -> Result<Vec<Device>, NetworkError> {
        let topologies = self.topologies.read().await;
        let devices = topologies
            .get(topology_id)
            .ok_or_else(|| NetworkError::TopologyNotFound(topology_id.to_string()))?;
        Ok(devices.iter().map(|d| d.device.clone()).collect())
    }
}

#[async_trait]
impl ConfigExecutor for SimulatedLab {
    async fn fetch_config(
        &self,
        topology_id: &str,
        device_name: &str,
    ) -> Result<String, NetworkError> {
        let mut topologies = self.topologies.write().await;
        let device = find_device_mut(&mut topologies, topology_id, device_name)?;
        if device.unreachable {
            return Err(NetworkError::Unreachable(device_name.to_string()));
        }
        Ok(device.running_config.join("\n"))
    }

    async fn push_config(
        &self,
        topology_id: &str,
        device_name: &str,
        lines: &[String],
        parent: Option<&str>,
    ) -> Result<String, NetworkError> {
        if lines.is_empty() {
            return Err(NetworkError::Rejected {
                device: device_name.to_string(),
                reason: "No commands provided to push.".into(),
            });
        }

        let mut topologies = self.topologies.write().await;
        let device = find_device_mut(&mut topologies, topology_id, device_name)?;
        if device.unreachable {
            return Err(NetworkError::Unreachable(device_name.to_string()));
        }

        apply_lines(&mut device.running_config, lines, parent);
        debug!(
            device = %device_name,
            lines = lines.len(),
            parent = ?parent,
            "Applied configuration"
        );

        Ok(match parent {
            Some(p) => format!("success, {} line(s) applied under '{p}'", lines.len()),
            None => format!("success, {} line(s) applied", lines.len()),
        })
    }
}
