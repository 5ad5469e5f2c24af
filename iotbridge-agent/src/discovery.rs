//! Machine discovery on the control server
//!
//! A child of `ObjectsFolder` is a machine iff its display name is exactly
//! `Device <digits>`. Machines are paired with hub credentials by position;
//! the pairing is fixed for the life of the process.

use crate::error::{DiscoveryError, Result};
use crate::hub::DeviceCredential;
use crate::opc::{ControlServer, OBJECTS_FOLDER};
use tracing::{debug, info};

const DEVICE_PREFIX: &str = "Device ";

/// A discovered machine and the hub identity its telemetry is sent under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Display name, also the prefix of its tag node ids
    pub name: String,
    pub node_id: String,
    pub credential: DeviceCredential,
}

/// `Device` followed by a space and one or more ASCII digits, nothing else
pub fn is_device_name(name: &str) -> bool {
    match name.strip_prefix(DEVICE_PREFIX) {
        Some(number) => !number.is_empty() && number.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

/// Browse the server root and pair each machine with its credential
pub async fn discover_devices(
    server: &dyn ControlServer,
    credentials: Vec<DeviceCredential>,
) -> Result<Vec<Device>> {
    info!("Browsing control server for devices...");

    let children = server.browse_children(OBJECTS_FOLDER).await?;
    let nodes: Vec<_> = children
        .into_iter()
        .filter(|node| {
            let matched = is_device_name(&node.display_name);
            if !matched {
                debug!("Skipping node '{}'", node.display_name);
            }
            matched
        })
        .collect();

    if nodes.is_empty() {
        return Err(DiscoveryError::NoDevices.into());
    }
    if nodes.len() > credentials.len() {
        return Err(DiscoveryError::MissingCredentials {
            missing: nodes.len() - credentials.len(),
        }
        .into());
    }

    let devices: Vec<Device> = nodes
        .into_iter()
        .zip(credentials)
        .map(|(node, credential)| Device {
            name: node.display_name,
            node_id: node.node_id,
            credential,
        })
        .collect();

    for device in &devices {
        info!("Found {} -> hub device {}", device.name, device.credential.device_id);
    }
    info!("Discovered {} devices", devices.len());

    Ok(devices)
}
