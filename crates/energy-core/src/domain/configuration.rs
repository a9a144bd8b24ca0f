//! The read-only configuration value shared by the session and automation
//! components.
//!
//! It is assembled once (typically from a TOML file by the controller's
//! storage adapter) and then passed around behind an `Arc`.  There is no
//! global instance.

use std::collections::HashMap;

use super::automation::Automation;
use super::device::{Device, DeviceId};
use crate::crypto::PrivateKey;

/// Devices, their keys and the automations that reference them.
#[derive(Debug, Clone, Default)]
pub struct EnergyConfiguration {
    devices: Vec<Device>,
    keys: HashMap<DeviceId, PrivateKey>,
    automations: Vec<Automation>,
}

impl EnergyConfiguration {
    pub fn new(
        devices: Vec<Device>,
        keys: HashMap<DeviceId, PrivateKey>,
        automations: Vec<Automation>,
    ) -> Self {
        Self {
            devices,
            keys,
            automations,
        }
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Automations in the order they are evaluated.
    pub fn automations(&self) -> &[Automation] {
        &self.automations
    }

    pub fn device(&self, id: DeviceId) -> Option<&Device> {
        self.devices.iter().find(|d| d.id() == id)
    }

    pub fn key(&self, id: DeviceId) -> Option<&PrivateKey> {
        self.keys.get(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::device::{PowerSourceCategory, VoltageSystem};
    use uuid::Uuid;

    #[test]
    fn test_lookup_by_id_finds_device_and_key() {
        // Arrange
        let id = Uuid::new_v4();
        let key = PrivateKey::generate();
        let config = EnergyConfiguration::new(
            vec![Device::PowerSource {
                id,
                name: "Grid tie".to_string(),
                voltage: VoltageSystem::Ac220,
                category: PowerSourceCategory::Grid,
            }],
            HashMap::from([(id, key.clone())]),
            Vec::new(),
        );

        // Act / Assert
        assert_eq!(config.device(id).map(Device::name), Some("Grid tie"));
        assert_eq!(config.key(id), Some(&key));
        assert!(config.device(Uuid::new_v4()).is_none());
    }
}
