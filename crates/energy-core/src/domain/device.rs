//! Device descriptors as declared in configuration.
//!
//! A [`Device`] describes the static facts about one piece of hardware: its
//! identifier, display name and the kind-specific electrical attributes.  The
//! mutable readings (on/off, active power, load) are not stored here; they are
//! fetched each evaluation cycle into a [`crate::domain::state::DeviceState`].

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an energy device, stable across restarts.
pub type DeviceId = Uuid;

/// The three roles a device can play in an installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum DeviceKind {
    Controller = 0x00,
    PowerSource = 0x01,
    Accessory = 0x02,
}

impl TryFrom<u8> for DeviceKind {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(DeviceKind::Controller),
            0x01 => Ok(DeviceKind::PowerSource),
            0x02 => Ok(DeviceKind::Accessory),
            _ => Err(()),
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceKind::Controller => "controller",
            DeviceKind::PowerSource => "power source",
            DeviceKind::Accessory => "accessory",
        };
        f.write_str(name)
    }
}

/// Nominal voltage of the circuit a device is attached to.
///
/// Serialized in configuration as the bare number of volts (`12`, `24`, `48`,
/// `110`, `220`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum VoltageSystem {
    Dc12,
    Dc24,
    Dc48,
    Ac110,
    Ac220,
}

impl VoltageSystem {
    /// Nominal volts.
    pub fn volts(self) -> u16 {
        match self {
            VoltageSystem::Dc12 => 12,
            VoltageSystem::Dc24 => 24,
            VoltageSystem::Dc48 => 48,
            VoltageSystem::Ac110 => 110,
            VoltageSystem::Ac220 => 220,
        }
    }

    /// Whether this is an alternating-current system.
    pub fn is_ac(self) -> bool {
        matches!(self, VoltageSystem::Ac110 | VoltageSystem::Ac220)
    }
}

impl TryFrom<u16> for VoltageSystem {
    type Error = String;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            12 => Ok(VoltageSystem::Dc12),
            24 => Ok(VoltageSystem::Dc24),
            48 => Ok(VoltageSystem::Dc48),
            110 => Ok(VoltageSystem::Ac110),
            220 => Ok(VoltageSystem::Ac220),
            other => Err(format!("unsupported voltage system: {other} V")),
        }
    }
}

impl From<VoltageSystem> for u16 {
    fn from(value: VoltageSystem) -> Self {
        value.volts()
    }
}

/// Where a power source gets its energy from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PowerSourceCategory {
    Solar = 1,
    Generator = 2,
    Grid = 3,
    Hybrid = 4,
}

impl TryFrom<u8> for PowerSourceCategory {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(PowerSourceCategory::Solar),
            2 => Ok(PowerSourceCategory::Generator),
            3 => Ok(PowerSourceCategory::Grid),
            4 => Ok(PowerSourceCategory::Hybrid),
            _ => Err(()),
        }
    }
}

/// What kind of load an accessory switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum AccessoryType {
    Outlet = 1,
    Light = 2,
    Appliance = 3,
    Utility = 4,
}

impl TryFrom<u8> for AccessoryType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(AccessoryType::Outlet),
            2 => Ok(AccessoryType::Light),
            3 => Ok(AccessoryType::Appliance),
            4 => Ok(AccessoryType::Utility),
            _ => Err(()),
        }
    }
}

/// A device declared in configuration.
///
/// Serialized with an internal `kind` tag so configuration files read as
/// `kind = "power_source"` next to the other fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Device {
    Controller {
        id: DeviceId,
        name: String,
    },
    PowerSource {
        id: DeviceId,
        name: String,
        voltage: VoltageSystem,
        category: PowerSourceCategory,
    },
    Accessory {
        id: DeviceId,
        name: String,
        voltage: VoltageSystem,
        accessory_type: AccessoryType,
    },
}

impl Device {
    pub fn id(&self) -> DeviceId {
        match self {
            Device::Controller { id, .. }
            | Device::PowerSource { id, .. }
            | Device::Accessory { id, .. } => *id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Device::Controller { name, .. }
            | Device::PowerSource { name, .. }
            | Device::Accessory { name, .. } => name,
        }
    }

    pub fn kind(&self) -> DeviceKind {
        match self {
            Device::Controller { .. } => DeviceKind::Controller,
            Device::PowerSource { .. } => DeviceKind::PowerSource,
            Device::Accessory { .. } => DeviceKind::Accessory,
        }
    }
}
