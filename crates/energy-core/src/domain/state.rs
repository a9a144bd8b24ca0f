//! Live device readings.
//!
//! A [`DeviceState`] is the decrypted snapshot a device returns when asked for
//! its information.  It is never persisted; the controller overwrites its copy
//! every evaluation cycle.

use serde::{Deserialize, Serialize};

use super::device::{AccessoryType, DeviceKind, PowerSourceCategory, VoltageSystem};

/// Abstract switching state used by automations.
///
/// Accessories support all three values.  Power sources only support
/// [`PowerState::Off`] and [`PowerState::On`]; see [`PowerSourceState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PowerState {
    Off = 0,
    On = 1,
    LowPowerMode = 2,
}

impl TryFrom<u8> for PowerState {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PowerState::Off),
            1 => Ok(PowerState::On),
            2 => Ok(PowerState::LowPowerMode),
            _ => Err(()),
        }
    }
}

/// Switching state of a power source output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PowerSourceState {
    Off = 0,
    On = 1,
}

impl TryFrom<u8> for PowerSourceState {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PowerSourceState::Off),
            1 => Ok(PowerSourceState::On),
            _ => Err(()),
        }
    }
}

/// Low-power mode has no power source equivalent.
impl TryFrom<PowerState> for PowerSourceState {
    type Error = ();

    fn try_from(value: PowerState) -> Result<Self, Self::Error> {
        match value {
            PowerState::Off => Ok(PowerSourceState::Off),
            PowerState::On => Ok(PowerSourceState::On),
            PowerState::LowPowerMode => Err(()),
        }
    }
}

impl From<PowerSourceState> for PowerState {
    fn from(value: PowerSourceState) -> Self {
        match value {
            PowerSourceState::Off => PowerState::Off,
            PowerSourceState::On => PowerState::On,
        }
    }
}

/// Accessories accept every [`PowerState`].
pub type AccessoryState = PowerState;

/// Readings reported by a power source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerSourceStatus {
    pub voltage: VoltageSystem,
    pub category: PowerSourceCategory,
    pub state: PowerSourceState,
    /// Output active power in watts.
    pub active_power: u16,
    /// Output load as a percentage of rated capacity.
    pub load_percent: u8,
    /// Battery state of charge, for sources that have a battery bank.
    pub battery_capacity: Option<u8>,
}

/// Readings reported by an accessory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessoryStatus {
    pub voltage: VoltageSystem,
    pub accessory_type: AccessoryType,
    pub state: PowerState,
    /// Active power drawn in watts.
    pub active_power: u16,
}

/// Snapshot of one device's mutable fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceState {
    PowerSource(PowerSourceStatus),
    Accessory(AccessoryStatus),
}

impl DeviceState {
    pub fn kind(&self) -> DeviceKind {
        match self {
            DeviceState::PowerSource(_) => DeviceKind::PowerSource,
            DeviceState::Accessory(_) => DeviceKind::Accessory,
        }
    }

    /// The device's switching state expressed as a [`PowerState`].
    pub fn power_state(&self) -> PowerState {
        match self {
            DeviceState::PowerSource(status) => status.state.into(),
            DeviceState::Accessory(status) => status.state,
        }
    }

    pub fn active_power(&self) -> u16 {
        match self {
            DeviceState::PowerSource(status) => status.active_power,
            DeviceState::Accessory(status) => status.active_power,
        }
    }

    /// Overwrites the switching state after a successful action.
    ///
    /// Returns `false` and leaves the state untouched when `state` has no
    /// equivalent for this kind of device.
    pub fn set_power_state(&mut self, state: PowerState) -> bool {
        match self {
            DeviceState::PowerSource(status) => match PowerSourceState::try_from(state) {
                Ok(s) => {
                    status.state = s;
                    true
                }
                Err(()) => false,
            },
            DeviceState::Accessory(status) => {
                status.state = state;
                true
            }
        }
    }
}
