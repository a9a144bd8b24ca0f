//! Automation rules: "when device A reads X, put device B into state Y".
//!
//! # Evaluation (for beginners)
//!
//! Each [`Automation`] has one [`Condition`] and one [`Action`].  The
//! condition names a device and a [`Predicate`] over one of its readings:
//!
//! ```text
//! condition: device = <solar>, property = active_power, op = gt, value = 40
//! action:    device = <heater>, state = off
//! ```
//!
//! The controller evaluates the predicate against the device's cached
//! [`DeviceState`].  A predicate that does not make sense for the device (a
//! load percentage on an accessory, a battery level on a grid inverter) is an
//! error, which the caller treats as "not satisfied".

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::device::{DeviceId, DeviceKind};
use super::state::{DeviceState, PowerState};

/// Errors raised while evaluating a [`Predicate`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PredicateError {
    /// The property does not exist on this kind of device.
    #[error("{property} is not reported by a {kind}")]
    Unsupported {
        property: &'static str,
        kind: DeviceKind,
    },

    /// The device supports the property but did not report a value.
    #[error("{property} was not reported by the device")]
    Unavailable { property: &'static str },

    /// The operator cannot be applied to this property.
    #[error("operator {op} cannot be applied to {property}")]
    InvalidOperator {
        property: &'static str,
        op: Comparison,
    },
}

/// Comparison operator used by numeric and state predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Comparison {
    #[default]
    #[serde(rename = "eq")]
    Equal,
    #[serde(rename = "ne")]
    NotEqual,
    #[serde(rename = "gt")]
    Greater,
    #[serde(rename = "ge")]
    GreaterOrEqual,
    #[serde(rename = "lt")]
    Less,
    #[serde(rename = "le")]
    LessOrEqual,
}

impl Comparison {
    pub fn apply<T: PartialOrd>(self, reading: T, literal: T) -> bool {
        match self {
            Comparison::Equal => reading == literal,
            Comparison::NotEqual => reading != literal,
            Comparison::Greater => reading > literal,
            Comparison::GreaterOrEqual => reading >= literal,
            Comparison::Less => reading < literal,
            Comparison::LessOrEqual => reading <= literal,
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Comparison::Equal => "==",
            Comparison::NotEqual => "!=",
            Comparison::Greater => ">",
            Comparison::GreaterOrEqual => ">=",
            Comparison::Less => "<",
            Comparison::LessOrEqual => "<=",
        };
        f.write_str(symbol)
    }
}

/// A boolean test over one reading of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "property", rename_all = "snake_case")]
pub enum Predicate {
    State {
        #[serde(default)]
        op: Comparison,
        value: PowerState,
    },
    ActivePower {
        op: Comparison,
        value: u16,
    },
    LoadPercent {
        op: Comparison,
        value: u8,
    },
    BatteryCapacity {
        op: Comparison,
        value: u8,
    },
}

impl Predicate {
    /// Evaluates the predicate against a device snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`PredicateError`] when the property is not available on the
    /// device or the operator does not apply to it.
    pub fn evaluate(&self, state: &DeviceState) -> Result<bool, PredicateError> {
        match *self {
            Predicate::State { op, value } => {
                let current = state.power_state();
                match op {
                    Comparison::Equal => Ok(current == value),
                    Comparison::NotEqual => Ok(current != value),
                    _ => Err(PredicateError::InvalidOperator {
                        property: "state",
                        op,
                    }),
                }
            }
            Predicate::ActivePower { op, value } => Ok(op.apply(state.active_power(), value)),
            Predicate::LoadPercent { op, value } => match state {
                DeviceState::PowerSource(status) => Ok(op.apply(status.load_percent, value)),
                DeviceState::Accessory(_) => Err(PredicateError::Unsupported {
                    property: "load_percent",
                    kind: DeviceKind::Accessory,
                }),
            },
            Predicate::BatteryCapacity { op, value } => match state {
                DeviceState::PowerSource(status) => status
                    .battery_capacity
                    .map(|capacity| op.apply(capacity, value))
                    .ok_or(PredicateError::Unavailable {
                        property: "battery_capacity",
                    }),
                DeviceState::Accessory(_) => Err(PredicateError::Unsupported {
                    property: "battery_capacity",
                    kind: DeviceKind::Accessory,
                }),
            },
        }
    }
}

/// The device a rule watches and the test applied to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub device: DeviceId,
    #[serde(flatten)]
    pub predicate: Predicate,
}

/// The device a rule switches and the state it should end up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub device: DeviceId,
    pub state: PowerState,
}

/// A condition/action rule evaluated once per cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Automation {
    pub id: Uuid,
    pub name: String,
    pub condition: Condition,
    pub action: Action,
}
