//! # energy-core
//!
//! Shared library for EnergyKit containing the device domain model, the
//! automation rule types, and the secure transport codec used between a
//! controller and its energy devices.
//!
//! It has zero dependencies on radio stacks, async runtimes, or the file
//! system, so it can be used by the controller and by device firmware alike.
//!
//! # Architecture overview (for beginners)
//!
//! An EnergyKit installation is one **controller** plus a handful of
//! **power sources** (solar charge controllers, generators, grid inverters)
//! and **accessories** (outlets, lights, appliances).  The controller talks to
//! each device over a short-range wireless link where the only primitives are
//! "write some bytes to a slot" and "get notified with a few bytes from a
//! slot".  Everything else is built here:
//!
//! - **`domain`** – Pure data: devices, their live state, automations and the
//!   configuration value that ties devices to their keys.
//!
//! - **`crypto`** – Keys, HMAC authentication of timestamped nonces, AES-CCM
//!   encryption, and the freshness/replay checks applied to authentication.
//!
//! - **`protocol`** – The deterministic binary codec, the chunking layer that
//!   fits encrypted payloads into link-sized notifications, and the closed set
//!   of message kinds exchanged with devices.

pub mod crypto;
pub mod domain;
pub mod protocol;

pub use crypto::{
    authentication::{Authentication, AuthenticationMessage},
    encryption::EncryptedPayload,
    freshness::{Clock, FreshnessWindow, ReplayGuard, SystemClock},
    Nonce, PrivateKey,
};
pub use domain::automation::{Automation, Comparison, Predicate, PredicateError};
pub use domain::configuration::EnergyConfiguration;
pub use domain::device::{
    AccessoryType, Device, DeviceId, DeviceKind, PowerSourceCategory, VoltageSystem,
};
pub use domain::state::{
    AccessoryState, AccessoryStatus, DeviceState, PowerSourceState, PowerSourceStatus, PowerState,
};
pub use protocol::chunk::{reassemble, split, Chunk, ChunkBuffer};
pub use protocol::codec::{decode, encode, ProtocolError};
pub use protocol::messages::{open, seal, MessageKind, Sealed};
