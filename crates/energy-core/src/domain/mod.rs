//! Domain layer: devices, live device state, automations and configuration.
//!
//! Nothing in here knows how bytes travel; the wire encodings for these types
//! live in [`crate::protocol::messages`].

pub mod automation;
pub mod configuration;
pub mod device;
pub mod state;
