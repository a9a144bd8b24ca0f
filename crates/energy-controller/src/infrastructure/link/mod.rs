//! Link implementations.
//!
//! Hardware adapters (a BLE central per platform) implement
//! [`crate::application::link::Link`] outside this crate.  The simulated link
//! hosts in-memory devices that speak the full protocol.

pub mod simulated;

pub use simulated::{PeripheralBehavior, SimulatedLink, SimulatedPeripheral};
