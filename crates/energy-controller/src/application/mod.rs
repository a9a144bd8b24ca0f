//! Application layer: device sessions and the automation engine.
//!
//! Everything here depends on the [`link::Link`] trait rather than a concrete
//! radio stack, so the whole layer runs against
//! [`crate::infrastructure::link::SimulatedLink`] in tests.

pub mod automation;
pub mod link;
pub mod session;
pub mod state_cache;
