//! energy-controller library entry point.
//!
//! The controller side of EnergyKit: device sessions over a notification
//! link, the automation engine that drives them, and the infrastructure
//! adapters (TOML configuration, in-memory simulated link).

pub mod application;
pub mod infrastructure;

pub use application::automation::{
    AutomationEngine, AutomationOutcome, ConfigurationError, CyclePhase, CycleReport,
    EngineSettings,
};
pub use application::link::{Advertisement, Link, PeripheralId, Subscription, TransportError};
pub use application::session::{DeviceSession, SessionError, SessionSettings};
