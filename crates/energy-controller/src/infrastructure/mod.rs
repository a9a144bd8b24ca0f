//! Infrastructure adapters for the controller.
//!
//! - [`link`] – link implementations (the in-memory simulated link).
//! - [`storage`] – TOML configuration persistence.

pub mod link;
pub mod storage;
