//! TOML-based configuration persistence for the controller.
//!
//! Reads and writes [`AppConfig`] to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\EnergyKit\config.toml`
//! - Linux:    `~/.config/energykit/config.toml`
//! - macOS:    `~/Library/Application Support/EnergyKit/config.toml`
//!
//! # What goes in the file (for beginners)
//!
//! One `[controller]` table with timing knobs, then arrays of tables for the
//! devices, their keys and the automations:
//!
//! ```toml
//! [controller]
//! scan_duration_ms = 3000
//! cycle_interval_secs = 30
//!
//! [[devices]]
//! kind = "accessory"
//! id = "5b4c8f0e-2f7e-4b55-9a3e-1d7c2b6a9f10"
//! name = "Water heater"
//! voltage = 110
//! accessory_type = "appliance"
//!
//! [[keys]]
//! device = "5b4c8f0e-2f7e-4b55-9a3e-1d7c2b6a9f10"
//! key = "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff"
//!
//! [[automations]]
//! id = "0d9e7c63-44a5-4b8f-8c8f-3f6c1b0f2a77"
//! name = "Shed load"
//! condition = { device = "…", property = "active_power", op = "gt", value = 40 }
//! action = { device = "5b4c8f0e-2f7e-4b55-9a3e-1d7c2b6a9f10", state = "off" }
//! ```
//!
//! Every `[controller]` field has a serde default, so a file containing only
//! devices still loads, and a missing file yields [`AppConfig::default`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use energy_core::crypto::freshness::FreshnessWindow;
use energy_core::{Automation, Device, DeviceId, EnergyConfiguration, PrivateKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::application::automation::EngineSettings;
use crate::application::session::{SessionSettings, DEFAULT_MAX_CHUNK_PAYLOAD};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A `[[keys]]` entry does not fit the device list.
    #[error("invalid key entry for device {device}: {reason}")]
    InvalidKey { device: DeviceId, reason: String },

    /// A `[controller]` value the session cannot work with.
    #[error("invalid controller setting {field}: {reason}")]
    InvalidSetting {
        field: &'static str,
        reason: &'static str,
    },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub controller: ControllerSettings,
    #[serde(default)]
    pub devices: Vec<Device>,
    #[serde(default)]
    pub keys: Vec<KeyEntry>,
    #[serde(default)]
    pub automations: Vec<Automation>,
}

/// Timing and transport knobs for the automation loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControllerSettings {
    /// Schema version string; bump on breaking changes.
    #[serde(default = "default_version")]
    pub version: String,
    /// `tracing` filter the embedding binary should install.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_scan_duration_ms")]
    pub scan_duration_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Payload bytes per chunk, excluding the 2-byte chunk header.
    #[serde(default = "default_max_chunk_payload")]
    pub max_chunk_payload: usize,
    #[serde(default = "default_cycle_interval_secs")]
    pub cycle_interval_secs: u64,
    /// Allowed clock skew on responses; `0` disables the check.
    #[serde(default = "default_freshness_window_secs")]
    pub freshness_window_secs: u64,
}

/// Shared secret for one configured device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeyEntry {
    pub device: DeviceId,
    pub key: PrivateKey,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_version() -> String {
    "1.0".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_scan_duration_ms() -> u64 {
    3_000
}
fn default_request_timeout_ms() -> u64 {
    5_000
}
fn default_max_chunk_payload() -> usize {
    DEFAULT_MAX_CHUNK_PAYLOAD
}
fn default_cycle_interval_secs() -> u64 {
    30
}
fn default_freshness_window_secs() -> u64 {
    FreshnessWindow::DEFAULT_MAX_SKEW.as_secs()
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            version: default_version(),
            log_level: default_log_level(),
            scan_duration_ms: default_scan_duration_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            max_chunk_payload: default_max_chunk_payload(),
            cycle_interval_secs: default_cycle_interval_secs(),
            freshness_window_secs: default_freshness_window_secs(),
        }
    }
}

impl ControllerSettings {
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }
}

impl AppConfig {
    /// Builds the read-only value the automation engine consumes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidKey`] for a key whose device is not
    /// configured, or for a device with more than one key.
    pub fn energy_configuration(&self) -> Result<EnergyConfiguration, ConfigError> {
        let mut keys = HashMap::with_capacity(self.keys.len());
        for entry in &self.keys {
            if !self.devices.iter().any(|d| d.id() == entry.device) {
                return Err(ConfigError::InvalidKey {
                    device: entry.device,
                    reason: "no such device".to_string(),
                });
            }
            if keys.insert(entry.device, entry.key.clone()).is_some() {
                return Err(ConfigError::InvalidKey {
                    device: entry.device,
                    reason: "duplicate key".to_string(),
                });
            }
        }
        Ok(EnergyConfiguration::new(
            self.devices.clone(),
            keys,
            self.automations.clone(),
        ))
    }

    /// Converts the `[controller]` table into engine and session settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidSetting`] when `max_chunk_payload` or
    /// `request_timeout_ms` is zero.
    pub fn engine_settings(&self) -> Result<EngineSettings, ConfigError> {
        let c = &self.controller;
        if c.max_chunk_payload == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "max_chunk_payload",
                reason: "must be at least 1 byte",
            });
        }
        if c.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "request_timeout_ms",
                reason: "must be greater than zero",
            });
        }

        let freshness = (c.freshness_window_secs > 0)
            .then(|| FreshnessWindow::new(Duration::from_secs(c.freshness_window_secs)));
        Ok(EngineSettings {
            scan_duration: Duration::from_millis(c.scan_duration_ms),
            session: SessionSettings {
                request_timeout: Duration::from_millis(c.request_timeout_ms),
                max_chunk_payload: c.max_chunk_payload,
                freshness,
            },
        })
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the base directory cannot
/// be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// # Errors
///
/// Same as [`config_dir`].
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from `path`, returning the default if the file does not
/// exist yet.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let cfg: AppConfig = toml::from_str(&content)?;
            debug!(
                path = %path.display(),
                devices = cfg.devices.len(),
                automations = cfg.automations.len(),
                "loaded configuration"
            );
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Loads from [`config_file_path`].
///
/// # Errors
///
/// Same as [`load_config`], plus [`ConfigError::NoPlatformConfigDir`].
pub fn load_default_config() -> Result<AppConfig, ConfigError> {
    load_config(&config_file_path()?)
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("EnergyKit"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("energykit"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("EnergyKit")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
