//! Device and simulator configuration
//!
//! This module contains the provisioning data of simulated devices:
//! - Identifiers and keys (DevEUI, JoinEUI, AppKey)
//! - Uplink behaviour (interval, port, payload, confirmation)
//! - Supported device classes
//!
//! Configuration is read once at startup and never mutated by a running device.

/// Device configuration and identifier types
pub mod device;

use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

pub use device::{AESKey, DevAddr, DeviceConfig, EUI64};

/// Set of devices to simulate
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SimulatorConfig {
    /// Simulated devices
    #[serde(default, rename = "device")]
    pub devices: Vec<DeviceConfig>,
}

impl SimulatorConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        log::info!(
            "Loaded {} device(s) from {}",
            config.devices.len(),
            path.display()
        );
        Ok(config)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(content)?;
        for (index, device) in config.devices.iter_mut().enumerate() {
            if device.id == 0 {
                device.id = index as u32 + 1;
            }
        }
        Ok(config)
    }
}
