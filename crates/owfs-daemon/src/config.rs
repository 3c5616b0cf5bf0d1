//! Configuration loading and validation

use anyhow::{bail, Result};
use owfs_core::{TemperatureScale, Timeouts};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default, rename = "bus")]
    pub buses: Vec<BusConfig>,
    #[serde(default)]
    pub units: UnitsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Bind address for the HTTP surface
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

fn default_bind() -> String {
    "0.0.0.0:2121".to_string()
}

/// Cache lifetimes in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_volatile")]
    pub volatile: u64,
    #[serde(default = "default_stable")]
    pub stable: u64,
    #[serde(default = "default_directory")]
    pub directory: u64,
    #[serde(default = "default_presence")]
    pub presence: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            volatile: default_volatile(),
            stable: default_stable(),
            directory: default_directory(),
            presence: default_presence(),
        }
    }
}

fn default_volatile() -> u64 {
    15
}

fn default_stable() -> u64 {
    300
}

fn default_directory() -> u64 {
    60
}

fn default_presence() -> u64 {
    120
}

/// One `[[bus]]` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BusConfig {
    /// DS2482-100/-800 on a Linux i2c bus; one bus per channel
    Ds2482 {
        /// i2c character device, e.g. `/dev/i2c-1`
        device: String,
        #[serde(default = "default_i2c_address")]
        address: u16,
        /// Use only the first N channels of an -800
        #[serde(default)]
        channels: Option<usize>,
    },
    /// A bus with simulated chips, for running without hardware
    Simulated {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        devices: Vec<SimulatedDeviceConfig>,
    },
}

fn default_i2c_address() -> u16 {
    0x18
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedDeviceConfig {
    /// ROM address, e.g. `28.67C6697351FF`
    pub address: String,
    /// Answer the conditional (alarm) search
    #[serde(default)]
    pub alarm: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnitsConfig {
    #[serde(default)]
    pub temperature_scale: TemperatureScale,
}

impl Config {
    pub fn timeouts(&self) -> Timeouts {
        let t = &self.timeouts;
        Timeouts::new(t.volatile, t.stable, t.directory, t.presence)
    }

    /// Reject settings that cannot work before any bus is opened
    pub fn validate(&self) -> Result<()> {
        for bus in &self.buses {
            if let BusConfig::Ds2482 { device, address, channels } = bus {
                if !(0x18..=0x1F).contains(address) {
                    bail!("{}: DS2482 address {:#04x} outside 0x18..0x1F", device, address);
                }
                if *channels == Some(0) {
                    bail!("{}: channels must be at least 1", device);
                }
            }
        }
        Ok(())
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    let config = if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), buses = config.buses.len(), "Loaded configuration");
        config
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Config::default()
    };
    config.validate()?;
    Ok(config)
}
