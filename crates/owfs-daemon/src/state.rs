//! Application state: the filesystem context built from the configuration

use anyhow::{Context as _, Result};
use owfs_bus::{BusList, Chip, Ds2482, Ds2482Channel, LinuxI2c, SimDevice, SimulatedBus};
use owfs_core::{catalog, Address};
use owfs_fs::Context;
use std::sync::Arc;
use tracing::info;

use crate::config::{BusConfig, Config};

/// Shared application state
pub struct AppState {
    /// Filesystem context over every configured bus
    pub ctx: Context,
    /// Configuration
    pub config: Config,
}

impl AppState {
    /// Open every configured bus and freeze the registry
    pub fn new(config: Config) -> Result<Arc<Self>> {
        let buses = open_buses(&config.buses)?;
        info!(buses = buses.len(), "Bus masters ready");

        let ctx = Context::builder(catalog::registry(), buses)
            .timeouts(config.timeouts())
            .scale(config.units.temperature_scale)
            .build();
        Ok(Arc::new(Self { ctx, config }))
    }
}

fn open_buses(configs: &[BusConfig]) -> Result<BusList> {
    let mut buses = BusList::new();
    for (n, bus) in configs.iter().enumerate() {
        match bus {
            BusConfig::Ds2482 {
                device,
                address,
                channels,
            } => {
                let i2c = LinuxI2c::open(device, *address)
                    .with_context(|| format!("opening {} at {:#04x}", device, address))?;
                let chip = Ds2482::detect(Box::new(i2c))
                    .with_context(|| format!("no DS2482 on {} at {:#04x}", device, address))?;
                let split = Ds2482Channel::split(chip);
                let wanted = channels.unwrap_or(split.len());
                for (channel, adapter) in split.into_iter().take(wanted).enumerate() {
                    let index = buses.add(format!("{}:{:#04x}/{}", device, address, channel), Box::new(adapter));
                    info!(bus = index, device = %device, channel, "DS2482 channel attached");
                }
            }
            BusConfig::Simulated { name, devices } => {
                let sim = SimulatedBus::new();
                for entry in devices {
                    let address = Address::parse(&entry.address)
                        .with_context(|| format!("simulated device {}", entry.address))?;
                    let mut device = SimDevice::new(address, Chip::for_family(address.family()));
                    if entry.alarm {
                        device = device.alarmed();
                    }
                    sim.attach(device);
                }
                let name = name.clone().unwrap_or_else(|| format!("simulated.{}", n));
                let index = buses.add(name, Box::new(sim));
                info!(bus = index, devices = devices.len(), "Simulated bus attached");
            }
        }
    }
    Ok(buses)
}
