//! owfs Bus - 1-Wire bus masters and ROM search
//!
//! This crate provides:
//! - The [`Adapter`] primitive set (reset, byte I/O, search triplet)
//! - A DS2482-100/-800 driver over Linux i2c-dev
//! - A simulated bus for running without hardware
//! - Bus masters with per-bus locking, statistics, hub branch selection
//!   and reconnect handling
//! - The binary discrepancy ROM search

pub mod adapter;
pub mod ds2482;
pub mod i2c;
pub mod link;
pub mod master;
pub mod search;
pub mod sim;

pub use adapter::{Adapter, Reset, Triplet};
pub use ds2482::{Ds2482, Ds2482Channel};
pub use i2c::{I2cBus, LinuxI2c};
pub use link::DeviceLink;
pub use master::{BusGuard, BusList, BusMaster, ReconnectState};
pub use search::{verify, Search, Step};
pub use sim::{Chip, SimDevice, SimulatedBus};
