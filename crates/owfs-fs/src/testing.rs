//! Shared fixtures for the unit tests

use std::sync::Arc;

use owfs_bus::{BusList, SimulatedBus};
use owfs_core::{catalog, Address, ManualClock, Registry};

use crate::context::Context;

pub(crate) fn thermometer() -> Address {
    Address::from_parts(0x28, [0x67, 0xC6, 0x69, 0x73, 0x51, 0xFF])
}

pub(crate) fn switch8() -> Address {
    Address::from_parts(0x29, [0xC4, 0xA4, 0x0C, 0x00, 0x00, 0x00])
}

pub(crate) fn switch2() -> Address {
    Address::from_parts(0x3A, [0x12, 0x34, 0x56, 0x78, 0x9A, 0x00])
}

pub(crate) fn eeprom() -> Address {
    Address::from_parts(0x2D, [0x10, 0x20, 0x30, 0x40, 0x50, 0x60])
}

pub(crate) fn hub() -> Address {
    Address::from_parts(0x1F, [0xAA, 0x00, 0x00, 0x00, 0x00, 0x01])
}

pub(crate) fn context_with(registry: Registry, sims: &[SimulatedBus]) -> (Context, Arc<ManualClock>) {
    let mut buses = BusList::new();
    for (i, sim) in sims.iter().enumerate() {
        buses.add(format!("sim{}", i), Box::new(sim.clone()));
    }
    let clock = Arc::new(ManualClock::default());
    let ctx = Context::builder(registry, buses).clock(clock.clone()).build();
    (ctx, clock)
}

pub(crate) fn context(sims: &[SimulatedBus]) -> (Context, Arc<ManualClock>) {
    context_with(catalog::registry(), sims)
}
