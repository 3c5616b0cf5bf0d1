//! [`Link`] implementation over a locked bus master

use std::time::Duration;

use owfs_core::{Address, BranchHop, BusError, Link};

use crate::master::BusGuard;

/// Routes device driver traffic to one addressed device
pub struct DeviceLink<'g, 'a> {
    guard: &'g mut BusGuard<'a>,
    address: Address,
    branch: &'g [BranchHop],
}

impl<'g, 'a> DeviceLink<'g, 'a> {
    pub fn new(guard: &'g mut BusGuard<'a>, address: Address, branch: &'g [BranchHop]) -> Self {
        Self {
            guard,
            address,
            branch,
        }
    }
}

impl Link for DeviceLink<'_, '_> {
    fn address(&self) -> Address {
        self.address
    }

    fn select(&mut self) -> Result<(), BusError> {
        self.guard.select_branch(self.branch)?;
        self.guard.match_rom(&self.address)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), BusError> {
        self.guard.write(bytes)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<(), BusError> {
        self.guard.read(buf)
    }

    fn delay(&mut self, duration: Duration) {
        self.guard.delay(duration);
    }
}

#[cfg(test)]
mod tests {
    use owfs_core::devices::{Ds18b20, Ds2408, Ds2413, Ds2431};
    use owfs_core::{catalog, DeviceDriver, Extension, Value};

    use crate::master::BusMaster;
    use crate::sim::{Chip, SimDevice, SimulatedBus};

    use super::*;

    fn run<T>(
        sim: &SimulatedBus,
        address: Address,
        op: impl FnOnce(&mut dyn Link) -> Result<T, BusError>,
    ) -> Result<T, BusError> {
        let master = BusMaster::new(0, "sim0", Box::new(sim.clone()));
        let mut guard = master.lock();
        let mut link = guard.link(address, &[]);
        op(&mut link)
    }

    fn property(family: u8, name: &str) -> owfs_core::Property {
        let registry = catalog::registry();
        let device = registry.find_family(family);
        let index = device.find_property(name).unwrap();
        device.property_at(index).unwrap().clone()
    }

    #[test]
    fn test_thermometer_reads_temperature() {
        let address = Address::from_parts(0x28, [1, 2, 3, 4, 5, 6]);
        let sim = SimulatedBus::with_devices([SimDevice::new(address, Chip::thermometer(23.5))]);
        let temperature = property(0x28, "temperature");
        let value = run(&sim, address, |link| {
            Ds18b20.read(link, &temperature, &Extension::Index(0))
        })
        .unwrap();
        assert_eq!(value, Value::Float(23.5));
        assert!(sim.delayed() >= Duration::from_millis(750));
    }

    #[test]
    fn test_thermometer_alarm_limits_roundtrip() {
        let address = Address::from_parts(0x28, [9, 2, 3, 4, 5, 6]);
        let sim = SimulatedBus::with_devices([SimDevice::new(address, Chip::thermometer(20.0))]);
        let high = property(0x28, "temphigh");
        run(&sim, address, |link| {
            Ds18b20.write(link, &high, &Extension::Index(0), &Value::Float(30.0))
        })
        .unwrap();
        let value = run(&sim, address, |link| Ds18b20.read(link, &high, &Extension::Index(0))).unwrap();
        assert_eq!(value, Value::Float(30.0));
    }

    #[test]
    fn test_switch8_pio_write_then_read() {
        let address = Address::from_parts(0x29, [1, 0, 0, 0, 0, 0]);
        let sim = SimulatedBus::with_devices([SimDevice::new(address, Chip::switch8())]);
        let pio = property(0x29, "PIO");
        run(&sim, address, |link| {
            Ds2408.write(link, &pio, &Extension::Byte, &Value::Unsigned(0x81))
        })
        .unwrap();
        let value = run(&sim, address, |link| Ds2408.read(link, &pio, &Extension::Byte)).unwrap();
        assert_eq!(value, Value::Unsigned(0x81));
        let bit = run(&sim, address, |link| Ds2408.read(link, &pio, &Extension::Index(7))).unwrap();
        assert_eq!(bit, Value::Boolean(true));
    }

    #[test]
    fn test_switch8_por_clears() {
        let address = Address::from_parts(0x29, [2, 0, 0, 0, 0, 0]);
        let sim = SimulatedBus::with_devices([SimDevice::new(address, Chip::switch8())]);
        let por = property(0x29, "por");
        let before = run(&sim, address, |link| Ds2408.read(link, &por, &Extension::Index(0))).unwrap();
        assert_eq!(before, Value::Boolean(true));
        run(&sim, address, |link| {
            Ds2408.write(link, &por, &Extension::Index(0), &Value::Boolean(false))
        })
        .unwrap();
        let after = run(&sim, address, |link| Ds2408.read(link, &por, &Extension::Index(0))).unwrap();
        assert_eq!(after, Value::Boolean(false));
    }

    #[test]
    fn test_switch2_pio() {
        let address = Address::from_parts(0x3A, [1, 0, 0, 0, 0, 0]);
        let sim = SimulatedBus::with_devices([SimDevice::new(address, Chip::switch2())]);
        let pio = property(0x3A, "PIO");
        run(&sim, address, |link| {
            Ds2413.write(link, &pio, &Extension::All, &Value::Unsigned(0x02))
        })
        .unwrap();
        let value = run(&sim, address, |link| Ds2413.read(link, &pio, &Extension::All)).unwrap();
        assert_eq!(value, Value::Unsigned(0x02));
    }

    #[test]
    fn test_eeprom_page_write_then_read() {
        let address = Address::from_parts(0x2D, [1, 0, 0, 0, 0, 0]);
        let sim = SimulatedBus::with_devices([SimDevice::new(address, Chip::eeprom())]);
        let page = property(0x2D, "pages/page");
        let data: Vec<u8> = (0u8..32).collect();
        run(&sim, address, |link| {
            Ds2431.write(link, &page, &Extension::Index(1), &Value::Bytes(data.clone()))
        })
        .unwrap();
        let value = run(&sim, address, |link| Ds2431.read(link, &page, &Extension::Index(1))).unwrap();
        assert_eq!(value, Value::Bytes(data));

        let memory = property(0x2D, "memory");
        let all = run(&sim, address, |link| Ds2431.read(link, &memory, &Extension::Index(0))).unwrap();
        match all {
            Value::Bytes(bytes) => {
                assert_eq!(bytes.len(), 128);
                assert_eq!(bytes[0], 0xFF);
                assert_eq!(bytes[33], 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing_device_fails_confirmation() {
        let address = Address::from_parts(0x29, [3, 0, 0, 0, 0, 0]);
        let other = Address::from_parts(0x29, [4, 0, 0, 0, 0, 0]);
        let sim = SimulatedBus::with_devices([SimDevice::new(other, Chip::switch8())]);
        let pio = property(0x29, "PIO");
        let result = run(&sim, address, |link| {
            Ds2408.write(link, &pio, &Extension::Byte, &Value::Unsigned(1))
        });
        assert!(matches!(result, Err(BusError::Protocol(_))));
    }
}
