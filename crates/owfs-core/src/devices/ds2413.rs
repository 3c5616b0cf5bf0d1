//! DS2413 dual channel addressable switch (family 0x3A)

use super::{expect_confirm, read_bytes};
use crate::error::BusError;
use crate::link::{unsupported, DeviceDriver, Link};
use crate::query::Extension;
use crate::registry::Property;
use crate::value::Value;

pub const FAMILY: u8 = 0x3A;

const PIO_ACCESS_READ: u8 = 0xF5;
const PIO_ACCESS_WRITE: u8 = 0x5A;

#[derive(Debug, Default)]
pub struct Ds2413;

/// Pin state and output latch of both channels
struct Status {
    sensed: u8,
    latch: u8,
}

impl Ds2413 {
    fn status(link: &mut dyn Link) -> Result<Status, BusError> {
        link.command(&[PIO_ACCESS_READ])?;
        let [byte] = read_bytes::<1>(link)?;
        // upper nibble is the complement of the lower one
        if (byte >> 4) != (!byte & 0x0F) {
            return Err(BusError::Checksum("DS2413 PIO status".to_string()));
        }
        Ok(Status {
            sensed: (byte & 0x01) | ((byte >> 1) & 0x02),
            latch: ((byte >> 1) & 0x01) | ((byte >> 2) & 0x02),
        })
    }
}

impl DeviceDriver for Ds2413 {
    fn read(&self, link: &mut dyn Link, property: &Property, _extension: &Extension) -> Result<Value, BusError> {
        let status = Self::status(link)?;
        match property.name() {
            "PIO" => Ok(Value::Unsigned((!status.latch & 0x03) as u64)),
            "sensed" => Ok(Value::Unsigned(status.sensed as u64)),
            _ => Err(unsupported(property)),
        }
    }

    fn write(
        &self,
        link: &mut dyn Link,
        property: &Property,
        _extension: &Extension,
        value: &Value,
    ) -> Result<(), BusError> {
        match property.name() {
            "PIO" => {
                let pio = value
                    .as_u64()
                    .filter(|pio| *pio <= 0x03)
                    .ok_or_else(|| BusError::InvalidValue("PIO takes two bits".to_string()))?;
                let data = 0xFC | (!(pio as u8) & 0x03);
                link.command(&[PIO_ACCESS_WRITE, data, !data])?;
                expect_confirm(link, "PIO access write")?;
                read_bytes::<1>(link)?;
                Ok(())
            }
            _ => Err(unsupported(property)),
        }
    }
}
