//! DS18B20 programmable resolution thermometer (family 0x28)

use std::time::Duration;

use super::read_bytes;
use crate::crc::crc8;
use crate::error::BusError;
use crate::link::{unsupported, DeviceDriver, Link};
use crate::query::Extension;
use crate::registry::Property;
use crate::value::Value;

pub const FAMILY: u8 = 0x28;

const CONVERT_T: u8 = 0x44;
const READ_SCRATCHPAD: u8 = 0xBE;
const WRITE_SCRATCHPAD: u8 = 0x4E;
const COPY_SCRATCHPAD: u8 = 0x48;
const READ_POWER_SUPPLY: u8 = 0xB4;

const CONVERSION_TIME: Duration = Duration::from_millis(750);
const COPY_TIME: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
pub struct Ds18b20;

impl Ds18b20 {
    fn scratchpad(link: &mut dyn Link) -> Result<[u8; 9], BusError> {
        link.command(&[READ_SCRATCHPAD])?;
        let pad = read_bytes::<9>(link)?;
        if crc8(&pad[..8]) != pad[8] {
            return Err(BusError::Checksum("DS18B20 scratchpad".to_string()));
        }
        Ok(pad)
    }

    fn set_alarm_limit(link: &mut dyn Link, index: usize, value: &Value) -> Result<(), BusError> {
        let celsius = value
            .as_f64()
            .ok_or_else(|| BusError::InvalidValue("temperature limit must be numeric".to_string()))?;
        let limit = celsius.round().clamp(-55.0, 125.0) as i8;

        let mut pad = Self::scratchpad(link)?;
        pad[index] = limit as u8;
        link.command(&[WRITE_SCRATCHPAD, pad[2], pad[3], pad[4]])?;
        link.command(&[COPY_SCRATCHPAD])?;
        link.delay(COPY_TIME);
        Ok(())
    }
}

impl DeviceDriver for Ds18b20 {
    fn read(&self, link: &mut dyn Link, property: &Property, _extension: &Extension) -> Result<Value, BusError> {
        match property.name() {
            "temperature" => {
                link.command(&[CONVERT_T])?;
                link.delay(CONVERSION_TIME);
                let pad = Self::scratchpad(link)?;
                let raw = i16::from_le_bytes([pad[0], pad[1]]);
                Ok(Value::Float(raw as f64 / 16.0))
            }
            "temphigh" => Ok(Value::Float(Self::scratchpad(link)?[2] as i8 as f64)),
            "templow" => Ok(Value::Float(Self::scratchpad(link)?[3] as i8 as f64)),
            "power" => {
                link.command(&[READ_POWER_SUPPLY])?;
                let [supply] = read_bytes::<1>(link)?;
                Ok(Value::Boolean(supply != 0))
            }
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
            "temphigh" => Self::set_alarm_limit(link, 2, value),
            "templow" => Self::set_alarm_limit(link, 3, value),
            _ => Err(unsupported(property)),
        }
    }
}
