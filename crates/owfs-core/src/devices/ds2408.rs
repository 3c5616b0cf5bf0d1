//! DS2408 8-channel addressable switch (family 0x29)
//!
//! The eight PIO registers are read in one pass starting at 0x0088. PIO
//! values are reported inverted from the output latch, so `1` means the
//! transistor is conducting.

use super::{check_crc16, expect_confirm, read_bytes};
use crate::error::BusError;
use crate::link::{unsupported, DeviceDriver, Link};
use crate::query::Extension;
use crate::registry::Property;
use crate::value::Value;

pub const FAMILY: u8 = 0x29;

const READ_PIO_REGISTERS: u8 = 0xF0;
const CHANNEL_ACCESS_WRITE: u8 = 0x5A;
const RESET_ACTIVITY_LATCHES: u8 = 0xC3;
const WRITE_CONDITIONAL_SEARCH: u8 = 0xCC;

pub const REG_PIO_LOGIC: u16 = 0x0088;
const REG_CONTROL: u16 = 0x008D;

const IDX_LOGIC: usize = 0;
const IDX_OUTPUT_LATCH: usize = 1;
const IDX_ACTIVITY_LATCH: usize = 2;
const IDX_CONTROL: usize = 5;

const CONTROL_POR: u8 = 0x08;
const CONTROL_VCCP: u8 = 0x80;

#[derive(Debug, Default)]
pub struct Ds2408;

impl Ds2408 {
    /// Registers 0x88..=0x8F
    fn registers(link: &mut dyn Link) -> Result<[u8; 8], BusError> {
        let [lo, hi] = REG_PIO_LOGIC.to_le_bytes();
        let command = [READ_PIO_REGISTERS, lo, hi];
        link.command(&command)?;
        let data = read_bytes::<10>(link)?;

        let mut checked = command.to_vec();
        checked.extend_from_slice(&data[..8]);
        check_crc16("DS2408 registers", &checked, [data[8], data[9]])?;

        let mut registers = [0u8; 8];
        registers.copy_from_slice(&data[..8]);
        Ok(registers)
    }

    fn write_pio(link: &mut dyn Link, pio: u8) -> Result<(), BusError> {
        let data = !pio;
        link.command(&[CHANNEL_ACCESS_WRITE, data, !data])?;
        expect_confirm(link, "channel access write")?;
        // trailing PIO pin status byte
        read_bytes::<1>(link)?;
        Ok(())
    }

    fn write_control(link: &mut dyn Link, control: u8) -> Result<(), BusError> {
        let [lo, hi] = REG_CONTROL.to_le_bytes();
        link.command(&[WRITE_CONDITIONAL_SEARCH, lo, hi, control])
    }
}

fn bit(byte: u8, extension: &Extension) -> Result<Value, BusError> {
    match extension {
        Extension::Index(i) if *i < 8 => Ok(Value::Boolean((byte >> i) & 0x01 == 0x01)),
        Extension::Byte | Extension::All => Ok(Value::Unsigned(byte as u64)),
        other => Err(BusError::Protocol(format!("no element {}", other))),
    }
}

impl DeviceDriver for Ds2408 {
    fn read(&self, link: &mut dyn Link, property: &Property, extension: &Extension) -> Result<Value, BusError> {
        let registers = Self::registers(link)?;
        match property.name() {
            "PIO" => bit(!registers[IDX_OUTPUT_LATCH], extension),
            "sensed" => bit(registers[IDX_LOGIC], extension),
            "latch" => bit(registers[IDX_ACTIVITY_LATCH], extension),
            "por" => Ok(Value::Boolean(registers[IDX_CONTROL] & CONTROL_POR != 0)),
            "power" => Ok(Value::Boolean(registers[IDX_CONTROL] & CONTROL_VCCP != 0)),
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
                let packed = value
                    .as_u64()
                    .and_then(|packed| u8::try_from(packed).ok())
                    .ok_or_else(|| BusError::InvalidValue("PIO expects a packed byte".to_string()))?;
                Self::write_pio(link, packed)
            }
            "latch" => {
                // any write clears every activity latch
                link.command(&[RESET_ACTIVITY_LATCHES])?;
                expect_confirm(link, "latch reset")
            }
            "por" => {
                if value.as_bool() == Some(true) {
                    return Err(BusError::InvalidValue("power-on reset can only be cleared".to_string()));
                }
                let control = Self::registers(link)?[IDX_CONTROL];
                Self::write_control(link, control & !CONTROL_POR)
            }
            _ => Err(unsupported(property)),
        }
    }
}
