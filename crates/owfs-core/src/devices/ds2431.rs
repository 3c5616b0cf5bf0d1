//! DS2431 1024-bit EEPROM (family 0x2D)
//!
//! Memory is written through the 8-byte scratchpad: write, read back and
//! verify, then copy with the authorization bytes echoed from the read.

use std::time::Duration;

use super::{check_crc16, expect_confirm, read_bytes};
use crate::error::BusError;
use crate::link::{unsupported, DeviceDriver, Link};
use crate::query::Extension;
use crate::registry::Property;
use crate::value::Value;

pub const FAMILY: u8 = 0x2D;
pub const MEMORY_SIZE: usize = 128;
pub const PAGE_SIZE: usize = 32;
pub const ROW_SIZE: usize = 8;

const READ_MEMORY: u8 = 0xF0;
const WRITE_SCRATCHPAD: u8 = 0x0F;
const READ_SCRATCHPAD: u8 = 0xAA;
const COPY_SCRATCHPAD: u8 = 0x55;

const PROGRAM_TIME: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
pub struct Ds2431;

impl Ds2431 {
    fn read_memory(link: &mut dyn Link, address: usize, length: usize) -> Result<Vec<u8>, BusError> {
        let [lo, hi] = (address as u16).to_le_bytes();
        link.command(&[READ_MEMORY, lo, hi])?;
        let mut data = vec![0u8; length];
        link.read(&mut data)?;
        Ok(data)
    }

    fn write_row(link: &mut dyn Link, address: usize, row: &[u8]) -> Result<(), BusError> {
        let [lo, hi] = (address as u16).to_le_bytes();

        let mut frame = vec![WRITE_SCRATCHPAD, lo, hi];
        frame.extend_from_slice(row);
        link.command(&frame)?;
        let trailer = read_bytes::<2>(link)?;
        check_crc16("DS2431 scratchpad write", &frame, trailer)?;

        link.command(&[READ_SCRATCHPAD])?;
        let echo = read_bytes::<{ 3 + ROW_SIZE + 2 }>(link)?;
        let mut checked = vec![READ_SCRATCHPAD];
        checked.extend_from_slice(&echo[..3 + ROW_SIZE]);
        check_crc16("DS2431 scratchpad read", &checked, [echo[11], echo[12]])?;
        if echo[0] != lo || echo[1] != hi || &echo[3..3 + ROW_SIZE] != row {
            return Err(BusError::Protocol("DS2431 scratchpad verify failed".to_string()));
        }

        link.command(&[COPY_SCRATCHPAD, echo[0], echo[1], echo[2]])?;
        link.delay(PROGRAM_TIME);
        expect_confirm(link, "DS2431 copy")
    }

    fn write_memory(link: &mut dyn Link, address: usize, data: &[u8]) -> Result<(), BusError> {
        if address % ROW_SIZE != 0 || data.len() % ROW_SIZE != 0 || address + data.len() > MEMORY_SIZE {
            return Err(BusError::InvalidValue(format!(
                "DS2431 writes must cover whole rows inside {} bytes",
                MEMORY_SIZE
            )));
        }
        for (i, row) in data.chunks(ROW_SIZE).enumerate() {
            Self::write_row(link, address + i * ROW_SIZE, row)?;
        }
        Ok(())
    }
}

fn page_index(extension: &Extension) -> Result<usize, BusError> {
    match extension {
        Extension::Index(i) if *i < MEMORY_SIZE / PAGE_SIZE => Ok(*i),
        other => Err(BusError::Protocol(format!("no page {}", other))),
    }
}

fn bytes(value: &Value, expected: usize) -> Result<&[u8], BusError> {
    match value {
        Value::Bytes(raw) if raw.len() == expected => Ok(raw),
        _ => Err(BusError::InvalidValue(format!("expected {} bytes", expected))),
    }
}

impl DeviceDriver for Ds2431 {
    fn read(&self, link: &mut dyn Link, property: &Property, extension: &Extension) -> Result<Value, BusError> {
        match property.name() {
            "memory" => Ok(Value::Bytes(Self::read_memory(link, 0, MEMORY_SIZE)?)),
            "pages/page" => {
                let page = page_index(extension)?;
                Ok(Value::Bytes(Self::read_memory(link, page * PAGE_SIZE, PAGE_SIZE)?))
            }
            _ => Err(unsupported(property)),
        }
    }

    fn write(
        &self,
        link: &mut dyn Link,
        property: &Property,
        extension: &Extension,
        value: &Value,
    ) -> Result<(), BusError> {
        match property.name() {
            "memory" => Self::write_memory(link, 0, bytes(value, MEMORY_SIZE)?),
            "pages/page" => {
                let page = page_index(extension)?;
                Self::write_memory(link, page * PAGE_SIZE, bytes(value, PAGE_SIZE)?)
            }
            _ => Err(unsupported(property)),
        }
    }
}
