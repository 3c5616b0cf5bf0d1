//! Chip drivers for the built-in device catalog

pub mod ds18b20;
pub mod ds2408;
pub mod ds2413;
pub mod ds2431;

pub use ds18b20::Ds18b20;
pub use ds2408::Ds2408;
pub use ds2413::Ds2413;
pub use ds2431::Ds2431;

use crate::crc::crc16_matches;
use crate::error::BusError;
use crate::link::Link;

/// Confirmation byte returned by most PIO and copy commands
pub const CONFIRM: u8 = 0xAA;

fn read_bytes<const N: usize>(link: &mut dyn Link) -> Result<[u8; N], BusError> {
    let mut buf = [0u8; N];
    link.read(&mut buf)?;
    Ok(buf)
}

fn expect_confirm(link: &mut dyn Link, what: &str) -> Result<(), BusError> {
    let [byte] = read_bytes::<1>(link)?;
    if byte == CONFIRM {
        Ok(())
    } else {
        Err(BusError::Protocol(format!(
            "{} not confirmed (got {:02X})",
            what, byte
        )))
    }
}

fn check_crc16(what: &str, data: &[u8], trailer: [u8; 2]) -> Result<(), BusError> {
    if crc16_matches(data, trailer) {
        Ok(())
    } else {
        Err(BusError::Checksum(what.to_string()))
    }
}
