//! Byte-level primitives every bus adapter provides

use std::fmt;
use std::thread;
use std::time::Duration;

use owfs_core::BusError;

/// Outcome of a bus reset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reset {
    /// At least one device answered with a presence pulse
    pub presence: bool,
    pub short: bool,
}

/// One search round: the bit, its complement and the direction taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Triplet {
    pub id_bit: bool,
    pub cmp_bit: bool,
    pub direction: bool,
}

/// A single 1-Wire channel
///
/// Implementations block for the duration of each primitive. Callers hold
/// the owning bus master's lock, so an adapter never sees interleaved use.
pub trait Adapter: Send + fmt::Debug {
    /// Adapter model, e.g. `DS2482-800`
    fn kind(&self) -> &str;

    /// Channel number within a shared chip
    fn channel(&self) -> usize {
        0
    }

    /// Channels on the chip this adapter belongs to
    fn channels(&self) -> usize {
        1
    }

    fn reset(&mut self) -> Result<Reset, BusError>;

    fn write_byte(&mut self, byte: u8) -> Result<(), BusError>;

    fn read_byte(&mut self) -> Result<u8, BusError>;

    /// Read two bits and write the chosen direction in one step
    fn triplet(&mut self, direction: bool) -> Result<Triplet, BusError>;

    /// Reopen and reinitialize after a connection error
    fn reconnect(&mut self) -> Result<(), BusError>;

    fn delay(&mut self, duration: Duration) {
        thread::sleep(duration);
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), BusError> {
        for byte in bytes {
            self.write_byte(*byte)?;
        }
        Ok(())
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<(), BusError> {
        for slot in buf.iter_mut() {
            *slot = self.read_byte()?;
        }
        Ok(())
    }
}
