//! DS2482-100 / DS2482-800 i2c to 1-Wire bridge
//!
//! One chip serves one (-100) or eight (-800) channels. The chip is shared
//! behind a mutex and every channel is its own [`Adapter`], so each channel
//! can be a separate bus master while the channel-select register is kept
//! consistent.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use owfs_core::BusError;
use tracing::{debug, trace, warn};

use crate::adapter::{Adapter, Reset, Triplet};
use crate::i2c::I2cBus;

const CMD_DEVICE_RESET: u8 = 0xF0;
const CMD_SET_READ_PTR: u8 = 0xE1;
const CMD_CHANNEL_SELECT: u8 = 0xC3;
const CMD_WRITE_CONFIG: u8 = 0xD2;
const CMD_1WIRE_RESET: u8 = 0xB4;
const CMD_1WIRE_WRITE_BYTE: u8 = 0xA5;
const CMD_1WIRE_READ_BYTE: u8 = 0x96;
const CMD_1WIRE_TRIPLET: u8 = 0x78;

const PTR_DATA: u8 = 0xE1;

const STATUS_1WB: u8 = 0x01;
const STATUS_PPD: u8 = 0x02;
const STATUS_SD: u8 = 0x04;
const STATUS_RST: u8 = 0x10;
const STATUS_SBR: u8 = 0x20;
const STATUS_TSB: u8 = 0x40;
const STATUS_DIR: u8 = 0x80;

/// Active pull-up; the upper nibble carries the complement when written
const CONFIG_APU: u8 = 0x01;

/// Channel-select codes and their read-back values
const CHANNEL_WRITE: [u8; 8] = [0xF0, 0xE1, 0xD2, 0xC3, 0xB4, 0xA5, 0x96, 0x87];
const CHANNEL_READ: [u8; 8] = [0xB8, 0xB1, 0xAA, 0xA3, 0x9C, 0x95, 0x8E, 0x87];

/// Busy-wait window for one 1-Wire operation, in microseconds
#[derive(Debug, Clone, Copy)]
struct Window {
    min_us: u64,
    max_us: u64,
}

const CHIP_RESET: Window = Window { min_us: 1, max_us: 2 };
const WIRE_RESET: Window = Window { min_us: 1125, max_us: 1250 };
const WIRE_WRITE: Window = Window { min_us: 530, max_us: 585 };
const WIRE_TRIPLET: Window = Window { min_us: 198, max_us: 219 };

/// Extra status polls after the minimum wait
const STATUS_POLLS: usize = 3;

fn encode_config(config: u8) -> u8 {
    (config & 0x0F) | ((!config & 0x0F) << 4)
}

fn io_error(err: std::io::Error) -> BusError {
    BusError::Io(err.to_string())
}

/// Decode the status register after a triplet
pub fn decode_triplet(status: u8) -> Triplet {
    Triplet {
        id_bit: status & STATUS_SBR != 0,
        cmp_bit: status & STATUS_TSB != 0,
        direction: status & STATUS_DIR != 0,
    }
}

/// Decode the status register after a 1-Wire reset
pub fn decode_reset(status: u8) -> Reset {
    Reset {
        presence: status & STATUS_PPD != 0,
        short: status & STATUS_SD != 0,
    }
}

/// The shared chip state
#[derive(Debug)]
pub struct Ds2482 {
    bus: Box<dyn I2cBus>,
    channels: usize,
    selected: Option<usize>,
}

impl Ds2482 {
    /// Reset the chip, configure it and detect the -800 variant
    pub fn detect(bus: Box<dyn I2cBus>) -> Result<Self, BusError> {
        let mut chip = Self {
            bus,
            channels: 1,
            selected: None,
        };
        chip.initialize()?;
        Ok(chip)
    }

    fn initialize(&mut self) -> Result<(), BusError> {
        self.bus.write(&[CMD_DEVICE_RESET]).map_err(io_error)?;
        let status = self.wait_idle(CHIP_RESET)?;
        if status & STATUS_RST == 0 {
            return Err(BusError::Protocol(format!(
                "DS2482 did not report reset (status {:02X})",
                status
            )));
        }

        self.bus
            .write(&[CMD_WRITE_CONFIG, encode_config(CONFIG_APU)])
            .map_err(io_error)?;
        let config = self.bus.read_byte().map_err(io_error)?;
        if config != CONFIG_APU {
            return Err(BusError::Protocol(format!(
                "DS2482 configuration read back {:02X}",
                config
            )));
        }

        self.selected = None;
        self.channels = if self.select_channel(1).is_ok() { 8 } else { 1 };
        if self.channels > 1 {
            self.select_channel(0)?;
        }
        debug!(channels = self.channels, "DS2482 detected");
        Ok(())
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn kind(&self) -> &'static str {
        if self.channels > 1 {
            "DS2482-800"
        } else {
            "DS2482-100"
        }
    }

    fn select_channel(&mut self, channel: usize) -> Result<(), BusError> {
        if self.selected == Some(channel) {
            return Ok(());
        }
        let (write, read) = match (CHANNEL_WRITE.get(channel), CHANNEL_READ.get(channel)) {
            (Some(w), Some(r)) => (*w, *r),
            _ => return Err(BusError::Protocol(format!("no DS2482 channel {}", channel))),
        };
        self.bus.write(&[CMD_CHANNEL_SELECT, write]).map_err(io_error)?;
        let readback = self.bus.read_byte().map_err(io_error)?;
        if readback != read {
            self.selected = None;
            return Err(BusError::Protocol(format!(
                "channel {} read back {:02X}",
                channel, readback
            )));
        }
        self.selected = Some(channel);
        Ok(())
    }

    /// Sleep the minimum time, then poll the status register until the
    /// 1-Wire busy bit clears
    fn wait_idle(&mut self, window: Window) -> Result<u8, BusError> {
        let step = Duration::from_micros((window.max_us - window.min_us + 1) / 2);
        thread::sleep(Duration::from_micros(window.min_us));
        for poll in 0..=STATUS_POLLS {
            let status = self.bus.read_byte().map_err(io_error)?;
            if status & STATUS_1WB == 0 {
                return Ok(status);
            }
            if poll < STATUS_POLLS {
                thread::sleep(step);
            }
        }
        trace!(min = window.min_us, max = window.max_us, "DS2482 still busy");
        Err(BusError::Timeout)
    }

    fn wire_reset(&mut self) -> Result<Reset, BusError> {
        self.bus.write(&[CMD_1WIRE_RESET]).map_err(io_error)?;
        Ok(decode_reset(self.wait_idle(WIRE_RESET)?))
    }

    fn wire_write(&mut self, byte: u8) -> Result<(), BusError> {
        self.bus.write(&[CMD_1WIRE_WRITE_BYTE, byte]).map_err(io_error)?;
        self.wait_idle(WIRE_WRITE)?;
        Ok(())
    }

    fn wire_read(&mut self) -> Result<u8, BusError> {
        self.bus.write(&[CMD_1WIRE_READ_BYTE]).map_err(io_error)?;
        self.wait_idle(WIRE_WRITE)?;
        self.bus.write(&[CMD_SET_READ_PTR, PTR_DATA]).map_err(io_error)?;
        self.bus.read_byte().map_err(io_error)
    }

    fn wire_triplet(&mut self, direction: bool) -> Result<Triplet, BusError> {
        let dir = if direction { 0xFF } else { 0x00 };
        self.bus.write(&[CMD_1WIRE_TRIPLET, dir]).map_err(io_error)?;
        let triplet = decode_triplet(self.wait_idle(WIRE_TRIPLET)?);
        trace!(direction, ?triplet, "DS2482 triplet");
        Ok(triplet)
    }

    fn reopen(&mut self) -> Result<(), BusError> {
        self.bus.reopen().map_err(|err| BusError::Disconnected(err.to_string()))?;
        self.initialize()
    }
}

/// One channel of a shared DS2482
pub struct Ds2482Channel {
    chip: Arc<Mutex<Ds2482>>,
    channel: usize,
    kind: String,
    channels: usize,
}

impl fmt::Debug for Ds2482Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ds2482Channel")
            .field("kind", &self.kind)
            .field("channel", &self.channel)
            .finish()
    }
}

impl Ds2482Channel {
    /// Split a detected chip into one adapter per channel
    pub fn split(chip: Ds2482) -> Vec<Ds2482Channel> {
        let channels = chip.channels();
        let kind = chip.kind().to_string();
        let chip = Arc::new(Mutex::new(chip));
        (0..channels)
            .map(|channel| Ds2482Channel {
                chip: chip.clone(),
                channel,
                kind: kind.clone(),
                channels,
            })
            .collect()
    }

    fn with_chip<T>(&self, op: impl FnOnce(&mut Ds2482) -> Result<T, BusError>) -> Result<T, BusError> {
        let mut chip = self.chip.lock();
        if chip.channels() > 1 {
            chip.select_channel(self.channel)?;
        }
        op(&mut chip)
    }
}

impl Adapter for Ds2482Channel {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn channel(&self) -> usize {
        self.channel
    }

    fn channels(&self) -> usize {
        self.channels
    }

    fn reset(&mut self) -> Result<Reset, BusError> {
        self.with_chip(|chip| chip.wire_reset())
    }

    fn write_byte(&mut self, byte: u8) -> Result<(), BusError> {
        self.with_chip(|chip| chip.wire_write(byte))
    }

    fn read_byte(&mut self) -> Result<u8, BusError> {
        self.with_chip(|chip| chip.wire_read())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), BusError> {
        self.with_chip(|chip| bytes.iter().try_for_each(|b| chip.wire_write(*b)))
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<(), BusError> {
        self.with_chip(|chip| {
            for slot in buf.iter_mut() {
                *slot = chip.wire_read()?;
            }
            Ok(())
        })
    }

    fn triplet(&mut self, direction: bool) -> Result<Triplet, BusError> {
        self.with_chip(|chip| chip.wire_triplet(direction))
    }

    fn reconnect(&mut self) -> Result<(), BusError> {
        let mut chip = self.chip.lock();
        chip.reopen().map_err(|err| {
            warn!(channel = self.channel, error = %err, "DS2482 reconnect failed");
            err
        })
    }
}
