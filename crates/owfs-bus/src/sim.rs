//! An in-memory 1-Wire bus
//!
//! `SimulatedBus` answers the same byte-level primitives as a real adapter:
//! ROM search with wired-AND triplets, match/skip ROM, DS2409 branch
//! switching and the function commands of the built-in chip drivers. Its
//! state is shared, so a test can keep a handle and rearrange devices while
//! a bus master owns another clone.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use owfs_core::crc::{crc16, crc8};
use owfs_core::{Address, Branch, BranchHop, BusError};
use tracing::trace;

use crate::adapter::{Adapter, Reset, Triplet};

const SEARCH_ROM: u8 = 0xF0;
const CONDITIONAL_SEARCH: u8 = 0xEC;
const MATCH_ROM: u8 = 0x55;
const SKIP_ROM: u8 = 0xCC;
const READ_ROM: u8 = 0x33;

const CONFIRM: u8 = 0xAA;

/// Inverted little-endian CRC16 trailer as chips send it
fn trailer(data: &[u8]) -> [u8; 2] {
    (!crc16(data)).to_le_bytes()
}

/// Function-level behavior of a simulated chip
#[derive(Debug, Clone, PartialEq)]
pub enum Chip {
    /// Answers ROM commands only
    Plain,
    /// DS2409 hub
    Hub,
    /// DS18B20 thermometer
    Thermometer {
        celsius: f64,
        high: i8,
        low: i8,
        config: u8,
        converted: i16,
    },
    /// DS2408 8-channel switch
    Switch8 {
        /// Output latch, 0 = transistor on
        latch: u8,
        activity: u8,
        control: u8,
        /// External drive on the pins, 1 = released
        external: u8,
    },
    /// DS2413 2-channel switch
    Switch2 { latch: u8, external: u8 },
    /// DS2431 EEPROM
    Eeprom {
        memory: Vec<u8>,
        scratch: Vec<u8>,
        target: u16,
    },
}

impl Chip {
    pub fn thermometer(celsius: f64) -> Self {
        Chip::Thermometer {
            celsius,
            high: 75,
            low: 70,
            config: 0x7F,
            converted: 0x0550,
        }
    }

    pub fn switch8() -> Self {
        Chip::Switch8 {
            latch: 0xFF,
            activity: 0,
            control: 0x08,
            external: 0xFF,
        }
    }

    pub fn switch2() -> Self {
        Chip::Switch2 {
            latch: 0x03,
            external: 0x03,
        }
    }

    pub fn eeprom() -> Self {
        Chip::Eeprom {
            memory: vec![0xFF; 128],
            scratch: Vec::new(),
            target: 0,
        }
    }

    /// Default model for a family code; unknown families answer ROM commands only
    pub fn for_family(family: u8) -> Self {
        match family {
            0x1F => Chip::Hub,
            0x28 => Chip::thermometer(20.0),
            0x29 => Chip::switch8(),
            0x2D => Chip::eeprom(),
            0x3A => Chip::switch2(),
            _ => Chip::Plain,
        }
    }

    /// Handle the function bytes received since selection
    ///
    /// Returns `None` while the frame is incomplete.
    fn receive(&mut self, frame: &[u8], out: &mut VecDeque<u8>) -> Option<Effect> {
        match self {
            Chip::Plain => Some(Effect::None),
            Chip::Hub => match frame {
                [0x66] => {
                    out.push_back(0x66);
                    Some(Effect::AllLinesOff)
                }
                [0xCC] | [0x33] => None,
                [cmd @ (0xCC | 0x33), 0xFF] => {
                    let branch = if *cmd == 0xCC { Branch::Main } else { Branch::Aux };
                    out.push_back(0x00);
                    out.push_back(*cmd);
                    Some(Effect::SmartOn(branch))
                }
                _ => Some(Effect::None),
            },
            Chip::Thermometer {
                celsius,
                high,
                low,
                config,
                converted,
            } => match frame {
                [0x44] => {
                    *converted = (*celsius * 16.0).round() as i16;
                    Some(Effect::None)
                }
                [0xBE] => {
                    let [t0, t1] = converted.to_le_bytes();
                    let mut pad = vec![t0, t1, *high as u8, *low as u8, *config, 0xFF, 0x0C, 0x10];
                    pad.push(crc8(&pad));
                    out.extend(pad);
                    Some(Effect::None)
                }
                [0x4E] | [0x4E, _] | [0x4E, _, _] => None,
                [0x4E, th, tl, cfg] => {
                    *high = *th as i8;
                    *low = *tl as i8;
                    *config = *cfg;
                    Some(Effect::None)
                }
                [0xB4] => {
                    out.push_back(0xFF);
                    Some(Effect::None)
                }
                _ => Some(Effect::None),
            },
            Chip::Switch8 {
                latch,
                activity,
                control,
                external,
            } => match frame {
                [0xF0] | [0xF0, _] => None,
                [0xF0, lo, hi] => {
                    let logic = *latch & *external;
                    let registers = [logic, *latch, *activity, 0x00, 0x00, *control, 0xFF, 0xFF];
                    let start = u16::from_le_bytes([*lo, *hi]).saturating_sub(0x88) as usize;
                    let mut crc_input = frame.to_vec();
                    let data = &registers[start.min(8)..];
                    crc_input.extend_from_slice(data);
                    out.extend(data.iter().copied());
                    out.extend(trailer(&crc_input));
                    Some(Effect::None)
                }
                [0x5A] | [0x5A, _] => None,
                [0x5A, data, inverse] => {
                    if *data == !*inverse {
                        *activity |= *latch ^ *data;
                        *latch = *data;
                        out.push_back(CONFIRM);
                        out.push_back(*latch & *external);
                    }
                    Some(Effect::None)
                }
                [0xC3] => {
                    *activity = 0;
                    out.push_back(CONFIRM);
                    Some(Effect::None)
                }
                [0xCC] | [0xCC, _] | [0xCC, _, _] => None,
                [0xCC, 0x8D, 0x00, value] => {
                    // the power-on reset flag can only be cleared
                    *control = (*value & 0x07) | (*control & *value & 0x08) | (*control & 0x80);
                    Some(Effect::None)
                }
                _ => Some(Effect::None),
            },
            Chip::Switch2 { latch, external } => match frame {
                [0xF5] => {
                    out.push_back(switch2_status(*latch, *external));
                    Some(Effect::None)
                }
                [0x5A] | [0x5A, _] => None,
                [0x5A, data, inverse] => {
                    if *data == !*inverse {
                        *latch = *data & 0x03;
                        out.push_back(CONFIRM);
                        out.push_back(switch2_status(*latch, *external));
                    }
                    Some(Effect::None)
                }
                _ => Some(Effect::None),
            },
            Chip::Eeprom {
                memory,
                scratch,
                target,
            } => match frame {
                [0xF0] | [0xF0, _] => None,
                [0xF0, lo, hi] => {
                    let start = (u16::from_le_bytes([*lo, *hi]) as usize).min(memory.len());
                    out.extend(memory[start..].iter().copied());
                    Some(Effect::None)
                }
                [0x0F, rest @ ..] if rest.len() < 10 => None,
                [0x0F, lo, hi, data @ ..] => {
                    *target = u16::from_le_bytes([*lo, *hi]);
                    *scratch = data.to_vec();
                    out.extend(trailer(frame));
                    Some(Effect::None)
                }
                [0xAA] => {
                    let [lo, hi] = target.to_le_bytes();
                    let mut echo = vec![0xAA, lo, hi, 0x07];
                    echo.extend_from_slice(scratch);
                    let crc = trailer(&echo);
                    out.extend(echo[1..].iter().copied());
                    out.extend(crc);
                    Some(Effect::None)
                }
                [0x55] | [0x55, _] | [0x55, _, _] => None,
                [0x55, lo, hi, 0x07] if u16::from_le_bytes([*lo, *hi]) == *target => {
                    let start = *target as usize;
                    if start + scratch.len() <= memory.len() {
                        memory[start..start + scratch.len()].copy_from_slice(scratch);
                        out.push_back(CONFIRM);
                    }
                    Some(Effect::None)
                }
                _ => Some(Effect::None),
            },
        }
    }
}

fn switch2_status(latch: u8, external: u8) -> u8 {
    let pins = latch & external;
    let low = (pins & 0x01) | ((latch & 0x01) << 1) | ((pins & 0x02) << 1) | ((latch & 0x02) << 2);
    low | ((!low & 0x0F) << 4)
}

/// Bus-level consequence of a completed function frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Effect {
    None,
    SmartOn(Branch),
    AllLinesOff,
}

/// A device attached to the simulated bus
#[derive(Debug, Clone)]
pub struct SimDevice {
    pub address: Address,
    pub chip: Chip,
    /// Answers the conditional search
    pub alarm: bool,
    /// Hub branch the device hangs off, if any
    pub parent: Option<BranchHop>,
    /// Corrupts the last address byte during searches
    pub garbled: bool,
}

impl SimDevice {
    pub fn new(address: Address, chip: Chip) -> Self {
        Self {
            address,
            chip,
            alarm: false,
            parent: None,
            garbled: false,
        }
    }

    pub fn alarmed(mut self) -> Self {
        self.alarm = true;
        self
    }

    pub fn on_branch(mut self, hub: Address, branch: Branch) -> Self {
        self.parent = Some(BranchHop { hub, branch });
        self
    }

    fn search_bit(&self, bit: usize) -> bool {
        if self.garbled && bit >= 56 {
            !self.address.bit(bit)
        } else {
            self.address.bit(bit)
        }
    }
}

#[derive(Debug, Clone)]
enum Phase {
    /// Nothing selected; bytes are ignored
    Idle,
    /// After reset, waiting for a ROM command
    Rom,
    Search { bit: usize, participants: Vec<usize> },
    Match { collected: Vec<u8> },
    /// Function commands go to these devices
    Selected { devices: Vec<usize>, frame: Vec<u8> },
}

#[derive(Debug)]
struct SimState {
    devices: Vec<SimDevice>,
    open: Vec<BranchHop>,
    phase: Phase,
    out: Vec<VecDeque<u8>>,
    rom_out: VecDeque<u8>,
    disconnected: bool,
    reconnectable: bool,
    failing_resets: usize,
    shorted: bool,
    selections: Vec<(Address, usize)>,
    delayed: Duration,
}

impl SimState {
    fn visible(&self, device: &SimDevice) -> bool {
        match &device.parent {
            None => true,
            Some(hop) => self.open.contains(hop),
        }
    }

    fn visible_indices(&self) -> Vec<usize> {
        (0..self.devices.len())
            .filter(|i| self.visible(&self.devices[*i]))
            .collect()
    }

    fn apply(&mut self, hub: Address, effect: Effect) {
        match effect {
            Effect::None => {}
            Effect::SmartOn(branch) => {
                self.open.retain(|hop| hop.hub != hub);
                self.open.push(BranchHop { hub, branch });
            }
            Effect::AllLinesOff => {
                // switching off a hub also cuts everything hanging below it
                let mut closed = vec![hub];
                while let Some(h) = closed.pop() {
                    let below: Vec<Address> = self
                        .devices
                        .iter()
                        .filter(|d| d.parent.map(|p| p.hub) == Some(h))
                        .map(|d| d.address)
                        .collect();
                    self.open.retain(|hop| hop.hub != h);
                    closed.extend(below.into_iter().filter(|a| self.open.iter().any(|hop| hop.hub == *a)));
                }
            }
        }
    }

    fn count_selection(&mut self, address: Address) {
        match self.selections.iter_mut().find(|(a, _)| *a == address) {
            Some((_, count)) => *count += 1,
            None => self.selections.push((address, 1)),
        }
    }

    fn check_connected(&self) -> Result<(), BusError> {
        if self.disconnected {
            Err(BusError::Disconnected("simulated adapter unplugged".to_string()))
        } else {
            Ok(())
        }
    }
}

/// A simulated single-channel adapter
#[derive(Debug, Clone)]
pub struct SimulatedBus {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                devices: Vec::new(),
                open: Vec::new(),
                phase: Phase::Idle,
                out: Vec::new(),
                rom_out: VecDeque::new(),
                disconnected: false,
                reconnectable: true,
                failing_resets: 0,
                shorted: false,
                selections: Vec::new(),
                delayed: Duration::ZERO,
            })),
        }
    }

    pub fn with_devices(devices: impl IntoIterator<Item = SimDevice>) -> Self {
        let bus = Self::new();
        for device in devices {
            bus.attach(device);
        }
        bus
    }

    pub fn attach(&self, device: SimDevice) {
        let mut state = self.state.lock();
        state.devices.retain(|d| d.address != device.address);
        state.devices.push(device);
        state.phase = Phase::Idle;
    }

    pub fn detach(&self, address: &Address) -> Option<SimDevice> {
        let mut state = self.state.lock();
        let index = state.devices.iter().position(|d| d.address == *address)?;
        state.phase = Phase::Idle;
        Some(state.devices.remove(index))
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.state.lock().devices.iter().map(|d| d.address).collect()
    }

    /// Inspect or modify a device in place
    pub fn with_device<T>(&self, address: &Address, f: impl FnOnce(&mut SimDevice) -> T) -> Option<T> {
        let mut state = self.state.lock();
        state.devices.iter_mut().find(|d| d.address == *address).map(f)
    }

    pub fn set_alarm(&self, address: &Address, alarm: bool) {
        self.with_device(address, |d| d.alarm = alarm);
    }

    pub fn set_garbled(&self, address: &Address, garbled: bool) {
        self.with_device(address, |d| d.garbled = garbled);
    }

    /// Unplug the adapter; every primitive fails until reconnected
    pub fn disconnect(&self, reconnectable: bool) {
        let mut state = self.state.lock();
        state.disconnected = true;
        state.reconnectable = reconnectable;
    }

    /// Fail the next `count` resets with an i/o error
    pub fn fail_resets(&self, count: usize) {
        self.state.lock().failing_resets = count;
    }

    pub fn set_short(&self, shorted: bool) {
        self.state.lock().shorted = shorted;
    }

    /// How many times `address` was selected by match ROM
    pub fn selections(&self, address: &Address) -> usize {
        self.state
            .lock()
            .selections
            .iter()
            .find(|(a, _)| a == address)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }

    pub fn open_branches(&self) -> Vec<BranchHop> {
        self.state.lock().open.clone()
    }

    /// Total time the bus was asked to wait
    pub fn delayed(&self) -> Duration {
        self.state.lock().delayed
    }
}

impl Adapter for SimulatedBus {
    fn kind(&self) -> &str {
        "simulated"
    }

    fn reset(&mut self) -> Result<Reset, BusError> {
        let mut state = self.state.lock();
        state.check_connected()?;
        if state.failing_resets > 0 {
            state.failing_resets -= 1;
            state.phase = Phase::Idle;
            return Err(BusError::Io("simulated reset failure".to_string()));
        }
        state.out.clear();
        state.rom_out.clear();
        if state.shorted {
            state.phase = Phase::Idle;
            return Ok(Reset {
                presence: false,
                short: true,
            });
        }
        state.phase = Phase::Rom;
        let presence = !state.visible_indices().is_empty();
        Ok(Reset {
            presence,
            short: false,
        })
    }

    fn write_byte(&mut self, byte: u8) -> Result<(), BusError> {
        let mut state = self.state.lock();
        state.check_connected()?;
        let phase = std::mem::replace(&mut state.phase, Phase::Idle);
        state.phase = match phase {
            Phase::Idle | Phase::Search { .. } => Phase::Idle,
            Phase::Rom => match byte {
                SEARCH_ROM | CONDITIONAL_SEARCH => {
                    let participants = state
                        .visible_indices()
                        .into_iter()
                        .filter(|i| byte == SEARCH_ROM || state.devices[*i].alarm)
                        .collect();
                    Phase::Search { bit: 0, participants }
                }
                MATCH_ROM => Phase::Match { collected: Vec::new() },
                SKIP_ROM => {
                    let devices = state.visible_indices();
                    state.out = vec![VecDeque::new(); devices.len()];
                    Phase::Selected {
                        devices,
                        frame: Vec::new(),
                    }
                }
                READ_ROM => {
                    let mut rom = [0xFFu8; 8];
                    for i in state.visible_indices() {
                        for (slot, byte) in rom.iter_mut().zip(state.devices[i].address.bytes()) {
                            *slot &= byte;
                        }
                    }
                    state.rom_out = rom.into_iter().collect();
                    Phase::Idle
                }
                _ => Phase::Idle,
            },
            Phase::Match { mut collected } => {
                collected.push(byte);
                if collected.len() < 8 {
                    Phase::Match { collected }
                } else {
                    let mut rom = [0u8; 8];
                    rom.copy_from_slice(&collected);
                    let wanted = Address::from_bytes(rom);
                    let devices: Vec<usize> = state
                        .visible_indices()
                        .into_iter()
                        .filter(|i| state.devices[*i].address == wanted)
                        .collect();
                    state.count_selection(wanted);
                    trace!(address = %wanted, matched = !devices.is_empty(), "simulated match ROM");
                    state.out = vec![VecDeque::new(); devices.len()];
                    Phase::Selected {
                        devices,
                        frame: Vec::new(),
                    }
                }
            }
            Phase::Selected { devices, mut frame } => {
                frame.push(byte);
                let mut complete = true;
                let mut effects = Vec::new();
                for (slot, index) in devices.iter().enumerate() {
                    let hub = state.devices[*index].address;
                    let mut out = std::mem::take(&mut state.out[slot]);
                    match state.devices[*index].chip.receive(&frame, &mut out) {
                        Some(effect) => effects.push((hub, effect)),
                        None => complete = false,
                    }
                    state.out[slot] = out;
                }
                for (hub, effect) in effects {
                    state.apply(hub, effect);
                }
                if complete {
                    frame.clear();
                }
                Phase::Selected { devices, frame }
            }
        };
        Ok(())
    }

    fn read_byte(&mut self) -> Result<u8, BusError> {
        let mut state = self.state.lock();
        state.check_connected()?;
        if let Some(byte) = state.rom_out.pop_front() {
            return Ok(byte);
        }
        // wired-AND over every selected device, idle high
        Ok(state
            .out
            .iter_mut()
            .map(|queue| queue.pop_front().unwrap_or(0xFF))
            .fold(0xFF, |acc, byte| acc & byte))
    }

    fn triplet(&mut self, direction: bool) -> Result<Triplet, BusError> {
        let mut state = self.state.lock();
        state.check_connected()?;
        let (bit, participants) = match &state.phase {
            Phase::Search { bit, participants } if *bit < 64 => (*bit, participants.clone()),
            _ => {
                return Ok(Triplet {
                    id_bit: true,
                    cmp_bit: true,
                    direction: true,
                })
            }
        };

        let bits: Vec<bool> = participants
            .iter()
            .map(|i| state.devices[*i].search_bit(bit))
            .collect();
        // open-drain: the line reads 1 only if every participant leaves it high
        let id_bit = bits.iter().all(|b| *b);
        let cmp_bit = bits.iter().all(|b| !*b);
        let chosen = match (id_bit, cmp_bit) {
            (false, false) => direction,
            (true, false) => true,
            (false, true) => false,
            (true, true) => true,
        };
        let remaining = participants
            .into_iter()
            .zip(bits)
            .filter(|(_, b)| *b == chosen)
            .map(|(i, _)| i)
            .collect();
        state.phase = Phase::Search {
            bit: bit + 1,
            participants: remaining,
        };
        Ok(Triplet {
            id_bit,
            cmp_bit,
            direction: chosen,
        })
    }

    fn reconnect(&mut self) -> Result<(), BusError> {
        let mut state = self.state.lock();
        if state.disconnected && !state.reconnectable {
            return Err(BusError::Disconnected("simulated adapter gone".to_string()));
        }
        state.disconnected = false;
        state.phase = Phase::Idle;
        state.open.clear();
        Ok(())
    }

    fn delay(&mut self, duration: Duration) {
        self.state.lock().delayed += duration;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(family: u8, last: u8) -> Address {
        Address::from_parts(family, [last, 0, 0, 0, 0, 0x01])
    }

    #[test]
    fn test_reset_reports_presence() {
        let mut bus = SimulatedBus::new();
        assert!(!bus.reset().unwrap().presence);
        bus.attach(SimDevice::new(address(0x28, 1), Chip::thermometer(21.5)));
        assert!(bus.reset().unwrap().presence);
        bus.set_short(true);
        assert!(bus.reset().unwrap().short);
    }

    #[test]
    fn test_triplet_reports_discrepancy() {
        // family 0x28 and 0x29 differ in bit 0
        let mut bus = SimulatedBus::with_devices([
            SimDevice::new(address(0x28, 1), Chip::Plain),
            SimDevice::new(address(0x29, 1), Chip::Plain),
        ]);
        bus.reset().unwrap();
        bus.write_byte(SEARCH_ROM).unwrap();
        let first = bus.triplet(false).unwrap();
        assert!(!first.id_bit && !first.cmp_bit);
        assert!(!first.direction);
        // only the 0x28 device remains: bit 1 is 0 for it
        let second = bus.triplet(true).unwrap();
        assert!(!second.id_bit && second.cmp_bit);
        assert!(!second.direction);
    }

    #[test]
    fn test_match_rom_selects_one_chip() {
        let sensor = address(0x28, 7);
        let mut bus = SimulatedBus::with_devices([
            SimDevice::new(sensor, Chip::thermometer(25.0)),
            SimDevice::new(address(0x28, 8), Chip::thermometer(-10.0)),
        ]);
        bus.reset().unwrap();
        bus.write_byte(MATCH_ROM).unwrap();
        bus.write_bytes(sensor.bytes()).unwrap();
        bus.write_byte(0x44).unwrap();
        bus.reset().unwrap();
        bus.write_byte(MATCH_ROM).unwrap();
        bus.write_bytes(sensor.bytes()).unwrap();
        bus.write_byte(0xBE).unwrap();
        let mut pad = [0u8; 9];
        bus.read_bytes(&mut pad).unwrap();
        assert_eq!(crc8(&pad[..8]), pad[8]);
        assert_eq!(i16::from_le_bytes([pad[0], pad[1]]), 400);
        assert_eq!(bus.selections(&sensor), 2);
    }

    #[test]
    fn test_hub_branches_hide_devices() {
        let hub = address(0x1F, 1);
        let below = address(0x01, 2);
        let mut bus = SimulatedBus::with_devices([
            SimDevice::new(hub, Chip::Hub),
            SimDevice::new(below, Chip::Plain).on_branch(hub, Branch::Aux),
        ]);
        bus.reset().unwrap();
        bus.write_byte(MATCH_ROM).unwrap();
        bus.write_bytes(hub.bytes()).unwrap();
        bus.write_bytes(&[0x33, 0xFF]).unwrap();
        let mut reply = [0u8; 2];
        bus.read_bytes(&mut reply).unwrap();
        assert_eq!(reply[1], 0x33);
        assert_eq!(bus.open_branches(), vec![BranchHop { hub, branch: Branch::Aux }]);

        bus.reset().unwrap();
        bus.write_byte(SKIP_ROM).unwrap();
        bus.write_byte(0x66).unwrap();
        assert_eq!(bus.read_byte().unwrap(), 0x66);
        assert!(bus.open_branches().is_empty());
    }

    #[test]
    fn test_disconnect_and_reconnect() {
        let mut bus = SimulatedBus::new();
        bus.disconnect(true);
        assert!(bus.reset().unwrap_err().is_connection());
        bus.reconnect().unwrap();
        assert!(bus.reset().is_ok());

        bus.disconnect(false);
        assert!(bus.reconnect().is_err());
    }

    #[test]
    fn test_switch2_status_nibbles() {
        let status = switch2_status(0x03, 0x03);
        assert_eq!(status & 0x0F, 0x0F);
        assert_eq!(status >> 4, 0x00);
        // PIO A latch on pulls its pin low
        let status = switch2_status(0x02, 0x03);
        assert_eq!(status & 0x0F, 0x0C);
    }
}
