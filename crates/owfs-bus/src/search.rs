//! ROM search
//!
//! Binary discrepancy search using the adapter's triplet primitive. One
//! pass walks all 64 address bits; where devices disagree and the zero
//! branch was taken, the bit is remembered so the next pass can take the
//! one branch instead. The state only advances on a successful pass, so a
//! failed pass can be repeated as is.

use owfs_core::{Address, BusError, BusStat, BusStats};
use tracing::{debug, trace};

use crate::adapter::Adapter;

pub const SEARCH_ROM: u8 = 0xF0;
pub const CONDITIONAL_SEARCH: u8 = 0xEC;

/// Passes tried per `next` before giving up
const ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Found(Address),
    Done,
}

/// State carried between search passes
#[derive(Debug, Clone)]
pub struct Search {
    command: u8,
    address: Address,
    last_discrepancy: Option<usize>,
    last_device: bool,
}

impl Search {
    /// Start a search; `alarm` restricts it to devices in an alarm state
    pub fn first(alarm: bool) -> Self {
        Self {
            command: if alarm { CONDITIONAL_SEARCH } else { SEARCH_ROM },
            address: Address::ZERO,
            last_discrepancy: None,
            last_device: false,
        }
    }

    /// A single pass that replays every bit of `address`
    fn seeded(address: Address) -> Self {
        Self {
            command: SEARCH_ROM,
            address,
            last_discrepancy: Some(64),
            last_device: false,
        }
    }

    pub fn is_alarm(&self) -> bool {
        self.command == CONDITIONAL_SEARCH
    }

    pub fn is_done(&self) -> bool {
        self.last_device
    }

    /// Find the next device, retrying failed passes
    pub fn next(&mut self, adapter: &mut dyn Adapter, stats: &BusStats) -> Result<Step, BusError> {
        let mut failure = BusError::Timeout;
        for attempt in 0..ATTEMPTS {
            match self.pass(adapter) {
                Ok(step) => return Ok(step),
                Err(err) => {
                    stats.incr(BusStat::search_attempt(attempt));
                    debug!(attempt, error = %err, "search pass failed");
                    failure = err;
                }
            }
        }
        Err(failure)
    }

    fn pass(&mut self, adapter: &mut dyn Adapter) -> Result<Step, BusError> {
        if self.last_device {
            return Ok(Step::Done);
        }

        let reset = adapter.reset()?;
        if reset.short {
            return Err(BusError::Short);
        }
        if !reset.presence {
            self.last_device = true;
            return Ok(Step::Done);
        }
        adapter.write_byte(self.command)?;

        let mut address = self.address;
        let mut last_zero = None;
        for bit in 0..64 {
            let direction = match self.last_discrepancy {
                Some(d) if bit < d => address.bit(bit),
                Some(d) => bit == d,
                None => false,
            };
            let triplet = adapter.triplet(direction)?;
            if triplet.id_bit && triplet.cmp_bit {
                // nobody answered on this branch
                self.last_device = true;
                return Ok(Step::Done);
            }
            if !triplet.id_bit && !triplet.cmp_bit && !triplet.direction {
                last_zero = Some(bit);
            }
            address.set_bit(bit, triplet.direction);
        }

        if !address.is_valid() {
            return Err(BusError::Checksum(format!("search result {}", address.to_hex())));
        }

        self.address = address;
        self.last_discrepancy = last_zero;
        self.last_device = last_zero.is_none();
        trace!(%address, last_discrepancy = ?last_zero, "search pass found device");
        Ok(Step::Found(address))
    }

    /// Walk the whole bus, returning every address found
    pub fn all(adapter: &mut dyn Adapter, alarm: bool, stats: &BusStats) -> Result<Vec<Address>, BusError> {
        let mut search = Search::first(alarm);
        let mut found = Vec::new();
        while let Step::Found(address) = search.next(adapter, stats)? {
            found.push(address);
        }
        Ok(found)
    }
}

/// Whether `address` answers on this bus
pub fn verify(adapter: &mut dyn Adapter, address: &Address, stats: &BusStats) -> Result<bool, BusError> {
    let mut search = Search::seeded(*address);
    match search.next(adapter, stats)? {
        Step::Found(found) => Ok(found == *address),
        Step::Done => Ok(false),
    }
}
