//! Presence checks
//!
//! `check_presence` answers from the presence cache when it can, then tries
//! the bus the caller expects, then every other bus in parallel.
//! `recheck_presence` is for a location that just failed: it reverifies the
//! expected bus and the cached bus, and otherwise evicts the entry and does
//! a fresh check.

use std::thread;

use owfs_bus::BusMaster;
use owfs_core::{Address, BranchHop, BusError, EngineStat};
use tracing::{debug, info};

use crate::scanner::{no_such_bus, Scanner};

impl Scanner {
    /// The bus `address` answers on, if any
    pub fn check_presence(&self, address: &Address, branch: &[BranchHop], hint: Option<usize>) -> Option<usize> {
        if let Some(bus) = self.presence.get(address) {
            self.stats.incr(EngineStat::CacheHits);
            debug!(%address, bus, "presence from cache");
            return Some(bus);
        }
        self.stats.incr(EngineStat::CacheMisses);

        let found = hint
            .filter(|bus| self.answers(*bus, address, branch))
            .or_else(|| self.search_buses(address, branch, hint));
        match found {
            Some(bus) => {
                debug!(%address, bus, "device located");
                self.presence.insert(*address, bus);
            }
            None => debug!(%address, "device not present on any bus"),
        }
        found
    }

    /// Presence on one given bus only
    ///
    /// Unlike [`Scanner::check_presence`] a bus failure is reported rather
    /// than treated as absence.
    pub fn check_presence_on(&self, bus: usize, address: &Address, branch: &[BranchHop]) -> Result<bool, BusError> {
        if self.presence.get(address) == Some(bus) {
            self.stats.incr(EngineStat::CacheHits);
            return Ok(true);
        }
        self.stats.incr(EngineStat::CacheMisses);
        let master = self.buses.get(bus).ok_or_else(|| no_such_bus(bus))?;
        let present = sense(master, address, branch)?;
        if present {
            self.presence.insert(*address, bus);
        }
        Ok(present)
    }

    /// Confirm or correct a location that was just found wanting
    pub fn recheck_presence(&self, address: &Address, branch: &[BranchHop], known: Option<usize>) -> Option<usize> {
        if let Some(bus) = known {
            if self.answers(bus, address, branch) {
                self.presence.insert(*address, bus);
                return Some(bus);
            }
        }
        if let Some(bus) = self.presence.get(address) {
            if Some(bus) != known && self.answers(bus, address, branch) {
                return Some(bus);
            }
        }

        self.presence.remove(address);
        let found = self.check_presence(address, branch, None);
        if let (Some(from), Some(to)) = (known, found) {
            if from != to {
                info!(%address, from, to, "device moved to another bus");
            }
        }
        found
    }

    fn answers(&self, bus: usize, address: &Address, branch: &[BranchHop]) -> bool {
        match self.buses.get(bus) {
            Some(master) => sense_quietly(master, address, branch),
            None => false,
        }
    }

    /// Check every bus except `skip` at once; lowest index wins
    fn search_buses(&self, address: &Address, branch: &[BranchHop], skip: Option<usize>) -> Option<usize> {
        thread::scope(|scope| {
            let handles: Vec<_> = self
                .buses
                .iter()
                .filter(|master| Some(master.index()) != skip)
                .map(|master| scope.spawn(move || (master.index(), sense_quietly(master, address, branch))))
                .collect();
            handles
                .into_iter()
                .filter_map(|handle| handle.join().ok())
                .filter(|(_, present)| *present)
                .map(|(bus, _)| bus)
                .min()
        })
    }
}

/// Search pass replaying `address` below `branch`
pub fn sense(master: &BusMaster, address: &Address, branch: &[BranchHop]) -> Result<bool, BusError> {
    master.transact(|guard| {
        guard.select_branch(branch)?;
        guard.verify(address)
    })
}

fn sense_quietly(master: &BusMaster, address: &Address, branch: &[BranchHop]) -> bool {
    match sense(master, address, branch) {
        Ok(present) => present,
        Err(err) => {
            debug!(bus = master.index(), %address, error = %err, "presence check failed");
            false
        }
    }
}
