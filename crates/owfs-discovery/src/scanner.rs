//! Directory scanner
//!
//! Lists the devices on one bus, or the union over every bus, below an
//! optional chain of hub branches. Complete listings are kept in the
//! directory cache; a walk that was cut short leaves a poisoned blob that
//! is still shown but never cached. Alarm listings are never cached.

use std::sync::Arc;
use std::thread;

use owfs_bus::{BusList, BusMaster, Search, Step};
use owfs_core::{
    Address, BranchHop, BusError, Clock, DirBlob, DirKey, DirectoryCache, EngineStat, EngineStats,
    PresenceCache, Timeouts, TtlCache, TtlClass,
};
use tracing::{debug, info, warn};

/// Which devices a listing asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Use the directory cache when it holds a fresh listing
    Cached,
    /// Always walk the bus, refreshing the cache
    Direct,
    /// Devices answering the conditional search; never cached
    Alarm,
}

/// Presence and directory lookups over every bus master
#[derive(Debug)]
pub struct Scanner {
    pub(crate) buses: Arc<BusList>,
    pub(crate) presence: PresenceCache,
    directories: DirectoryCache,
    pub(crate) stats: Arc<EngineStats>,
}

impl Scanner {
    pub fn new(
        buses: Arc<BusList>,
        timeouts: Arc<Timeouts>,
        clock: Arc<dyn Clock>,
        stats: Arc<EngineStats>,
    ) -> Self {
        Self {
            buses,
            presence: TtlCache::new(TtlClass::Presence, timeouts.clone(), clock.clone()),
            directories: TtlCache::new(TtlClass::Directory, timeouts, clock),
            stats,
        }
    }

    pub fn buses(&self) -> &Arc<BusList> {
        &self.buses
    }

    pub fn presence_cache(&self) -> &PresenceCache {
        &self.presence
    }

    pub fn directory_cache(&self) -> &DirectoryCache {
        &self.directories
    }

    /// List one bus, or every bus when `bus` is `None`
    ///
    /// A union listing only fails when no bus could be listed at all.
    pub fn list(&self, bus: Option<usize>, branch: &[BranchHop], mode: ScanMode) -> Result<Vec<Address>, BusError> {
        match bus {
            Some(index) => {
                let master = self.buses.get(index).ok_or_else(|| no_such_bus(index))?;
                let (blob, error) = self.listing(master, branch, mode);
                match error {
                    Some(err) => Err(err),
                    None => Ok(blob.into_addresses()),
                }
            }
            None => self.union(branch, mode),
        }
    }

    fn union(&self, branch: &[BranchHop], mode: ScanMode) -> Result<Vec<Address>, BusError> {
        let results: Vec<(DirBlob, Option<BusError>)> = thread::scope(|scope| {
            let handles: Vec<_> = self
                .buses
                .iter()
                .map(|master| scope.spawn(move || self.listing(master, branch, mode)))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        let mut blob = DirBlob::new();
                        blob.poison();
                        (blob, Some(BusError::Protocol("scan thread panicked".to_string())))
                    })
                })
                .collect()
        });

        let mut union = DirBlob::new();
        let mut first_error = None;
        let mut listed = 0;
        for (index, (blob, error)) in results.into_iter().enumerate() {
            match error {
                Some(err) => {
                    warn!(bus = index, error = %err, "bus left out of directory listing");
                    first_error.get_or_insert(err);
                }
                None => listed += 1,
            }
            for address in blob.addresses() {
                union.add(*address);
            }
        }

        match first_error {
            Some(err) if listed == 0 && !self.buses.is_empty() => Err(err),
            _ => Ok(union.into_addresses()),
        }
    }

    /// One bus, from the cache when allowed
    fn listing(&self, master: &BusMaster, branch: &[BranchHop], mode: ScanMode) -> (DirBlob, Option<BusError>) {
        let key = DirKey {
            bus: master.index(),
            branch: branch.to_vec(),
        };
        if mode == ScanMode::Cached {
            if let Some(addresses) = self.directories.get(&key) {
                self.stats.incr(EngineStat::CacheHits);
                debug!(bus = master.index(), devices = addresses.len(), "directory from cache");
                return (DirBlob::from_addresses(addresses), None);
            }
            self.stats.incr(EngineStat::CacheMisses);
        }

        let (blob, error) = self.walk(master, branch, mode == ScanMode::Alarm);
        if mode != ScanMode::Alarm && !blob.is_poisoned() {
            self.directories.insert(key, blob.addresses().to_vec());
        }
        (blob, error)
    }

    /// Search the bus below `branch`, recording presence along the way
    fn walk(&self, master: &BusMaster, branch: &[BranchHop], alarm: bool) -> (DirBlob, Option<BusError>) {
        self.stats.incr(EngineStat::DirectoryScans);
        let mut blob = DirBlob::new();
        let outcome = master.transact(|guard| {
            // a reconnect reruns the whole walk
            blob = DirBlob::new();
            guard.select_branch(branch)?;
            let mut search = Search::first(alarm);
            while let Step::Found(address) = guard.search_next(&mut search)? {
                if blob.add(address) {
                    self.presence.insert(address, master.index());
                }
            }
            Ok(())
        });

        match outcome {
            Ok(()) => {
                debug!(bus = master.index(), devices = blob.len(), alarm, "bus walked");
                (blob, None)
            }
            Err(err) => {
                warn!(bus = master.index(), error = %err, found = blob.len(), "directory walk cut short");
                blob.poison();
                (blob, Some(err))
            }
        }
    }

    /// Walk every bus once and log what answered
    pub fn survey(&self) -> Vec<(usize, Result<Vec<Address>, BusError>)> {
        self.buses
            .iter()
            .map(|master| {
                let result = self.list(Some(master.index()), &[], ScanMode::Direct);
                match &result {
                    Ok(devices) => info!(bus = master.index(), name = master.name(), devices = devices.len(), "bus surveyed"),
                    Err(err) => warn!(bus = master.index(), name = master.name(), error = %err, "bus survey failed"),
                }
                (master.index(), result)
            })
            .collect()
    }
}

pub(crate) fn no_such_bus(index: usize) -> BusError {
    BusError::Disconnected(format!("no bus master {}", index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use owfs_bus::{Chip, SimDevice, SimulatedBus};
    use owfs_core::{Branch, ManualClock};
    use std::time::Duration;

    fn address(family: u8, n: u8) -> Address {
        Address::from_parts(family, [n, 0x10, 0x20, 0x30, 0x40, 0x50])
    }

    fn setup(sims: &[SimulatedBus]) -> (Scanner, Arc<ManualClock>) {
        let mut buses = BusList::new();
        for (i, sim) in sims.iter().enumerate() {
            buses.add(format!("sim{}", i), Box::new(sim.clone()));
        }
        let clock = Arc::new(ManualClock::default());
        let scanner = Scanner::new(
            Arc::new(buses),
            Arc::new(Timeouts::default()),
            clock.clone(),
            Arc::new(EngineStats::default()),
        );
        (scanner, clock)
    }

    fn plain(address: Address) -> SimDevice {
        SimDevice::new(address, Chip::Plain)
    }

    #[test]
    fn test_union_spans_buses_in_order() {
        let a = address(0x28, 1);
        let b = address(0x29, 2);
        let c = address(0x01, 3);
        let (scanner, _) = setup(&[
            SimulatedBus::with_devices([plain(a), plain(b)]),
            SimulatedBus::with_devices([plain(c)]),
        ]);
        let listed = scanner.list(None, &[], ScanMode::Cached).unwrap();
        assert_eq!(listed.len(), 3);
        assert!(listed.contains(&a) && listed.contains(&b));
        assert_eq!(listed[2], c);
        // walking fills the presence cache as a side effect
        assert_eq!(scanner.presence_cache().get(&c), Some(1));
        assert_eq!(scanner.presence_cache().get(&a), Some(0));
    }

    #[test]
    fn test_listing_cached_until_ttl() {
        let a = address(0x28, 1);
        let b = address(0x28, 2);
        let sim = SimulatedBus::with_devices([plain(a), plain(b)]);
        let (scanner, clock) = setup(&[sim.clone()]);

        assert_eq!(scanner.list(None, &[], ScanMode::Cached).unwrap().len(), 2);
        sim.detach(&b);
        clock.advance(Duration::from_secs(59));
        assert_eq!(scanner.list(None, &[], ScanMode::Cached).unwrap().len(), 2);
        assert_eq!(scanner.stats.get(EngineStat::DirectoryScans), 1);

        clock.advance(Duration::from_secs(2));
        assert_eq!(scanner.list(None, &[], ScanMode::Cached).unwrap(), vec![a]);
        assert_eq!(scanner.stats.get(EngineStat::DirectoryScans), 2);
    }

    #[test]
    fn test_direct_listing_bypasses_cache() {
        let a = address(0x28, 1);
        let sim = SimulatedBus::with_devices([plain(a)]);
        let (scanner, _) = setup(&[sim.clone()]);
        scanner.list(Some(0), &[], ScanMode::Cached).unwrap();
        sim.detach(&a);
        assert!(scanner.list(Some(0), &[], ScanMode::Direct).unwrap().is_empty());
        // and the fresh result replaced the cached one
        assert!(scanner.list(Some(0), &[], ScanMode::Cached).unwrap().is_empty());
    }

    #[test]
    fn test_failed_walk_is_not_cached() {
        let good = address(0x28, 1);
        let bad = address(0x29, 2);
        let sim = SimulatedBus::with_devices([plain(good), plain(bad)]);
        sim.set_garbled(&bad, true);
        let (scanner, _) = setup(&[sim.clone()]);

        assert!(matches!(
            scanner.list(None, &[], ScanMode::Cached),
            Err(BusError::Checksum(_))
        ));
        assert!(scanner.directory_cache().is_empty());

        sim.set_garbled(&bad, false);
        assert_eq!(scanner.list(None, &[], ScanMode::Cached).unwrap().len(), 2);
        assert_eq!(scanner.directory_cache().len(), 1);
    }

    #[test]
    fn test_union_survives_one_dead_bus() {
        let a = address(0x28, 1);
        let dead = SimulatedBus::with_devices([plain(address(0x28, 9))]);
        dead.disconnect(false);
        let (scanner, _) = setup(&[dead, SimulatedBus::with_devices([plain(a)])]);
        assert_eq!(scanner.list(None, &[], ScanMode::Cached).unwrap(), vec![a]);
        assert!(matches!(
            scanner.list(Some(0), &[], ScanMode::Cached),
            Err(BusError::Disconnected(_))
        ));
    }

    #[test]
    fn test_alarm_listing_never_cached() {
        let quiet = address(0x28, 1);
        let loud = address(0x28, 2);
        let sim = SimulatedBus::with_devices([plain(quiet), plain(loud).alarmed()]);
        let (scanner, _) = setup(&[sim]);
        assert_eq!(scanner.list(None, &[], ScanMode::Alarm).unwrap(), vec![loud]);
        assert_eq!(scanner.list(None, &[], ScanMode::Alarm).unwrap(), vec![loud]);
        assert_eq!(scanner.stats.get(EngineStat::DirectoryScans), 2);
        assert!(scanner.directory_cache().is_empty());
    }

    #[test]
    fn test_branch_listing() {
        let hub = address(0x1F, 1);
        let top = address(0x28, 2);
        let below = address(0x01, 3);
        let sim = SimulatedBus::with_devices([
            SimDevice::new(hub, Chip::Hub),
            plain(top),
            plain(below).on_branch(hub, Branch::Main),
        ]);
        let (scanner, _) = setup(&[sim]);

        let root = scanner.list(None, &[], ScanMode::Cached).unwrap();
        assert_eq!(root.len(), 2);
        assert!(!root.contains(&below));

        let main = [BranchHop { hub, branch: Branch::Main }];
        let branch = scanner.list(Some(0), &main, ScanMode::Cached).unwrap();
        assert!(branch.contains(&below));
        // each branch has its own cache entry
        assert_eq!(scanner.directory_cache().len(), 2);
    }

    #[test]
    fn test_unknown_bus_index() {
        let (scanner, _) = setup(&[SimulatedBus::new()]);
        assert!(scanner.list(Some(4), &[], ScanMode::Direct).is_err());
    }
}
