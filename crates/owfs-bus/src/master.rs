//! Bus masters
//!
//! A [`BusMaster`] owns one adapter channel. All traffic goes through a
//! [`BusGuard`] obtained from [`BusMaster::lock`], which serializes access,
//! keeps the per-bus statistics and tracks which hub branches are switched
//! on.

use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use owfs_core::{Address, Branch, BranchHop, BusError, BusStat, BusStats};
use tracing::{debug, info, trace, warn};

use crate::adapter::Adapter;
use crate::link::DeviceLink;
use crate::search::{self, Search, Step};

const MATCH_ROM: u8 = 0x55;
const SKIP_ROM: u8 = 0xCC;

const HUB_ALL_LINES_OFF: u8 = 0x66;
const HUB_SMART_ON_MAIN: u8 = 0xCC;
const HUB_SMART_ON_AUX: u8 = 0x33;
/// Reset stimulus sent after a smart-on command
const HUB_RESET_STIMULUS: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconnectState {
    Ok,
    /// The adapter could not be reopened
    Bad,
    /// The adapter reopened but did not initialize
    Error,
}

impl ReconnectState {
    pub fn name(&self) -> &'static str {
        match self {
            ReconnectState::Ok => "ok",
            ReconnectState::Bad => "bad",
            ReconnectState::Error => "error",
        }
    }
}

struct MasterInner {
    adapter: Box<dyn Adapter>,
    reconnect: ReconnectState,
    last_address: Option<Address>,
    /// Branch path currently switched on; `None` when unknown
    branch: Option<Vec<BranchHop>>,
}

/// One 1-Wire channel and its serialized state
pub struct BusMaster {
    index: usize,
    name: String,
    kind: String,
    channel: usize,
    channels: usize,
    stats: BusStats,
    inner: Mutex<MasterInner>,
}

impl fmt::Debug for BusMaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusMaster")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("channel", &self.channel)
            .finish()
    }
}

impl BusMaster {
    pub fn new(index: usize, name: impl Into<String>, adapter: Box<dyn Adapter>) -> Self {
        Self {
            index,
            name: name.into(),
            kind: adapter.kind().to_string(),
            channel: adapter.channel(),
            channels: adapter.channels(),
            stats: BusStats::default(),
            inner: Mutex::new(MasterInner {
                adapter,
                reconnect: ReconnectState::Ok,
                last_address: None,
                branch: None,
            }),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn channel(&self) -> usize {
        self.channel
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn stats(&self) -> &BusStats {
        &self.stats
    }

    pub fn reconnect_state(&self) -> ReconnectState {
        self.inner.lock().reconnect
    }

    /// The device most recently selected on this bus
    pub fn last_address(&self) -> Option<Address> {
        self.inner.lock().last_address
    }

    pub fn lock(&self) -> BusGuard<'_> {
        let inner = self.inner.lock();
        self.stats.incr(BusStat::Locks);
        BusGuard { master: self, inner }
    }

    /// Run `op` under the bus lock
    ///
    /// A bus marked bad is reconnected first. A connection error triggers
    /// one reconnect and, if that succeeds, one more run of `op`.
    pub fn transact<T>(
        &self,
        mut op: impl FnMut(&mut BusGuard<'_>) -> Result<T, BusError>,
    ) -> Result<T, BusError> {
        let mut guard = self.lock();
        if guard.inner.reconnect != ReconnectState::Ok {
            guard.reconnect()?;
        }
        match op(&mut guard) {
            Ok(value) => Ok(value),
            Err(err) if err.is_connection() => {
                self.stats.incr(BusStat::Errors);
                warn!(bus = self.index, error = %err, "bus connection lost, reconnecting");
                guard.reconnect()?;
                op(&mut guard).map_err(|err| {
                    self.stats.incr(BusStat::Errors);
                    err
                })
            }
            // rejected before touching the wire
            Err(err @ BusError::InvalidValue(_)) => Err(err),
            Err(err) => {
                self.stats.incr(BusStat::Errors);
                Err(err)
            }
        }
    }
}

/// Exclusive access to one bus master
pub struct BusGuard<'a> {
    master: &'a BusMaster,
    inner: MutexGuard<'a, MasterInner>,
}

impl Drop for BusGuard<'_> {
    fn drop(&mut self) {
        self.master.stats.incr(BusStat::Unlocks);
    }
}

impl<'a> BusGuard<'a> {
    pub fn index(&self) -> usize {
        self.master.index
    }

    fn count(&self, stat: BusStat) {
        self.master.stats.incr(stat);
    }

    fn note(&self, err: &BusError, stat: BusStat) {
        match err {
            BusError::Timeout => self.count(BusStat::Timeouts),
            _ => self.count(stat),
        }
    }

    /// Reset the bus; `Ok(true)` when some device answered
    pub fn reset(&mut self) -> Result<bool, BusError> {
        self.count(BusStat::Resets);
        match self.inner.adapter.reset() {
            Ok(reset) if reset.short => {
                self.count(BusStat::ShortErrors);
                Err(BusError::Short)
            }
            Ok(reset) => Ok(reset.presence),
            Err(err) => {
                self.note(&err, BusStat::ResetErrors);
                Err(err)
            }
        }
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<(), BusError> {
        self.inner.adapter.write_bytes(bytes).map_err(|err| {
            self.note(&err, BusStat::WriteErrors);
            err
        })
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<(), BusError> {
        self.inner.adapter.read_bytes(buf).map_err(|err| {
            self.note(&err, BusStat::ReadErrors);
            err
        })
    }

    pub fn delay(&mut self, duration: Duration) {
        self.inner.adapter.delay(duration);
    }

    /// Reset and address a single device
    pub fn match_rom(&mut self, address: &Address) -> Result<(), BusError> {
        if !self.reset()? {
            self.count(BusStat::SelectErrors);
            return Err(BusError::NoPresence);
        }
        let mut frame = [0u8; 9];
        frame[0] = MATCH_ROM;
        frame[1..].copy_from_slice(address.bytes());
        self.write(&frame)?;
        self.inner.last_address = Some(*address);
        Ok(())
    }

    /// Make sure exactly the hub branches in `path` are switched on
    pub fn select_branch(&mut self, path: &[BranchHop]) -> Result<(), BusError> {
        if self.inner.branch.as_deref() == Some(path) {
            return Ok(());
        }
        let result = self.switch_branch(path);
        self.inner.branch = match &result {
            Ok(()) => Some(path.to_vec()),
            Err(_) => None,
        };
        result
    }

    fn switch_branch(&mut self, path: &[BranchHop]) -> Result<(), BusError> {
        let lines_may_be_on = self.inner.branch.as_ref().map_or(true, |b| !b.is_empty());
        if lines_may_be_on {
            if self.reset()? {
                self.write(&[SKIP_ROM, HUB_ALL_LINES_OFF])?;
                let mut echo = [0u8; 1];
                self.read(&mut echo)?;
                trace!(bus = self.index(), echo = echo[0], "hub lines off");
            }
            self.inner.branch = Some(Vec::new());
        }

        for hop in path {
            let command = match hop.branch {
                Branch::Main => HUB_SMART_ON_MAIN,
                Branch::Aux => HUB_SMART_ON_AUX,
            };
            self.match_rom(&hop.hub)?;
            self.write(&[command, HUB_RESET_STIMULUS])?;
            let mut reply = [0u8; 2];
            self.read(&mut reply)?;
            if reply[1] != command {
                self.count(BusStat::SelectErrors);
                return Err(BusError::Protocol(format!(
                    "hub {} did not confirm {} branch",
                    hop.hub,
                    hop.branch.name()
                )));
            }
            debug!(bus = self.index(), hub = %hop.hub, branch = hop.branch.name(), "hub branch on");
        }
        Ok(())
    }

    pub fn search_next(&mut self, search: &mut Search) -> Result<Step, BusError> {
        search.next(&mut *self.inner.adapter, &self.master.stats)
    }

    /// Search pass replaying `address`; true if it answered
    pub fn verify(&mut self, address: &Address) -> Result<bool, BusError> {
        search::verify(&mut *self.inner.adapter, address, &self.master.stats)
    }

    /// Byte-level access to one device below `branch`
    pub fn link<'g>(&'g mut self, address: Address, branch: &'g [BranchHop]) -> DeviceLink<'g, 'a> {
        DeviceLink::new(self, address, branch)
    }

    /// Reopen the adapter
    pub fn reconnect(&mut self) -> Result<(), BusError> {
        self.count(BusStat::Reconnects);
        self.inner.branch = None;
        match self.inner.adapter.reconnect() {
            Ok(()) => {
                self.inner.reconnect = ReconnectState::Ok;
                info!(bus = self.index(), "bus master reconnected");
                Ok(())
            }
            Err(err) => {
                self.count(BusStat::ReconnectErrors);
                self.inner.reconnect = if err.is_connection() {
                    ReconnectState::Bad
                } else {
                    ReconnectState::Error
                };
                warn!(bus = self.index(), error = %err, "failed to reconnect bus master");
                Err(BusError::Disconnected(err.to_string()))
            }
        }
    }
}

/// Bus masters in index order, fixed once discovery is complete
#[derive(Debug, Default)]
pub struct BusList {
    masters: Vec<Arc<BusMaster>>,
}

impl BusList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an adapter as the next bus; returns its index
    pub fn add(&mut self, name: impl Into<String>, adapter: Box<dyn Adapter>) -> usize {
        let index = self.masters.len();
        self.masters.push(Arc::new(BusMaster::new(index, name, adapter)));
        index
    }

    pub fn get(&self, index: usize) -> Option<&Arc<BusMaster>> {
        self.masters.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<BusMaster>> {
        self.masters.iter()
    }

    pub fn len(&self) -> usize {
        self.masters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masters.is_empty()
    }
}
