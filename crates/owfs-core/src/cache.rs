//! Time-to-live caches
//!
//! Each cache belongs to one TTL class whose lifetime is read from a shared
//! [`Timeouts`] table at lookup time, so changing a timeout takes effect on
//! the next read. Entries are never swept: a stale entry is reported as a
//! miss and overwritten by the next successful insert.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::address::Address;
use crate::query::{BranchHop, Extension};
use crate::value::Value;

/// Source of the current instant
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }
}

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TtlClass {
    Volatile,
    Stable,
    Directory,
    Presence,
}

/// Lifetime of each TTL class in seconds
#[derive(Debug)]
pub struct Timeouts {
    volatile: AtomicU64,
    stable: AtomicU64,
    directory: AtomicU64,
    presence: AtomicU64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::new(15, 300, 60, 120)
    }
}

impl Timeouts {
    pub fn new(volatile: u64, stable: u64, directory: u64, presence: u64) -> Self {
        Self {
            volatile: AtomicU64::new(volatile),
            stable: AtomicU64::new(stable),
            directory: AtomicU64::new(directory),
            presence: AtomicU64::new(presence),
        }
    }

    fn slot(&self, class: TtlClass) -> &AtomicU64 {
        match class {
            TtlClass::Volatile => &self.volatile,
            TtlClass::Stable => &self.stable,
            TtlClass::Directory => &self.directory,
            TtlClass::Presence => &self.presence,
        }
    }

    pub fn seconds(&self, class: TtlClass) -> u64 {
        self.slot(class).load(Ordering::Relaxed)
    }

    pub fn get(&self, class: TtlClass) -> Duration {
        Duration::from_secs(self.seconds(class))
    }

    pub fn set(&self, class: TtlClass, seconds: u64) {
        self.slot(class).store(seconds, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    inserted: Instant,
}

/// A map whose entries expire after the lifetime of its TTL class
#[derive(Debug)]
pub struct TtlCache<K, V> {
    class: TtlClass,
    timeouts: Arc<Timeouts>,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<K, Entry<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(class: TtlClass, timeouts: Arc<Timeouts>, clock: Arc<dyn Clock>) -> Self {
        Self {
            class,
            timeouts,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn class(&self) -> TtlClass {
        self.class
    }

    /// The cached value if it was inserted less than one TTL ago
    pub fn get(&self, key: &K) -> Option<V> {
        let ttl = self.timeouts.get(self.class);
        let now = self.clock.now();
        let entries = self.entries.lock();
        let entry = entries.get(key)?;
        if now.saturating_duration_since(entry.inserted) < ttl {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    pub fn insert(&self, key: K, value: V) {
        let inserted = self.clock.now();
        self.entries.lock().insert(key, Entry { value, inserted });
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.lock().remove(key).map(|e| e.value)
    }

    pub fn retain(&self, mut keep: impl FnMut(&K) -> bool) {
        self.entries.lock().retain(|k, _| keep(k));
    }

    /// Number of stored entries, stale ones included
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// Serial number to bus index
pub type PresenceCache = TtlCache<Address, usize>;

/// Directory cache key: one bus, optionally below hub branches
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirKey {
    pub bus: usize,
    pub branch: Vec<BranchHop>,
}

/// Addresses found on one directory scan
///
/// A blob is poisoned when the scan producing it was cut short, and a
/// poisoned blob must never be cached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirBlob {
    addresses: Vec<Address>,
    poisoned: bool,
}

impl DirBlob {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_addresses(addresses: Vec<Address>) -> Self {
        Self {
            addresses,
            poisoned: false,
        }
    }

    /// Append unless already present; returns whether it was new
    pub fn add(&mut self, address: Address) -> bool {
        if self.addresses.contains(&address) {
            false
        } else {
            self.addresses.push(address);
            true
        }
    }

    pub fn poison(&mut self) {
        self.poisoned = true;
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.addresses.contains(address)
    }

    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    pub fn into_addresses(self) -> Vec<Address> {
        self.addresses
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

pub type DirectoryCache = TtlCache<DirKey, Vec<Address>>;

/// One cached form of a property value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValueKey {
    pub address: Address,
    pub property: String,
    pub extension: Extension,
}

/// Property values, split by TTL class
#[derive(Debug)]
pub struct ValueCache {
    volatile: TtlCache<ValueKey, Value>,
    stable: TtlCache<ValueKey, Value>,
}

impl ValueCache {
    pub fn new(timeouts: Arc<Timeouts>, clock: Arc<dyn Clock>) -> Self {
        Self {
            volatile: TtlCache::new(TtlClass::Volatile, timeouts.clone(), clock.clone()),
            stable: TtlCache::new(TtlClass::Stable, timeouts, clock),
        }
    }

    fn cache(&self, class: TtlClass) -> Option<&TtlCache<ValueKey, Value>> {
        match class {
            TtlClass::Volatile => Some(&self.volatile),
            TtlClass::Stable => Some(&self.stable),
            TtlClass::Directory | TtlClass::Presence => None,
        }
    }

    pub fn get(&self, class: TtlClass, key: &ValueKey) -> Option<Value> {
        self.cache(class)?.get(key)
    }

    pub fn insert(&self, class: TtlClass, key: ValueKey, value: Value) {
        if let Some(cache) = self.cache(class) {
            cache.insert(key, value);
        }
    }

    /// Drop every cached form (element, ALL, BYTE) of one property
    pub fn invalidate_property(&self, address: &Address, property: &str) {
        let keep = |key: &ValueKey| !(key.address == *address && key.property == property);
        self.volatile.retain(keep);
        self.stable.retain(keep);
    }

    /// Drop everything cached for one device
    pub fn invalidate_device(&self, address: &Address) {
        self.volatile.retain(|key| key.address != *address);
        self.stable.retain(|key| key.address != *address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Arc<Timeouts>, Arc<ManualClock>) {
        (Arc::new(Timeouts::default()), Arc::new(ManualClock::default()))
    }

    #[test]
    fn test_directory_ttl_boundary() {
        let (timeouts, clock) = setup();
        let cache: DirectoryCache = TtlCache::new(TtlClass::Directory, timeouts.clone(), clock.clone());
        let key = DirKey { bus: 0, branch: Vec::new() };
        let ttl = timeouts.get(TtlClass::Directory);

        cache.insert(key.clone(), vec![Address::from_parts(0x28, [1, 2, 3, 4, 5, 6])]);
        clock.advance(ttl - Duration::from_secs(1));
        assert!(cache.get(&key).is_some());
        clock.advance(Duration::from_secs(2));
        assert!(cache.get(&key).is_none());
        // stale entries stay until overwritten
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_timeout_change_applies_immediately() {
        let (timeouts, clock) = setup();
        let cache: PresenceCache = TtlCache::new(TtlClass::Presence, timeouts.clone(), clock.clone());
        let address = Address::from_parts(0x10, [0; 6]);
        cache.insert(address, 3);
        clock.advance(Duration::from_secs(30));
        assert_eq!(cache.get(&address), Some(3));
        timeouts.set(TtlClass::Presence, 10);
        assert_eq!(cache.get(&address), None);
    }

    #[test]
    fn test_reinsert_refreshes() {
        let (timeouts, clock) = setup();
        let cache: PresenceCache = TtlCache::new(TtlClass::Presence, timeouts, clock.clone());
        let address = Address::from_parts(0x10, [0; 6]);
        cache.insert(address, 0);
        clock.advance(Duration::from_secs(200));
        assert_eq!(cache.get(&address), None);
        cache.insert(address, 1);
        assert_eq!(cache.get(&address), Some(1));
    }

    #[test]
    fn test_value_cache_invalidates_every_form() {
        let (timeouts, clock) = setup();
        let values = ValueCache::new(timeouts, clock);
        let address = Address::from_parts(0x29, [9; 6]);
        for extension in [Extension::All, Extension::Byte, Extension::Index(3)] {
            let key = ValueKey {
                address,
                property: "PIO".into(),
                extension,
            };
            values.insert(TtlClass::Stable, key, Value::Unsigned(1));
        }
        let other = ValueKey {
            address,
            property: "sensed".into(),
            extension: Extension::Byte,
        };
        values.insert(TtlClass::Volatile, other.clone(), Value::Unsigned(2));

        values.invalidate_property(&address, "PIO");
        let byte = ValueKey {
            address,
            property: "PIO".into(),
            extension: Extension::Byte,
        };
        assert_eq!(values.get(TtlClass::Stable, &byte), None);
        assert_eq!(values.get(TtlClass::Volatile, &other), Some(Value::Unsigned(2)));
    }

    #[test]
    fn test_dir_blob_dedupes_and_poisons() {
        let mut blob = DirBlob::new();
        let a = Address::from_parts(0x28, [1; 6]);
        assert!(blob.add(a));
        assert!(!blob.add(a));
        assert_eq!(blob.len(), 1);
        assert!(!blob.is_poisoned());
        blob.poison();
        assert!(blob.is_poisoned());
    }
}
