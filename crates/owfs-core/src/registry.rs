//! Device type registry
//!
//! Devices are described once at startup with [`DeviceSpec`] and handed to a
//! [`RegistryBuilder`]. `build()` sorts every property list by name and
//! freezes the result into a [`Registry`] whose devices are shared read-only
//! for the rest of the process. Property lookup is a binary search, which is
//! only valid because nothing can reach a `Device` before it has been sorted.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::link::DeviceDriver;
use crate::query::{Branch, DirType, Extension};
use crate::stats::{BusStat, EngineStat};

/// Storage format of a property value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Boolean,
    Integer,
    Unsigned,
    Float,
    /// Fixed-point temperature, carried in Celsius
    Temperature,
    /// Pressure in millibar
    Pressure,
    Date,
    Ascii,
    Binary,
    Bitfield,
    /// Enters a bus branch below this device
    Directory,
    /// Groups the properties named `<subdir>/...`
    Subdirectory,
}

impl Format {
    pub fn is_directory(&self) -> bool {
        matches!(self, Format::Directory | Format::Subdirectory)
    }

    /// Variable-length formats whose elements are spliced as raw bytes
    pub fn is_variable_length(&self) -> bool {
        matches!(self, Format::Ascii | Format::Binary)
    }

    /// Single-character tag used in structure listings
    pub fn tag(&self) -> char {
        match self {
            Format::Boolean => 'y',
            Format::Integer => 'i',
            Format::Unsigned => 'u',
            Format::Float => 'f',
            Format::Temperature => 't',
            Format::Pressure => 'p',
            Format::Date => 'd',
            Format::Ascii => 'a',
            Format::Binary => 'b',
            Format::Bitfield => 'B',
            Format::Directory | Format::Subdirectory => 'D',
        }
    }

    /// The format one addressed piece of this property is encoded with
    ///
    /// Bitfields are booleans per element and an unsigned number when packed.
    pub fn element_format(&self, extension: &Extension) -> Format {
        match (self, extension) {
            (Format::Bitfield, Extension::Byte) => Format::Unsigned,
            (Format::Bitfield, _) => Format::Boolean,
            (format, _) => *format,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Numbering {
    /// `.A`, `.B`, ...
    Letters,
    /// `.0`, `.1`, ...
    Numbers,
}

/// How the elements of an array property map onto device transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Combination {
    /// One transaction covers the whole array
    Aggregate,
    /// One transaction per element
    Separate,
    /// Unbounded namespace, extension passed through verbatim
    Sparse,
    /// Aggregate for `.ALL`/`.BYTE`, element transactions for single elements
    Mixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Aggregate {
    pub elements: usize,
    pub numbering: Numbering,
    pub combination: Combination,
}

/// Elements `A` through `Z`; lettered arrays fall back to numbers past that
pub const LETTERS: usize = 26;

impl Aggregate {
    /// Display name of element `index`
    pub fn element_name(&self, index: usize) -> String {
        match self.numbering {
            Numbering::Letters if index < LETTERS => char::from(b'A' + index as u8).to_string(),
            _ => index.to_string(),
        }
    }
}

/// How long a value read from the device stays valid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Volatility {
    Volatile,
    Stable,
    /// Changes every second, never cached
    Second,
    /// Process counter, never cached
    Statistic,
}

impl Volatility {
    pub fn tag(&self) -> char {
        match self {
            Volatility::Volatile => 'v',
            Volatility::Stable => 's',
            Volatility::Second => 't',
            Volatility::Statistic => 'c',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Always,
    /// Reachable by name but never listed
    Hidden,
    /// Listed only on adapters with more than one channel
    MultiChannel,
}

/// Properties derived from the address alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Standard {
    Address,
    RAddress,
    Id,
    RId,
    Crc8,
    Family,
    Type,
    Present,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    TimeoutVolatile,
    TimeoutStable,
    TimeoutDirectory,
    TimeoutPresence,
    TemperatureScale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemItem {
    Pid,
    Uptime,
    Version,
    BusCount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatisticItem {
    Engine(EngineStat),
    /// Sum of one bus counter over every bus master
    BusTotal(BusStat),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceItem {
    Name,
    Adapter,
    Channel,
    ReconnectState,
    Stat(BusStat),
}

/// Where a property's value comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Chip transaction through the device driver
    Chip,
    Standard(Standard),
    Setting(Setting),
    System(SystemItem),
    Statistic(StatisticItem),
    Interface(InterfaceItem),
    /// Branch of a hub, listed as a directory
    Branch(Branch),
}

/// A named, typed property of a device
#[derive(Debug, Clone)]
pub struct Property {
    name: String,
    format: Format,
    length: usize,
    aggregate: Option<Aggregate>,
    readable: bool,
    writable: bool,
    volatility: Volatility,
    visibility: Visibility,
    source: Source,
}

impl Property {
    /// A readable, stable, always visible chip property
    pub fn new(name: impl Into<String>, format: Format, length: usize) -> Self {
        Self {
            name: name.into(),
            format,
            length,
            aggregate: None,
            readable: true,
            writable: false,
            volatility: Volatility::Stable,
            visibility: Visibility::Always,
            source: Source::Chip,
        }
    }

    pub fn directory(name: impl Into<String>, source: Source) -> Self {
        Self::new(name, Format::Directory, 0).with_source(source)
    }

    pub fn subdirectory(name: impl Into<String>) -> Self {
        Self::new(name, Format::Subdirectory, 0)
    }

    pub fn array(mut self, elements: usize, numbering: Numbering, combination: Combination) -> Self {
        self.aggregate = Some(Aggregate {
            elements,
            numbering,
            combination,
        });
        self
    }

    pub fn writable(mut self) -> Self {
        self.writable = true;
        self
    }

    pub fn write_only(mut self) -> Self {
        self.readable = false;
        self.writable = true;
        self
    }

    pub fn with_volatility(mut self, volatility: Volatility) -> Self {
        self.volatility = volatility;
        self
    }

    pub fn volatile(self) -> Self {
        self.with_volatility(Volatility::Volatile)
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_source(mut self, source: Source) -> Self {
        self.source = source;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name without any subdirectory prefix
    pub fn leaf_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    /// The subdirectory this property lives in, if any
    pub fn subdir(&self) -> Option<&str> {
        self.name.rsplit_once('/').map(|(dir, _)| dir)
    }

    pub fn format(&self) -> Format {
        self.format
    }

    /// Encoded size of one element in bytes
    pub fn length(&self) -> usize {
        self.length
    }

    pub fn aggregate(&self) -> Option<&Aggregate> {
        self.aggregate.as_ref()
    }

    pub fn is_array(&self) -> bool {
        self.aggregate.is_some()
    }

    pub fn elements(&self) -> usize {
        self.aggregate.map(|a| a.elements).unwrap_or(1)
    }

    pub fn combination(&self) -> Option<Combination> {
        self.aggregate.map(|a| a.combination)
    }

    pub fn is_bitfield(&self) -> bool {
        self.format == Format::Bitfield
    }

    pub fn is_directory(&self) -> bool {
        self.format.is_directory()
    }

    pub fn readable(&self) -> bool {
        self.readable
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn volatility(&self) -> Volatility {
        self.volatility
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    pub fn source(&self) -> Source {
        self.source
    }

    /// Size in bytes of the file for `extension`
    pub fn file_length(&self, extension: &Extension) -> usize {
        match (self.aggregate, extension) {
            (Some(_), Extension::Byte) => 12,
            (Some(agg), Extension::All) => {
                let per_element = match self.format {
                    Format::Bitfield => 1,
                    _ => self.length,
                };
                if self.format == Format::Binary {
                    agg.elements * per_element
                } else {
                    (agg.elements * (per_element + 1)).saturating_sub(1)
                }
            }
            (_, _) if self.format == Format::Bitfield => 1,
            _ => self.length,
        }
    }
}

/// A device description under construction
#[derive(Debug, Clone)]
pub struct DeviceSpec {
    code: String,
    family: Option<u8>,
    name: String,
    alarm: bool,
    properties: Vec<Property>,
    driver: Option<Arc<dyn DeviceDriver>>,
}

impl DeviceSpec {
    /// A physical device with a one-byte family code
    pub fn real(family: u8, name: impl Into<String>) -> Self {
        Self {
            code: format!("{:02X}", family),
            family: Some(family),
            name: name.into(),
            alarm: false,
            properties: Vec::new(),
            driver: None,
        }
    }

    /// A pseudo-device addressed by name inside a virtual directory
    pub fn virtual_device(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            family: None,
            name: name.into(),
            alarm: false,
            properties: Vec::new(),
            driver: None,
        }
    }

    pub fn property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    pub fn properties(mut self, properties: impl IntoIterator<Item = Property>) -> Self {
        self.properties.extend(properties);
        self
    }

    pub fn alarm_capable(mut self) -> Self {
        self.alarm = true;
        self
    }

    pub fn driver(mut self, driver: Arc<dyn DeviceDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    fn freeze(mut self) -> Device {
        self.properties.sort_by(|a, b| a.name.cmp(&b.name));
        self.properties.dedup_by(|a, b| a.name == b.name);
        Device {
            code: self.code,
            family: self.family,
            name: self.name,
            alarm: self.alarm,
            properties: self.properties,
            driver: self.driver,
        }
    }
}

/// A frozen device description, shared read-only
pub struct Device {
    code: String,
    family: Option<u8>,
    name: String,
    alarm: bool,
    properties: Vec<Property>,
    driver: Option<Arc<dyn DeviceDriver>>,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("code", &self.code)
            .field("name", &self.name)
            .field("properties", &self.properties.len())
            .finish()
    }
}

impl Device {
    /// Directory name: hex family code, or the pseudo-device name
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn family(&self) -> Option<u8> {
        self.family
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_alarm_capable(&self) -> bool {
        self.alarm
    }

    /// Properties in name order
    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    pub fn property_at(&self, index: usize) -> Option<&Property> {
        self.properties.get(index)
    }

    /// Binary search by exact name
    pub fn find_property(&self, name: &str) -> Option<usize> {
        self.properties
            .binary_search_by(|p| p.name.as_str().cmp(name))
            .ok()
    }

    pub fn driver(&self) -> Option<&Arc<dyn DeviceDriver>> {
        self.driver.as_ref()
    }
}

/// Virtual directories holding pseudo-devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Namespace {
    Settings,
    System,
    Statistics,
    Interface,
}

impl Namespace {
    pub fn for_dir_type(dir_type: DirType) -> Option<Namespace> {
        match dir_type {
            DirType::Settings => Some(Namespace::Settings),
            DirType::System => Some(Namespace::System),
            DirType::Statistics => Some(Namespace::Statistics),
            DirType::Interface => Some(Namespace::Interface),
            DirType::Root | DirType::Real | DirType::Structure => None,
        }
    }
}

/// Collects device specs before freezing
#[derive(Debug)]
pub struct RegistryBuilder {
    real: BTreeMap<u8, DeviceSpec>,
    virtual_devices: BTreeMap<Namespace, BTreeMap<String, DeviceSpec>>,
    unknown: DeviceSpec,
    standard: Vec<Property>,
}

impl RegistryBuilder {
    /// `unknown` answers for family codes nothing else claims; `standard`
    /// properties are added to every real device and to `unknown`
    pub fn new(unknown: DeviceSpec, standard: Vec<Property>) -> Self {
        Self {
            real: BTreeMap::new(),
            virtual_devices: BTreeMap::new(),
            unknown,
            standard,
        }
    }

    /// Register a real device; a later registration for the same family wins
    pub fn register(mut self, spec: DeviceSpec) -> Self {
        if let Some(family) = spec.family {
            self.real.insert(family, spec);
        }
        self
    }

    pub fn register_virtual(mut self, namespace: Namespace, spec: DeviceSpec) -> Self {
        self.virtual_devices
            .entry(namespace)
            .or_default()
            .insert(spec.code.clone(), spec);
        self
    }

    pub fn build(self) -> Registry {
        let standard = self.standard;
        let with_standard = |spec: DeviceSpec| -> Arc<Device> {
            let spec = spec.properties(standard.iter().cloned());
            Arc::new(spec.freeze())
        };

        let real = self
            .real
            .into_iter()
            .map(|(family, spec)| (family, with_standard(spec)))
            .collect();
        let unknown = with_standard(self.unknown);
        let virtual_devices = self
            .virtual_devices
            .into_iter()
            .map(|(ns, specs)| {
                let frozen = specs
                    .into_iter()
                    .map(|(code, spec)| (code, Arc::new(spec.freeze())))
                    .collect();
                (ns, frozen)
            })
            .collect();

        Registry {
            real,
            virtual_devices,
            unknown,
        }
    }
}

/// The frozen device catalog
#[derive(Debug)]
pub struct Registry {
    real: BTreeMap<u8, Arc<Device>>,
    virtual_devices: BTreeMap<Namespace, BTreeMap<String, Arc<Device>>>,
    unknown: Arc<Device>,
}

impl Registry {
    /// Resolve a family code, trying the alarm-state complement before
    /// falling back to the unknown device
    pub fn find_family(&self, family: u8) -> &Arc<Device> {
        self.real
            .get(&family)
            .or_else(|| self.real.get(&(family ^ 0x80)))
            .unwrap_or(&self.unknown)
    }

    pub fn find_exact(&self, family: u8) -> Option<&Arc<Device>> {
        self.real.get(&family)
    }

    pub fn find_virtual(&self, namespace: Namespace, code: &str) -> Option<&Arc<Device>> {
        self.virtual_devices.get(&namespace)?.get(code)
    }

    pub fn unknown(&self) -> &Arc<Device> {
        &self.unknown
    }

    pub fn is_unknown(&self, device: &Arc<Device>) -> bool {
        Arc::ptr_eq(device, &self.unknown)
    }

    /// Real devices in family-code order
    pub fn real_devices(&self) -> impl Iterator<Item = &Arc<Device>> {
        self.real.values()
    }

    pub fn virtual_devices(&self, namespace: Namespace) -> impl Iterator<Item = &Arc<Device>> {
        self.virtual_devices
            .get(&namespace)
            .into_iter()
            .flat_map(|devices| devices.values())
    }

    pub fn any_alarm_capable(&self) -> bool {
        self.real.values().any(|d| d.is_alarm_capable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        RegistryBuilder::new(
            DeviceSpec::virtual_device("unknown", "Unknown"),
            vec![Property::new("address", Format::Ascii, 16)],
        )
        .register(
            DeviceSpec::real(0x29, "DS2408")
                .property(Property::new("sensed", Format::Bitfield, 1))
                .property(Property::new("PIO", Format::Bitfield, 1))
                .property(Property::new("latch", Format::Bitfield, 1)),
        )
        .register_virtual(
            Namespace::Settings,
            DeviceSpec::virtual_device("timeout", "timeout")
                .property(Property::new("volatile", Format::Unsigned, 12)),
        )
        .build()
    }

    #[test]
    fn test_properties_sorted_at_build() {
        let registry = registry();
        let device = registry.find_family(0x29);
        let names: Vec<_> = device.properties().iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["PIO", "address", "latch", "sensed"]);
        assert_eq!(device.find_property("latch"), Some(2));
        assert_eq!(device.find_property("nope"), None);
    }

    #[test]
    fn test_find_family_falls_back() {
        let registry = registry();
        assert_eq!(registry.find_family(0x29).name(), "DS2408");
        // alarm-state addressing flips the high bit
        assert_eq!(registry.find_family(0xA9).name(), "DS2408");
        assert!(registry.is_unknown(registry.find_family(0x42)));
        assert!(registry.find_family(0x42).find_property("address").is_some());
    }

    #[test]
    fn test_element_names() {
        let letters = Aggregate {
            elements: 30,
            numbering: Numbering::Letters,
            combination: Combination::Separate,
        };
        assert_eq!(letters.element_name(0), "A");
        assert_eq!(letters.element_name(25), "Z");
        assert_eq!(letters.element_name(26), "26");
        assert_eq!(letters.element_name(300), "300");

        let numbers = Aggregate {
            numbering: Numbering::Numbers,
            ..letters
        };
        assert_eq!(numbers.element_name(3), "3");
    }

    #[test]
    fn test_virtual_lookup() {
        let registry = registry();
        let timeout = registry.find_virtual(Namespace::Settings, "timeout").unwrap();
        assert!(timeout.find_property("volatile").is_some());
        assert!(timeout.find_property("address").is_none());
        assert!(registry.find_virtual(Namespace::System, "timeout").is_none());
    }

    #[test]
    fn test_file_length() {
        let pio = Property::new("PIO", Format::Bitfield, 1).array(
            8,
            Numbering::Numbers,
            Combination::Aggregate,
        );
        assert_eq!(pio.file_length(&Extension::All), 15);
        assert_eq!(pio.file_length(&Extension::Byte), 12);
        assert_eq!(pio.file_length(&Extension::Index(3)), 1);

        let pages = Property::new("pages/page", Format::Binary, 32).array(
            4,
            Numbering::Numbers,
            Combination::Separate,
        );
        assert_eq!(pages.file_length(&Extension::All), 128);
        assert_eq!(pages.subdir(), Some("pages"));
        assert_eq!(pages.leaf_name(), "page");
    }
}
