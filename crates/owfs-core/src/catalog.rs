//! Built-in device catalog
//!
//! Real devices, the unknown-device placeholder, the standard properties
//! every real device exposes, and the pseudo-devices of the virtual
//! directories.

use std::sync::Arc;

use crate::devices::{ds18b20, ds2408, ds2413, ds2431, Ds18b20, Ds2408, Ds2413, Ds2431};
use crate::query::Branch;
use crate::registry::{
    Combination, DeviceSpec, Format, InterfaceItem, Namespace, Numbering, Property, Registry,
    RegistryBuilder, Setting, Source, Standard, StatisticItem, SystemItem, Visibility, Volatility,
};
use crate::stats::{BusStat, EngineStat};

pub const DS2401_FAMILY: u8 = 0x01;
pub const DS2409_FAMILY: u8 = 0x1F;

/// Address-derived properties added to every real device
pub fn standard_properties() -> Vec<Property> {
    let item = |name: &str, format: Format, length: usize, standard: Standard| {
        Property::new(name, format, length).with_source(Source::Standard(standard))
    };
    vec![
        item("address", Format::Ascii, 16, Standard::Address),
        item("r_address", Format::Ascii, 16, Standard::RAddress),
        item("id", Format::Ascii, 12, Standard::Id),
        item("r_id", Format::Ascii, 12, Standard::RId),
        item("crc8", Format::Ascii, 2, Standard::Crc8),
        item("family", Format::Ascii, 2, Standard::Family),
        item("type", Format::Ascii, 32, Standard::Type),
        item("present", Format::Boolean, 1, Standard::Present).volatile(),
    ]
}

pub fn unknown_device() -> DeviceSpec {
    DeviceSpec::virtual_device("unknown", "Unknown")
}

pub fn ds2401() -> DeviceSpec {
    DeviceSpec::real(DS2401_FAMILY, "DS2401")
}

pub fn ds2409() -> DeviceSpec {
    DeviceSpec::real(DS2409_FAMILY, "DS2409")
        .property(Property::directory("main", Source::Branch(Branch::Main)))
        .property(Property::directory("aux", Source::Branch(Branch::Aux)))
}

pub fn ds18b20() -> DeviceSpec {
    DeviceSpec::real(ds18b20::FAMILY, "DS18B20")
        .alarm_capable()
        .driver(Arc::new(Ds18b20))
        .property(Property::new("temperature", Format::Temperature, 12).volatile())
        .property(Property::new("temphigh", Format::Temperature, 12).writable())
        .property(Property::new("templow", Format::Temperature, 12).writable())
        .property(Property::new("power", Format::Boolean, 1))
}

pub fn ds2408() -> DeviceSpec {
    DeviceSpec::real(ds2408::FAMILY, "DS2408")
        .alarm_capable()
        .driver(Arc::new(Ds2408))
        .property(
            Property::new("PIO", Format::Bitfield, 1)
                .array(8, Numbering::Numbers, Combination::Aggregate)
                .writable(),
        )
        .property(
            Property::new("sensed", Format::Bitfield, 1)
                .array(8, Numbering::Numbers, Combination::Aggregate)
                .volatile(),
        )
        .property(
            Property::new("latch", Format::Bitfield, 1)
                .array(8, Numbering::Numbers, Combination::Separate)
                .writable()
                .volatile(),
        )
        .property(Property::new("por", Format::Boolean, 1).writable().volatile())
        .property(Property::new("power", Format::Boolean, 1).volatile())
}

pub fn ds2413() -> DeviceSpec {
    DeviceSpec::real(ds2413::FAMILY, "DS2413")
        .driver(Arc::new(Ds2413))
        .property(
            Property::new("PIO", Format::Bitfield, 1)
                .array(2, Numbering::Letters, Combination::Aggregate)
                .writable(),
        )
        .property(
            Property::new("sensed", Format::Bitfield, 1)
                .array(2, Numbering::Letters, Combination::Aggregate)
                .volatile(),
        )
}

pub fn ds2431() -> DeviceSpec {
    DeviceSpec::real(ds2431::FAMILY, "DS2431")
        .driver(Arc::new(Ds2431))
        .property(Property::new("memory", Format::Binary, ds2431::MEMORY_SIZE).writable())
        .property(Property::subdirectory("pages"))
        .property(
            Property::new("pages/page", Format::Binary, ds2431::PAGE_SIZE)
                .array(
                    ds2431::MEMORY_SIZE / ds2431::PAGE_SIZE,
                    Numbering::Numbers,
                    Combination::Separate,
                )
                .writable(),
        )
}

fn settings_devices() -> Vec<DeviceSpec> {
    let timeout = |name: &str, setting: Setting| {
        Property::new(name, Format::Unsigned, 12)
            .writable()
            .with_source(Source::Setting(setting))
    };
    vec![
        DeviceSpec::virtual_device("timeout", "timeout")
            .property(timeout("volatile", Setting::TimeoutVolatile))
            .property(timeout("stable", Setting::TimeoutStable))
            .property(timeout("directory", Setting::TimeoutDirectory))
            .property(timeout("presence", Setting::TimeoutPresence)),
        DeviceSpec::virtual_device("units", "units").property(
            Property::new("temperature_scale", Format::Ascii, 1)
                .writable()
                .with_source(Source::Setting(Setting::TemperatureScale)),
        ),
    ]
}

fn system_devices() -> Vec<DeviceSpec> {
    let item = |name: &str, format: Format, length: usize, item: SystemItem| {
        Property::new(name, format, length).with_source(Source::System(item))
    };
    vec![
        DeviceSpec::virtual_device("process", "process")
            .property(item("pid", Format::Unsigned, 12, SystemItem::Pid))
            .property(
                item("uptime", Format::Unsigned, 12, SystemItem::Uptime)
                    .with_volatility(Volatility::Second),
            ),
        DeviceSpec::virtual_device("configuration", "configuration")
            .property(item("version", Format::Ascii, 16, SystemItem::Version))
            .property(item("buses", Format::Unsigned, 12, SystemItem::BusCount)),
    ]
}

fn statistics_devices() -> Vec<DeviceSpec> {
    let counter = |name: &str, item: StatisticItem| {
        Property::new(name, Format::Unsigned, 12)
            .with_volatility(Volatility::Statistic)
            .with_source(Source::Statistic(item))
    };
    let engine = |name: &str, stat: EngineStat| counter(name, StatisticItem::Engine(stat));
    vec![
        DeviceSpec::virtual_device("cache", "cache")
            .property(engine("hits", EngineStat::CacheHits))
            .property(engine("misses", EngineStat::CacheMisses)),
        DeviceSpec::virtual_device("read", "read")
            .property(engine("calls", EngineStat::Reads))
            .property(engine("errors", EngineStat::ReadErrors))
            .property(engine("bytes", EngineStat::ReadBytes)),
        DeviceSpec::virtual_device("write", "write")
            .property(engine("calls", EngineStat::Writes))
            .property(engine("errors", EngineStat::WriteErrors))
            .property(engine("bytes", EngineStat::WriteBytes))
            .property(engine("retries", EngineStat::WriteRetries))
            .property(engine("relocations", EngineStat::Relocations)),
        DeviceSpec::virtual_device("directory", "directory")
            .property(engine("scans", EngineStat::DirectoryScans)),
        DeviceSpec::virtual_device("bus", "bus").properties(
            BusStat::ALL
                .iter()
                .map(|stat| counter(stat.name(), StatisticItem::BusTotal(*stat))),
        ),
    ]
}

fn interface_devices() -> Vec<DeviceSpec> {
    let item = |name: &str, format: Format, length: usize, item: InterfaceItem| {
        Property::new(name, format, length).with_source(Source::Interface(item))
    };
    vec![
        DeviceSpec::virtual_device("settings", "settings")
            .property(item("name", Format::Ascii, 32, InterfaceItem::Name))
            .property(item("adapter", Format::Ascii, 16, InterfaceItem::Adapter))
            .property(
                item("channel", Format::Unsigned, 12, InterfaceItem::Channel)
                    .with_visibility(Visibility::MultiChannel),
            )
            .property(
                item("reconnect_state", Format::Ascii, 8, InterfaceItem::ReconnectState)
                    .volatile(),
            ),
        DeviceSpec::virtual_device("statistics", "statistics").properties(BusStat::ALL.iter().map(
            |stat| {
                item(stat.name(), Format::Unsigned, 12, InterfaceItem::Stat(*stat))
                    .with_volatility(Volatility::Statistic)
            },
        )),
    ]
}

/// Registry builder preloaded with the standard catalog
pub fn builder() -> RegistryBuilder {
    let mut builder = RegistryBuilder::new(unknown_device(), standard_properties())
        .register(ds2401())
        .register(ds2409())
        .register(ds18b20())
        .register(ds2408())
        .register(ds2431())
        .register(ds2413());

    let namespaces = [
        (Namespace::Settings, settings_devices()),
        (Namespace::System, system_devices()),
        (Namespace::Statistics, statistics_devices()),
        (Namespace::Interface, interface_devices()),
    ];
    for (namespace, devices) in namespaces {
        for device in devices {
            builder = builder.register_virtual(namespace, device);
        }
    }
    builder
}

/// The standard catalog, frozen
pub fn registry() -> Registry {
    builder().build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_families() {
        let registry = registry();
        let families: Vec<_> = registry
            .real_devices()
            .filter_map(|d| d.family())
            .collect();
        assert_eq!(families, vec![0x01, 0x1F, 0x28, 0x29, 0x2D, 0x3A]);
        assert!(registry.any_alarm_capable());
    }

    #[test]
    fn test_every_real_device_has_standard_properties() {
        let registry = registry();
        for device in registry.real_devices() {
            for name in ["address", "crc8", "family", "id", "present", "type"] {
                assert!(device.find_property(name).is_some(), "{} lacks {}", device.name(), name);
            }
        }
    }

    #[test]
    fn test_subdirectory_marker_precedes_members() {
        let registry = registry();
        let eeprom = registry.find_family(ds2431::FAMILY);
        let marker = eeprom.find_property("pages").unwrap();
        let member = eeprom.find_property("pages/page").unwrap();
        assert!(marker < member);
        assert!(eeprom.property_at(marker).unwrap().is_directory());
    }

    #[test]
    fn test_virtual_namespaces_populated() {
        let registry = registry();
        assert!(registry.find_virtual(Namespace::Settings, "timeout").is_some());
        assert!(registry.find_virtual(Namespace::System, "process").is_some());
        let bus = registry.find_virtual(Namespace::Statistics, "bus").unwrap();
        assert_eq!(bus.properties().len(), BusStat::ALL.len());
        let stats = registry.find_virtual(Namespace::Interface, "statistics").unwrap();
        assert!(stats.find_property("search_errors2").is_some());
    }
}
