//! Directory listings
//!
//! Bus directories list device addresses from the scanner, device
//! directories list their properties with one entry per addressable
//! element, and the virtual trees list their pseudo-devices.

use owfs_core::{Combination, Device, DirType, Format, FsError, Namespace, Numbering, Property, ResolvedQuery, Visibility};
use owfs_discovery::ScanMode;
use tracing::debug;

use crate::context::Context;
use crate::dispatch::bus_failure;

/// Entry names of the directory a query names
pub fn list(ctx: &Context, query: &ResolvedQuery) -> Result<Vec<String>, FsError> {
    if !query.is_dir() {
        return Err(FsError::not_directory(&query.path));
    }

    if let Some(device) = &query.device {
        return Ok(match query.property() {
            Some(property) if property.format() == Format::Subdirectory => {
                properties(ctx, query, device, Some(property.name()))
            }
            // a hub port seen from the structure tree
            Some(_) => Vec::new(),
            None => properties(ctx, query, device, None),
        });
    }

    match query.dir_type {
        DirType::Structure => Ok(ctx
            .registry()
            .real_devices()
            .map(|device| device.code().to_string())
            .collect()),
        DirType::Root | DirType::Real => devices(ctx, query),
        dir_type => Ok(Namespace::for_dir_type(dir_type)
            .into_iter()
            .flat_map(|namespace| ctx.registry().virtual_devices(namespace))
            .map(|device| device.code().to_string())
            .collect()),
    }
}

fn devices(ctx: &Context, query: &ResolvedQuery) -> Result<Vec<String>, FsError> {
    let mode = if query.flags.alarm {
        ScanMode::Alarm
    } else if query.flags.uncached {
        ScanMode::Direct
    } else {
        ScanMode::Cached
    };
    let bus = if query.flags.bus_explicit || !query.branch.is_empty() {
        query.bus
    } else {
        None
    };

    let addresses = ctx
        .scanner()
        .list(bus, &query.branch, mode)
        .map_err(|err| bus_failure(bus, err))?;
    let mut entries: Vec<String> = addresses.iter().map(|address| address.to_string()).collect();
    debug!(path = %query.path, ?bus, ?mode, devices = entries.len(), "listed devices");

    if query.branch.is_empty() && !query.flags.alarm {
        let alarm = ctx.registry().any_alarm_capable();
        if query.flags.bus_explicit {
            entries.push("interface".to_string());
            if alarm {
                entries.push("alarm".to_string());
            }
        } else {
            if alarm {
                entries.push("alarm".to_string());
            }
            entries.extend((0..ctx.buses().len()).map(|i| format!("bus.{}", i)));
            for dir in [DirType::Settings, DirType::Statistics, DirType::Structure, DirType::System] {
                entries.push(dir.name().to_string());
            }
            if !query.flags.uncached {
                entries.push("uncached".to_string());
            }
        }
    }
    Ok(entries)
}

fn visible(ctx: &Context, query: &ResolvedQuery, property: &Property) -> bool {
    match property.visibility() {
        Visibility::Always => true,
        Visibility::Hidden => false,
        Visibility::MultiChannel => query
            .bus
            .and_then(|bus| ctx.bus(bus))
            .is_some_and(|master| master.channels() > 1),
    }
}

/// Properties of `device` directly inside `subdir`
fn properties(ctx: &Context, query: &ResolvedQuery, device: &Device, subdir: Option<&str>) -> Vec<String> {
    // the structure tree shows everything, one element per array
    let structure = query.dir_type == DirType::Structure;

    let mut entries = Vec::new();
    for property in device.properties() {
        if property.subdir() != subdir || (!structure && !visible(ctx, query, property)) {
            continue;
        }
        let leaf = property.leaf_name();
        let Some(aggregate) = property.aggregate() else {
            entries.push(leaf.to_string());
            continue;
        };
        if aggregate.combination == Combination::Sparse {
            let sample = match aggregate.numbering {
                Numbering::Letters => "xxx",
                Numbering::Numbers => "000",
            };
            entries.push(format!("{}.{}", leaf, sample));
            continue;
        }

        if property.is_bitfield() {
            entries.push(format!("{}.BYTE", leaf));
        }
        entries.push(format!("{}.ALL", leaf));
        let shown = if structure {
            aggregate.elements.min(1)
        } else {
            aggregate.elements
        };
        entries.extend((0..shown).map(|i| format!("{}.{}", leaf, aggregate.element_name(i))));
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::testing::{context, eeprom, hub, switch8, thermometer};
    use owfs_bus::{Chip, SimDevice, SimulatedBus};
    use owfs_core::Branch;

    fn listing(ctx: &Context, path: &str) -> Vec<String> {
        let query = parse(ctx, path).unwrap();
        list(ctx, &query).unwrap()
    }

    fn bus() -> SimulatedBus {
        SimulatedBus::with_devices([
            SimDevice::new(thermometer(), Chip::thermometer(20.0)),
            SimDevice::new(switch8(), Chip::switch8()),
            SimDevice::new(eeprom(), Chip::eeprom()),
        ])
    }

    #[test]
    fn test_root_listing() {
        let (ctx, _) = context(&[bus()]);
        let entries = listing(&ctx, "/");
        for expected in [
            thermometer().to_string(),
            switch8().to_string(),
            "alarm".to_string(),
            "bus.0".to_string(),
            "settings".to_string(),
            "statistics".to_string(),
            "structure".to_string(),
            "system".to_string(),
            "uncached".to_string(),
        ] {
            assert!(entries.contains(&expected), "{} missing from {:?}", expected, entries);
        }
        assert!(!entries.contains(&"interface".to_string()));

        let uncached = listing(&ctx, "/uncached");
        assert!(!uncached.contains(&"uncached".to_string()));
        assert!(uncached.contains(&thermometer().to_string()));
    }

    #[test]
    fn test_explicit_bus_listing() {
        let (ctx, _) = context(&[bus(), SimulatedBus::new()]);
        let entries = listing(&ctx, "/bus.0");
        assert!(entries.contains(&switch8().to_string()));
        assert!(entries.contains(&"interface".to_string()));
        assert!(entries.contains(&"alarm".to_string()));
        assert!(!entries.contains(&"settings".to_string()));

        let empty = listing(&ctx, "/bus.1");
        assert_eq!(empty, vec!["interface".to_string(), "alarm".to_string()]);
    }

    #[test]
    fn test_device_listing_expands_arrays() {
        let (ctx, _) = context(&[bus()]);
        let entries = listing(&ctx, &format!("/{}", switch8()));
        for expected in ["PIO.BYTE", "PIO.ALL", "PIO.0", "PIO.7", "latch.BYTE", "address", "present", "por"] {
            assert!(entries.iter().any(|e| e == expected), "{} missing from {:?}", expected, entries);
        }
        assert!(!entries.iter().any(|e| e == "PIO.8"));
    }

    #[test]
    fn test_subdirectory_listing() {
        let (ctx, _) = context(&[bus()]);
        let top = listing(&ctx, &format!("/{}", eeprom()));
        assert!(top.contains(&"pages".to_string()));
        assert!(top.contains(&"memory".to_string()));
        assert!(!top.iter().any(|e| e.starts_with("page.")));

        let pages = listing(&ctx, &format!("/{}/pages", eeprom()));
        assert_eq!(pages, vec!["page.ALL", "page.0", "page.1", "page.2", "page.3"]);
    }

    #[test]
    fn test_structure_listing() {
        let (ctx, _) = context(&[bus()]);
        let families = listing(&ctx, "/structure");
        assert!(families.contains(&"28".to_string()));
        assert!(families.contains(&"29".to_string()));

        let entries = listing(&ctx, "/structure/29");
        assert!(entries.contains(&"PIO.ALL".to_string()));
        assert!(entries.contains(&"PIO.BYTE".to_string()));
        assert!(entries.contains(&"PIO.0".to_string()));
        assert!(!entries.contains(&"PIO.1".to_string()));
    }

    #[test]
    fn test_virtual_listings() {
        let (ctx, _) = context(&[bus()]);
        assert_eq!(listing(&ctx, "/settings"), vec!["timeout", "units"]);
        assert_eq!(
            listing(&ctx, "/settings/timeout"),
            vec!["directory", "presence", "stable", "volatile"]
        );

        let interface = listing(&ctx, "/bus.0/interface/settings");
        assert!(interface.contains(&"name".to_string()));
        assert!(interface.contains(&"reconnect_state".to_string()));
        // single-channel adapter
        assert!(!interface.contains(&"channel".to_string()));
    }

    #[test]
    fn test_alarm_listing() {
        let sim = SimulatedBus::with_devices([
            SimDevice::new(thermometer(), Chip::thermometer(20.0)).alarmed(),
            SimDevice::new(switch8(), Chip::switch8()),
        ]);
        let (ctx, _) = context(&[sim]);
        assert_eq!(listing(&ctx, "/alarm"), vec![thermometer().to_string()]);
    }

    #[test]
    fn test_hub_branch_listing() {
        let sim = SimulatedBus::with_devices([
            SimDevice::new(hub(), Chip::Hub),
            SimDevice::new(thermometer(), Chip::thermometer(21.0)).on_branch(hub(), Branch::Main),
        ]);
        let (ctx, _) = context(&[sim]);

        let hub_entries = listing(&ctx, &format!("/{}", hub()));
        assert!(hub_entries.contains(&"main".to_string()));
        assert!(hub_entries.contains(&"aux".to_string()));

        assert!(listing(&ctx, &format!("/{}/main", hub())).contains(&thermometer().to_string()));
        assert!(!listing(&ctx, &format!("/{}/aux", hub())).contains(&thermometer().to_string()));
    }

    #[test]
    fn test_file_is_not_a_directory() {
        let (ctx, _) = context(&[bus()]);
        let query = parse(&ctx, &format!("/{}/temperature", thermometer())).unwrap();
        assert!(matches!(list(&ctx, &query), Err(FsError::NotDirectory(_))));
    }
}
