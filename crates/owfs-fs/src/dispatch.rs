//! Read and write dispatch
//!
//! A resolved query is turned into chip transactions according to how the
//! property's elements map onto the device:
//!
//! - scalars are one transaction
//! - aggregate arrays move as a whole; a single element is read-modify-write
//! - separate arrays take one transaction per element
//! - sparse arrays pass the literal extension straight to the driver
//! - mixed arrays move as a whole for `.ALL`/`.BYTE` and per element otherwise
//!
//! All transactions of one attempt run under a single bus lock. A failed
//! attempt is retried and, when the device turns out to have moved, restarted
//! on its new bus at most once.

use std::sync::Arc;

use owfs_core::{
    BusError, Combination, Device, DeviceDriver, DirType, ElementBuffer, EngineStat, Extension, FsError,
    Link, Property, ResolvedQuery, Source, TtlClass, ValueKey, Value, Volatility,
};
use tracing::{debug, warn};

use crate::context::Context;
use crate::virtuals;

/// Restarts on a different bus before giving up
const MAX_RELOCATIONS: usize = 1;
/// Extra attempts when the path pins the bus
const PINNED_RETRIES: usize = 1;
/// Extra attempts when the device is confirmed on the same bus
const SAME_BUS_RETRIES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

/// What to do after one attempt
#[derive(Debug)]
enum Outcome<T> {
    Success(T),
    RetrySameBus(FsError),
    RelocateAndRestart(usize),
    Fail(FsError),
}

/// Map a bus failure onto the filesystem error for `bus`
pub(crate) fn bus_failure(bus: Option<usize>, err: BusError) -> FsError {
    match (bus, err) {
        (_, BusError::InvalidValue(reason)) => FsError::InvalidInput(reason),
        (Some(bus), err) if err.is_connection() => FsError::Connection {
            bus,
            reason: err.to_string(),
        },
        (_, err) => FsError::Bus(err),
    }
}

/// The selected device and property index of a file query
pub(crate) fn selection(query: &ResolvedQuery) -> Result<(Arc<Device>, usize), FsError> {
    match (&query.device, query.property) {
        (Some(device), Some(index)) if device.property_at(index).is_some() => Ok((device.clone(), index)),
        _ => Err(FsError::is_directory(&query.path)),
    }
}

/// Read the decoded value a query names
pub fn read(ctx: &Context, query: &mut ResolvedQuery) -> Result<Value, FsError> {
    let (device, index) = selection(query)?;
    let Some(property) = device.property_at(index) else {
        return Err(FsError::is_directory(&query.path));
    };
    if property.is_directory() {
        return Err(FsError::is_directory(&query.path));
    }
    if query.dir_type == DirType::Structure {
        return Ok(Value::Text(virtuals::structure(property, &query.extension)));
    }
    if !property.readable() {
        return Err(FsError::unsupported(format!("{} is write-only", property.name())));
    }

    match property.source() {
        Source::Chip => read_chip(ctx, query, &device, property),
        _ => virtuals::read(ctx, query, &device, property),
    }
}

/// Write a decoded value to the property a query names
pub fn write(ctx: &Context, query: &mut ResolvedQuery, value: &Value) -> Result<(), FsError> {
    let (device, index) = selection(query)?;
    let Some(property) = device.property_at(index).filter(|p| !p.is_directory()) else {
        return Err(FsError::unsupported(format!("{} is a directory", query.path)));
    };
    if !property.is_writable() || query.dir_type == DirType::Structure {
        return Err(FsError::unsupported(format!("{} is read-only", property.name())));
    }

    match property.source() {
        Source::Chip => {
            let driver = driver(&device)?;
            let extension = query.extension.clone();
            relocating(ctx, query, Access::Write, |link| {
                write_elements(link, driver.as_ref(), property, &extension, value)
            })?;
            // every cached form of the property is stale now, not just this extension
            ctx.values().invalidate_property(&query.address, property.name());
            Ok(())
        }
        _ => virtuals::write(ctx, property, value),
    }
}

fn driver(device: &Device) -> Result<Arc<dyn DeviceDriver>, FsError> {
    device
        .driver()
        .cloned()
        .ok_or_else(|| FsError::unsupported(format!("no driver for {}", device.name())))
}

fn cache_class(query: &ResolvedQuery, property: &Property) -> Option<TtlClass> {
    if query.flags.uncached || property.combination() == Some(Combination::Sparse) {
        return None;
    }
    match property.volatility() {
        Volatility::Volatile => Some(TtlClass::Volatile),
        Volatility::Stable => Some(TtlClass::Stable),
        Volatility::Second | Volatility::Statistic => None,
    }
}

fn read_chip(
    ctx: &Context,
    query: &mut ResolvedQuery,
    device: &Device,
    property: &Property,
) -> Result<Value, FsError> {
    let driver = driver(device)?;
    let class = cache_class(query, property);
    let key = ValueKey {
        address: query.address,
        property: property.name().to_string(),
        extension: query.extension.clone(),
    };
    if let Some(class) = class {
        if let Some(value) = ctx.values().get(class, &key) {
            ctx.stats().incr(EngineStat::CacheHits);
            return Ok(value);
        }
        ctx.stats().incr(EngineStat::CacheMisses);
    }

    let extension = query.extension.clone();
    let value = relocating(ctx, query, Access::Read, |link| {
        read_elements(link, driver.as_ref(), property, &extension)
    })?;
    if let Some(class) = class {
        ctx.values().insert(class, key, value.clone());
    }
    Ok(value)
}

/// Run `op` against the query's device, following it across buses
fn relocating<T>(
    ctx: &Context,
    query: &mut ResolvedQuery,
    access: Access,
    mut op: impl FnMut(&mut dyn Link) -> Result<T, BusError>,
) -> Result<T, FsError> {
    let mut depth = 0;
    let mut retries = 0;
    loop {
        let bus = match query.bus {
            Some(bus) => bus,
            None => {
                let found = ctx
                    .scanner()
                    .check_presence(&query.address, &query.branch, None)
                    .ok_or(FsError::NotPresent(query.address))?;
                query.bus = Some(found);
                found
            }
        };

        let outcome = match transaction(ctx, bus, query, &mut op) {
            Ok(value) => Outcome::Success(value),
            Err(err) => next_step(ctx, query, bus, err, retries),
        };
        match outcome {
            Outcome::Success(value) => return Ok(value),
            Outcome::RetrySameBus(err) => {
                retries += 1;
                if access == Access::Write {
                    ctx.stats().incr(EngineStat::WriteRetries);
                }
                debug!(bus, address = %query.address, error = %err, retries, "retrying on the same bus");
            }
            Outcome::RelocateAndRestart(to) => {
                depth += 1;
                if depth > MAX_RELOCATIONS {
                    return Err(FsError::NoDevice(format!(
                        "{} keeps moving between buses",
                        query.address
                    )));
                }
                ctx.stats().incr(EngineStat::Relocations);
                warn!(address = %query.address, from = bus, to, "device moved, restarting on the new bus");
                query.bus = Some(to);
                retries = 0;
            }
            Outcome::Fail(err) => return Err(err),
        }
    }
}

fn next_step<T>(ctx: &Context, query: &ResolvedQuery, bus: usize, err: FsError, retries: usize) -> Outcome<T> {
    if !matches!(err, FsError::Bus(_) | FsError::Connection { .. }) {
        return Outcome::Fail(err);
    }
    if query.flags.bus_explicit {
        return if retries < PINNED_RETRIES {
            Outcome::RetrySameBus(err)
        } else {
            Outcome::Fail(err)
        };
    }

    match ctx.scanner().recheck_presence(&query.address, &query.branch, Some(bus)) {
        None => {
            ctx.values().invalidate_device(&query.address);
            match err {
                FsError::Connection { .. } => Outcome::Fail(err),
                _ => Outcome::Fail(FsError::NotPresent(query.address)),
            }
        }
        Some(found) if found != bus => Outcome::RelocateAndRestart(found),
        Some(_) if retries < SAME_BUS_RETRIES => Outcome::RetrySameBus(err),
        Some(_) => Outcome::Fail(err),
    }
}

/// One locked session with the device on `bus`
fn transaction<T>(
    ctx: &Context,
    bus: usize,
    query: &ResolvedQuery,
    op: &mut impl FnMut(&mut dyn Link) -> Result<T, BusError>,
) -> Result<T, FsError> {
    let master = ctx
        .bus(bus)
        .ok_or_else(|| FsError::NoDevice(format!("bus.{}", bus)))?;
    let address = query.address;
    let branch = query.branch.as_slice();
    master
        .transact(|guard| {
            let mut link = guard.link(address, branch);
            op(&mut link)
        })
        .map_err(|err| bus_failure(Some(bus), err))
}

fn protocol(property: &Property, what: impl std::fmt::Display) -> BusError {
    BusError::Protocol(format!("{}: {}", property.name(), what))
}

/// A value the property cannot hold
fn invalid(property: &Property, what: impl std::fmt::Display) -> BusError {
    BusError::InvalidValue(format!("{}: {}", property.name(), what))
}

/// The whole array of an aggregate property in one transaction
fn read_whole(link: &mut dyn Link, driver: &dyn DeviceDriver, property: &Property) -> Result<Vec<Value>, BusError> {
    let elements = property.elements();
    if property.is_bitfield() {
        let packed = driver.read(link, property, &Extension::Byte)?;
        let packed = packed
            .as_u64()
            .ok_or_else(|| protocol(property, "driver did not return a packed byte"))?;
        return Ok(Value::unpack_bits(packed, elements));
    }
    match driver.read(link, property, &Extension::All)? {
        Value::Array(values) if values.len() == elements => Ok(values),
        other => Err(protocol(property, format!("expected {} elements, got {:?}", elements, other))),
    }
}

fn write_whole(
    link: &mut dyn Link,
    driver: &dyn DeviceDriver,
    property: &Property,
    values: Vec<Value>,
) -> Result<(), BusError> {
    if property.is_bitfield() {
        let packed = Value::pack_bits(&values).ok_or_else(|| invalid(property, "bits must be 0 or 1"))?;
        return driver.write(link, property, &Extension::Byte, &Value::Unsigned(packed));
    }
    driver.write(link, property, &Extension::All, &Value::Array(values))
}

fn read_each(link: &mut dyn Link, driver: &dyn DeviceDriver, property: &Property) -> Result<Vec<Value>, BusError> {
    let mut values = Vec::with_capacity(property.elements());
    for i in 0..property.elements() {
        values.push(driver.read(link, property, &Extension::Index(i))?);
    }
    Ok(values)
}

fn read_elements(
    link: &mut dyn Link,
    driver: &dyn DeviceDriver,
    property: &Property,
    extension: &Extension,
) -> Result<Value, BusError> {
    let Some(combination) = property.combination() else {
        return driver.read(link, property, &Extension::Index(0));
    };
    match (combination, extension) {
        (Combination::Sparse, _) | (Combination::Separate | Combination::Mixed, Extension::Index(_)) => {
            driver.read(link, property, extension)
        }
        (_, Extension::Sparse(_)) => Err(protocol(property, "sparse extension on a dense array")),
        (Combination::Separate, Extension::All) => Ok(Value::Array(read_each(link, driver, property)?)),
        (Combination::Separate, Extension::Byte) => {
            let bits = read_each(link, driver, property)?;
            let packed = Value::pack_bits(&bits).ok_or_else(|| protocol(property, "element is not a bit"))?;
            Ok(Value::Unsigned(packed))
        }
        (Combination::Aggregate | Combination::Mixed, extension) => {
            let mut whole = read_whole(link, driver, property)?;
            match extension {
                Extension::All => Ok(Value::Array(whole)),
                Extension::Byte => Value::pack_bits(&whole)
                    .map(Value::Unsigned)
                    .ok_or_else(|| protocol(property, "element is not a bit")),
                Extension::Index(i) if *i < whole.len() => Ok(whole.swap_remove(*i)),
                other => Err(protocol(property, format!("no element {}", other))),
            }
        }
    }
}

fn elements<'v>(property: &Property, value: &'v Value) -> Result<&'v [Value], BusError> {
    value
        .as_array()
        .filter(|values| values.len() == property.elements())
        .ok_or_else(|| invalid(property, format!("expected {} elements", property.elements())))
}

/// A packed bitfield that fits the array's width
fn packed(property: &Property, value: &Value) -> Result<u64, BusError> {
    let packed = value
        .as_u64()
        .ok_or_else(|| invalid(property, "expected a packed number"))?;
    let limit = u32::try_from(property.elements())
        .ok()
        .and_then(|bits| 1u64.checked_shl(bits));
    match limit {
        Some(limit) if packed >= limit => Err(invalid(
            property,
            format!("{} does not fit in {} bits", packed, property.elements()),
        )),
        _ => Ok(packed),
    }
}

fn write_elements(
    link: &mut dyn Link,
    driver: &dyn DeviceDriver,
    property: &Property,
    extension: &Extension,
    value: &Value,
) -> Result<(), BusError> {
    let Some(combination) = property.combination() else {
        return driver.write(link, property, &Extension::Index(0), value);
    };
    match (combination, extension) {
        (Combination::Sparse, _) | (Combination::Separate | Combination::Mixed, Extension::Index(_)) => {
            driver.write(link, property, extension, value)
        }
        (_, Extension::Sparse(_)) => Err(protocol(property, "sparse extension on a dense array")),
        (Combination::Separate, Extension::All) => {
            for (i, element) in elements(property, value)?.iter().enumerate() {
                driver.write(link, property, &Extension::Index(i), element)?;
            }
            Ok(())
        }
        (Combination::Separate, Extension::Byte) => {
            let bits = Value::unpack_bits(packed(property, value)?, property.elements());
            for (i, bit) in bits.iter().enumerate() {
                driver.write(link, property, &Extension::Index(i), bit)?;
            }
            Ok(())
        }
        (Combination::Aggregate | Combination::Mixed, Extension::Byte) => {
            driver.write(link, property, &Extension::Byte, &Value::Unsigned(packed(property, value)?))
        }
        (Combination::Aggregate | Combination::Mixed, Extension::All) => {
            write_whole(link, driver, property, elements(property, value)?.to_vec())
        }
        (Combination::Aggregate, Extension::Index(i)) => {
            let mut whole = read_whole(link, driver, property)?;
            splice(property, &mut whole, *i, value)?;
            write_whole(link, driver, property, whole)
        }
    }
}

/// Replace element `index` of a whole array read from the device
fn splice(property: &Property, whole: &mut Vec<Value>, index: usize, value: &Value) -> Result<(), BusError> {
    if index >= whole.len() {
        return Err(invalid(property, format!("no element {}", index)));
    }
    if !property.format().is_variable_length() {
        whole[index] = value.clone();
        return Ok(());
    }

    let raw: &[u8] = match value {
        Value::Text(text) => text.as_bytes(),
        Value::Bytes(bytes) => bytes,
        other => return Err(invalid(property, format!("cannot splice {:?}", other))),
    };
    let format = property.format();
    let mut buffer = ElementBuffer::from_values(format, whole).map_err(|err| protocol(property, err))?;
    buffer.splice(index, raw).map_err(|err| invalid(property, err))?;
    *whole = buffer.into_values(format).map_err(|err| protocol(property, err))?;
    Ok(())
}
