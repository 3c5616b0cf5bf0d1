//! Properties that are not chip transactions
//!
//! Standard properties come from the address, settings from the live
//! context, and the system, statistics and interface trees from the
//! process and its bus masters.

use owfs_core::registry::{InterfaceItem, Setting, Standard, StatisticItem, SystemItem};
use owfs_core::{Device, Extension, FsError, Property, ResolvedQuery, Source, TemperatureScale, TtlClass, Value};
use owfs_discovery::sense;
use tracing::info;

use crate::context::Context;
use crate::dispatch::bus_failure;

pub(crate) fn read(
    ctx: &Context,
    query: &ResolvedQuery,
    device: &Device,
    property: &Property,
) -> Result<Value, FsError> {
    match property.source() {
        Source::Standard(item) => standard(ctx, query, device, item),
        Source::Setting(setting) => Ok(read_setting(ctx, setting)),
        Source::System(item) => Ok(system(ctx, item)),
        Source::Statistic(item) => Ok(statistic(ctx, item)),
        Source::Interface(item) => interface(ctx, query, item),
        Source::Chip | Source::Branch(_) => Err(FsError::unsupported(property.name())),
    }
}

pub(crate) fn write(ctx: &Context, property: &Property, value: &Value) -> Result<(), FsError> {
    match property.source() {
        Source::Setting(setting) => write_setting(ctx, setting, value),
        _ => Err(FsError::unsupported(format!("{} is read-only", property.name()))),
    }
}

/// `format,extension,elements,access,length,volatility,`
pub(crate) fn structure(property: &Property, extension: &Extension) -> String {
    let access = match (property.readable(), property.is_writable()) {
        (true, true) => "rw",
        (true, false) => "ro",
        (false, true) => "wo",
        (false, false) => "oo",
    };
    format!(
        "{},{:06},{:06},{},{:06},{},",
        property.format().tag(),
        extension.structure_index(),
        property.elements(),
        access,
        property.file_length(extension),
        property.volatility().tag()
    )
}

fn standard(ctx: &Context, query: &ResolvedQuery, device: &Device, item: Standard) -> Result<Value, FsError> {
    let address = query.address;
    let value = match item {
        Standard::Address => Value::Text(address.to_hex()),
        Standard::RAddress => Value::Text(address.to_reverse_hex()),
        Standard::Id => Value::Text(address.id_hex()),
        Standard::RId => {
            let mut id = address.id();
            id.reverse();
            Value::Text(hex::encode_upper(id))
        }
        Standard::Crc8 => Value::Text(format!("{:02X}", address.crc())),
        Standard::Family => Value::Text(format!("{:02X}", address.family())),
        Standard::Type => Value::Text(device.name().to_string()),
        Standard::Present => Value::Boolean(present(ctx, query)?),
    };
    Ok(value)
}

/// Ask the wire rather than trusting the presence cache
fn present(ctx: &Context, query: &ResolvedQuery) -> Result<bool, FsError> {
    match query.bus.and_then(|bus| ctx.bus(bus)) {
        Some(master) => sense(master, &query.address, &query.branch)
            .map_err(|err| bus_failure(Some(master.index()), err)),
        None => Ok(ctx
            .scanner()
            .check_presence(&query.address, &query.branch, None)
            .is_some()),
    }
}

fn timeout_class(setting: Setting) -> Option<TtlClass> {
    match setting {
        Setting::TimeoutVolatile => Some(TtlClass::Volatile),
        Setting::TimeoutStable => Some(TtlClass::Stable),
        Setting::TimeoutDirectory => Some(TtlClass::Directory),
        Setting::TimeoutPresence => Some(TtlClass::Presence),
        Setting::TemperatureScale => None,
    }
}

fn read_setting(ctx: &Context, setting: Setting) -> Value {
    match timeout_class(setting) {
        Some(class) => Value::Unsigned(ctx.timeouts().seconds(class)),
        None => Value::Text(ctx.scale().letter().to_string()),
    }
}

fn write_setting(ctx: &Context, setting: Setting, value: &Value) -> Result<(), FsError> {
    match timeout_class(setting) {
        Some(class) => {
            let seconds = value
                .as_u64()
                .ok_or_else(|| FsError::invalid_input("timeout must be a whole number of seconds"))?;
            ctx.timeouts().set(class, seconds);
            info!(class = ?class, seconds, "timeout changed");
        }
        None => {
            let text = match value {
                Value::Text(text) => text,
                _ => return Err(FsError::invalid_input("temperature scale must be C, F, K or R")),
            };
            let scale: TemperatureScale = text.parse().map_err(FsError::invalid_input)?;
            ctx.set_scale(scale);
            info!(scale = %scale, "temperature scale changed");
        }
    }
    Ok(())
}

fn system(ctx: &Context, item: SystemItem) -> Value {
    match item {
        SystemItem::Pid => Value::Unsigned(std::process::id() as u64),
        SystemItem::Uptime => Value::Unsigned(ctx.uptime().as_secs()),
        SystemItem::Version => Value::Text(ctx.version().to_string()),
        SystemItem::BusCount => Value::Unsigned(ctx.buses().len() as u64),
    }
}

fn statistic(ctx: &Context, item: StatisticItem) -> Value {
    match item {
        StatisticItem::Engine(stat) => Value::Unsigned(ctx.stats().get(stat)),
        StatisticItem::BusTotal(stat) => {
            Value::Unsigned(ctx.buses().iter().map(|master| master.stats().get(stat)).sum())
        }
    }
}

fn interface(ctx: &Context, query: &ResolvedQuery, item: InterfaceItem) -> Result<Value, FsError> {
    let master = query
        .bus
        .and_then(|bus| ctx.bus(bus))
        .ok_or_else(|| FsError::NoDevice("interface without a bus".to_string()))?;
    let value = match item {
        InterfaceItem::Name => Value::Text(master.name().to_string()),
        InterfaceItem::Adapter => Value::Text(master.kind().to_string()),
        InterfaceItem::Channel => Value::Unsigned(master.channel() as u64),
        InterfaceItem::ReconnectState => Value::Text(master.reconnect_state().name().to_string()),
        InterfaceItem::Stat(stat) => Value::Unsigned(master.stats().get(stat)),
    };
    Ok(value)
}
