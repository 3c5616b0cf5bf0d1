//! owfs Core - Core types, device registry and caches for the 1-Wire filesystem
//!
//! This crate provides the foundational types shared by every layer:
//! - ROM addresses with CRC8/CRC16 checksums
//! - The device registry (devices, typed properties, aggregates), frozen after startup
//! - Built-in device catalog and chip drivers behind the [`Link`] boundary
//! - Property values with their text and JSON encodings
//! - Resolved queries, TTL caches and the error taxonomy

pub mod address;
pub mod cache;
pub mod catalog;
pub mod codec;
pub mod crc;
pub mod devices;
pub mod error;
pub mod link;
pub mod query;
pub mod registry;
pub mod stats;
pub mod value;

pub use address::{Address, AddressError};
pub use cache::{
    Clock, DirBlob, DirKey, DirectoryCache, ManualClock, PresenceCache, SystemClock, Timeouts,
    TtlCache, TtlClass, ValueCache, ValueKey,
};
pub use codec::{CodecError, CodecOptions, ElementBuffer};
pub use error::{BusError, FsError, ParseError};
pub use link::{DeviceDriver, Link};
pub use query::{Branch, BranchHop, DirType, Extension, QueryFlags, ResolvedQuery, PATH_MAX};
pub use registry::{
    Aggregate, Combination, Device, DeviceSpec, Format, Namespace, Numbering, Property, Registry,
    RegistryBuilder, Source, Visibility, Volatility,
};
pub use stats::{BusStat, BusStats, EngineStat, EngineStats};
pub use value::{Encoding, TemperatureScale, Value};
