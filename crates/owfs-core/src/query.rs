//! The resolved form of a filesystem path

use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::address::Address;
use crate::registry::{Device, Property};
use crate::value::Encoding;

/// Longest accepted path, in bytes
pub const PATH_MAX: usize = 2048;

/// Which directory tree a query lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DirType {
    Root,
    Real,
    Settings,
    Statistics,
    System,
    Structure,
    Interface,
}

impl DirType {
    pub fn name(&self) -> &'static str {
        match self {
            DirType::Root => "",
            DirType::Real => "",
            DirType::Settings => "settings",
            DirType::Statistics => "statistics",
            DirType::System => "system",
            DirType::Structure => "structure",
            DirType::Interface => "interface",
        }
    }
}

/// Which element(s) of a property a query addresses
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Extension {
    /// Single element, or the whole value of a non-array property
    Index(usize),
    All,
    Byte,
    /// Literal extension of a sparse array
    Sparse(String),
}

impl Default for Extension {
    fn default() -> Self {
        Extension::Index(0)
    }
}

impl Extension {
    /// Numeric form used in structure listings
    pub fn structure_index(&self) -> i64 {
        match self {
            Extension::Index(i) => *i as i64,
            Extension::All => -1,
            Extension::Byte => -2,
            Extension::Sparse(_) => 0,
        }
    }
}

impl fmt::Display for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Extension::Index(i) => write!(f, "{}", i),
            Extension::All => write!(f, "ALL"),
            Extension::Byte => write!(f, "BYTE"),
            Extension::Sparse(text) => write!(f, "{}", text),
        }
    }
}

/// Port of a DS2409 hub
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Branch {
    Main,
    Aux,
}

impl Branch {
    pub fn name(&self) -> &'static str {
        match self {
            Branch::Main => "main",
            Branch::Aux => "aux",
        }
    }
}

/// One hop into a hub branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BranchHop {
    pub hub: Address,
    pub branch: Branch,
}

/// Orthogonal mode flags collected while parsing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryFlags {
    pub uncached: bool,
    pub alarm: bool,
    pub text: bool,
    pub json: bool,
    /// `bus.N` appeared in the path
    pub bus_explicit: bool,
    /// The bound bus is served by this process
    pub bus_local: bool,
}

/// A fully parsed path, valid for a single filesystem operation
#[derive(Debug, Clone)]
pub struct ResolvedQuery {
    pub path: String,
    /// Zero when no device was named
    pub address: Address,
    pub device: Option<Arc<Device>>,
    /// Index into `device.properties()`
    pub property: Option<usize>,
    pub extension: Extension,
    pub flags: QueryFlags,
    pub bus: Option<usize>,
    pub dir_type: DirType,
    pub branch: Vec<BranchHop>,
}

impl ResolvedQuery {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            address: Address::ZERO,
            device: None,
            property: None,
            extension: Extension::default(),
            flags: QueryFlags::default(),
            bus: None,
            dir_type: DirType::Root,
            branch: Vec::new(),
        }
    }

    pub fn property(&self) -> Option<&Property> {
        let device = self.device.as_ref()?;
        device.property_at(self.property?)
    }

    /// True unless the query names a regular file
    pub fn is_dir(&self) -> bool {
        match self.property() {
            None => true,
            Some(property) => property.is_directory(),
        }
    }

    /// A physical device is selected
    pub fn is_real_device(&self) -> bool {
        !self.address.is_zero()
    }

    pub fn encoding(&self) -> Encoding {
        if self.flags.json {
            Encoding::Json
        } else if self.flags.text {
            Encoding::Text
        } else {
            Encoding::Padded
        }
    }
}

impl PartialEq for ResolvedQuery {
    fn eq(&self, other: &Self) -> bool {
        let same_device = match (&self.device, &other.device) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        same_device
            && self.path == other.path
            && self.address == other.address
            && self.property == other.property
            && self.extension == other.extension
            && self.flags == other.flags
            && self.bus == other.bus
            && self.dir_type == other.dir_type
            && self.branch == other.branch
    }
}
