//! Error taxonomy shared by every layer
//!
//! `ParseError` covers malformed paths, `BusError` covers anything that went
//! wrong on the wire, and `FsError` is what the filesystem callbacks return.
//! `FsError::errno` gives the code handed back across the kernel boundary.

use thiserror::Error;

use crate::address::{Address, AddressError};

/// Failures while turning a path into a query
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("path too long ({0} bytes)")]
    PathTooLong(usize),
    #[error("path is empty or contains a null byte")]
    UnexpectedNull,
    #[error("bus selector may only appear once, before any device")]
    NestedBusSelector,
    #[error("no such bus: bus.{0}")]
    UnknownBusIndex(usize),
    #[error("invalid device checksum in {0}")]
    InvalidDeviceChecksum(String),
    #[error("not a device address: {0}")]
    InvalidAddress(String),
    #[error("no such device: {0}")]
    UnknownDevice(String),
    #[error("no such property: {0}")]
    UnknownProperty(String),
    #[error("array property {0} needs an extension")]
    MissingExtension(String),
    #[error("property {0} takes no extension")]
    UnexpectedExtension(String),
    #[error("extension {extension} out of range for {property}")]
    ExtensionOutOfRange { property: String, extension: String },
    #[error("non-numeric extension: {0}")]
    NonNumericExtension(String),
    #[error("{0} is not allowed here")]
    MisplacedSegment(String),
    #[error("unexpected trailing path: {0}")]
    TrailingSegments(String),
}

impl From<AddressError> for ParseError {
    fn from(err: AddressError) -> Self {
        match err {
            AddressError::InvalidFormat(text) => ParseError::InvalidAddress(text),
            AddressError::ChecksumMismatch { found, .. } => {
                ParseError::InvalidDeviceChecksum(format!("{:02X}", found))
            }
        }
    }
}

/// Failures of a single bus transaction or adapter operation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("adapter timed out")]
    Timeout,
    #[error("no presence pulse after reset")]
    NoPresence,
    #[error("bus short detected")]
    Short,
    #[error("checksum mismatch in {0}")]
    Checksum(String),
    #[error("unexpected response: {0}")]
    Protocol(String),
    /// The value handed to a driver cannot be written; no bus traffic took place
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("adapter i/o error: {0}")]
    Io(String),
    #[error("adapter not reachable: {0}")]
    Disconnected(String),
}

impl BusError {
    /// Errors that mean the adapter itself is gone rather than a device misbehaving
    pub fn is_connection(&self) -> bool {
        matches!(self, BusError::Io(_) | BusError::Disconnected(_))
    }
}

impl From<std::io::Error> for BusError {
    fn from(err: std::io::Error) -> Self {
        BusError::Io(err.to_string())
    }
}

/// Errors surfaced by the filesystem operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FsError {
    #[error("bad path: {0}")]
    Parse(#[from] ParseError),
    #[error("device {0} not present on any bus")]
    NotPresent(Address),
    #[error("bus transaction failed: {0}")]
    Bus(#[from] BusError),
    #[error("bus.{bus} connection aborted: {reason}")]
    Connection { bus: usize, reason: String },
    #[error("operation not supported: {0}")]
    Unsupported(String),
    #[error("is a directory: {0}")]
    IsDirectory(String),
    #[error("not a directory: {0}")]
    NotDirectory(String),
    #[error("invalid value: {0}")]
    InvalidInput(String),
    #[error("no device: {0}")]
    NoDevice(String),
}

impl FsError {
    pub fn unsupported(what: impl Into<String>) -> Self {
        Self::Unsupported(what.into())
    }

    pub fn invalid_input(what: impl Into<String>) -> Self {
        Self::InvalidInput(what.into())
    }

    pub fn is_directory(path: impl Into<String>) -> Self {
        Self::IsDirectory(path.into())
    }

    pub fn not_directory(path: impl Into<String>) -> Self {
        Self::NotDirectory(path.into())
    }

    /// The positive errno for this error
    pub fn errno(&self) -> i32 {
        match self {
            FsError::Parse(_) | FsError::NotPresent(_) => libc::ENOENT,
            FsError::Bus(BusError::InvalidValue(_)) => libc::EINVAL,
            FsError::Bus(_) => libc::EIO,
            FsError::Connection { .. } => libc::ECONNABORTED,
            FsError::Unsupported(_) => libc::ENOTSUP,
            FsError::IsDirectory(_) => libc::EISDIR,
            FsError::NotDirectory(_) => libc::ENOTDIR,
            FsError::InvalidInput(_) => libc::EINVAL,
            FsError::NoDevice(_) => libc::ENODEV,
        }
    }
}

impl From<FsError> for std::io::Error {
    fn from(err: FsError) -> Self {
        std::io::Error::from_raw_os_error(err.errno())
    }
}
