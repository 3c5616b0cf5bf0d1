//! 64-bit 1-Wire ROM addresses
//!
//! Every device carries a unique address laid out as
//! `family (1 byte) | id (6 bytes) | crc8 (1 byte)`. The textual form used
//! in paths is `FF.IIIIIIIIIIII` with an optional `.CC` checksum suffix.

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;

use crate::crc::crc8;

static ADDRESS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9A-Fa-f]{2})\.?([0-9A-Fa-f]{12})(?:\.?([0-9A-Fa-f]{2}))?$")
        .expect("address pattern is valid")
});

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("not a device address: {0}")]
    InvalidFormat(String),
    #[error("address checksum mismatch: expected {expected:02X}, found {found:02X}")]
    ChecksumMismatch { expected: u8, found: u8 },
}

/// A device ROM address
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; 8]);

impl Address {
    /// The all-zero address, meaning "no device selected"
    pub const ZERO: Address = Address([0; 8]);

    /// Wrap raw ROM bytes as read from the bus, without validation
    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// Build an address from family code and id, computing the checksum
    pub fn from_parts(family: u8, id: [u8; 6]) -> Self {
        let mut bytes = [0u8; 8];
        bytes[0] = family;
        bytes[1..7].copy_from_slice(&id);
        bytes[7] = crc8(&bytes[..7]);
        Self(bytes)
    }

    /// Parse the textual form used in paths
    ///
    /// Accepts `FF.IIIIIIIIIIII`, `FF.IIIIIIIIIIII.CC` and the same without
    /// dots. Bytes are written in wire order. A supplied checksum must match.
    pub fn parse(text: &str) -> Result<Self, AddressError> {
        let caps = ADDRESS_PATTERN
            .captures(text)
            .ok_or_else(|| AddressError::InvalidFormat(text.to_string()))?;

        let family = u8::from_str_radix(&caps[1], 16)
            .map_err(|_| AddressError::InvalidFormat(text.to_string()))?;
        let id_text = hex::decode(&caps[2]).map_err(|_| AddressError::InvalidFormat(text.to_string()))?;

        let mut id = [0u8; 6];
        id.copy_from_slice(&id_text);
        let address = Self::from_parts(family, id);

        if let Some(crc) = caps.get(3) {
            let found = u8::from_str_radix(crc.as_str(), 16)
                .map_err(|_| AddressError::InvalidFormat(text.to_string()))?;
            if found != address.crc() {
                return Err(AddressError::ChecksumMismatch {
                    expected: address.crc(),
                    found,
                });
            }
        }
        Ok(address)
    }

    pub fn bytes(&self) -> &[u8; 8] {
        &self.0
    }

    pub fn family(&self) -> u8 {
        self.0[0]
    }

    /// The six id bytes in wire order
    pub fn id(&self) -> [u8; 6] {
        let mut id = [0u8; 6];
        id.copy_from_slice(&self.0[1..7]);
        id
    }

    pub fn crc(&self) -> u8 {
        self.0[7]
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 8]
    }

    /// Checksum holds and the family code is non-zero
    pub fn is_valid(&self) -> bool {
        self.0[0] != 0 && crc8(&self.0[..7]) == self.0[7]
    }

    /// Bit `n` (0..64) in transmission order, LSB of byte 0 first
    pub fn bit(&self, n: usize) -> bool {
        (self.0[n >> 3] >> (n & 0x07)) & 0x01 == 0x01
    }

    pub fn set_bit(&mut self, n: usize, value: bool) {
        let mask = 1u8 << (n & 0x07);
        if value {
            self.0[n >> 3] |= mask;
        } else {
            self.0[n >> 3] &= !mask;
        }
    }

    /// `IIIIIIIIIIII` as displayed
    pub fn id_hex(&self) -> String {
        hex::encode_upper(self.id())
    }

    /// `FF.IIIIIIIIIIII.CC`
    pub fn with_crc(&self) -> String {
        format!("{}.{:02X}", self, self.crc())
    }

    /// The address as sixteen hex digits in wire order
    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }

    /// The address as sixteen hex digits, checksum first
    pub fn to_reverse_hex(&self) -> String {
        let mut bytes = self.0;
        bytes.reverse();
        hex::encode_upper(bytes)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}.{}", self.family(), self.id_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.with_crc())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}
