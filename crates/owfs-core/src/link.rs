//! The boundary between property dispatch and chip-specific drivers

use std::fmt;
use std::time::Duration;

use crate::address::Address;
use crate::error::BusError;
use crate::query::Extension;
use crate::registry::Property;
use crate::value::Value;

/// Byte-level access to one addressed device on a locked bus
pub trait Link {
    fn address(&self) -> Address;

    /// Reset the bus, route through any hub branches and match the device ROM
    fn select(&mut self) -> Result<(), BusError>;

    fn write(&mut self, bytes: &[u8]) -> Result<(), BusError>;

    fn read(&mut self, buf: &mut [u8]) -> Result<(), BusError>;

    /// Wait for a conversion or EEPROM copy to finish
    fn delay(&mut self, duration: Duration);

    /// Select the device and send `command`
    fn command(&mut self, command: &[u8]) -> Result<(), BusError> {
        self.select()?;
        self.write(command)
    }
}

/// Chip transactions for the properties of one device family
///
/// `extension` is the unit of one physical transaction: the whole array
/// (`All`, or `Byte` for bitfields) for aggregate properties, one element
/// for separate ones, the literal key for sparse ones and `Index(0)` for
/// scalars.
pub trait DeviceDriver: Send + Sync + fmt::Debug {
    fn read(&self, link: &mut dyn Link, property: &Property, extension: &Extension) -> Result<Value, BusError>;

    fn write(
        &self,
        link: &mut dyn Link,
        property: &Property,
        extension: &Extension,
        value: &Value,
    ) -> Result<(), BusError>;
}

/// Error for a property the driver does not implement
pub fn unsupported(property: &Property) -> BusError {
    BusError::Protocol(format!("no transaction for {}", property.name()))
}
