//! The four filesystem callbacks
//!
//! `getattr`, `readdir`, `read` and `write` take a raw path, parse it and
//! hand the query to the directory generator or the dispatch engine. Values
//! are encoded and decoded here, so the layers below only see [`Value`]s.

use serde::Serialize;
use std::borrow::Cow;
use tracing::debug;

use owfs_core::codec;
use owfs_core::{DirType, EngineStat, Extension, Format, FsError, Property, ResolvedQuery, Value};

use crate::context::Context;
use crate::parser::parse;
use crate::{directory, dispatch, virtuals};

const DIR_MODE: u32 = 0o040755;
const FILE_MODE: u32 = 0o100000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Directory,
    File,
}

/// What `getattr` reports for a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Attributes {
    pub kind: FileKind,
    pub mode: u32,
    pub size: usize,
}

impl Context {
    pub fn getattr(&self, path: &str) -> Result<Attributes, FsError> {
        let query = parse(self, path)?;
        let Some(property) = query.property().filter(|p| !p.is_directory()) else {
            return Ok(Attributes {
                kind: FileKind::Directory,
                mode: DIR_MODE,
                size: 0,
            });
        };

        let structure = query.dir_type == DirType::Structure;
        let mut mode = FILE_MODE;
        if property.readable() {
            mode |= 0o444;
        }
        if property.is_writable() && !structure {
            mode |= 0o222;
        }
        let size = if structure {
            virtuals::structure(property, &query.extension).len()
        } else {
            property.file_length(&query.extension)
        };
        Ok(Attributes {
            kind: FileKind::File,
            mode,
            size,
        })
    }

    pub fn readdir(&self, path: &str) -> Result<Vec<String>, FsError> {
        let query = parse(self, path)?;
        directory::list(self, &query)
    }

    /// Up to `size` bytes of the encoded value, starting at `offset`
    pub fn read(&self, path: &str, size: usize, offset: usize) -> Result<Vec<u8>, FsError> {
        self.stats().incr(EngineStat::Reads);
        match self.read_path(path, size, offset) {
            Ok(bytes) => {
                self.stats().add(EngineStat::ReadBytes, bytes.len() as u64);
                Ok(bytes)
            }
            Err(err) => {
                self.stats().incr(EngineStat::ReadErrors);
                debug!(path, error = %err, "read failed");
                Err(err)
            }
        }
    }

    /// Decode `data` and write it; returns the number of bytes consumed
    pub fn write(&self, path: &str, data: &[u8], offset: usize) -> Result<usize, FsError> {
        self.stats().incr(EngineStat::Writes);
        match self.write_path(path, data, offset) {
            Ok(written) => {
                self.stats().add(EngineStat::WriteBytes, written as u64);
                Ok(written)
            }
            Err(err) => {
                self.stats().incr(EngineStat::WriteErrors);
                debug!(path, error = %err, "write failed");
                Err(err)
            }
        }
    }

    fn read_path(&self, path: &str, size: usize, offset: usize) -> Result<Vec<u8>, FsError> {
        let mut query = parse(self, path)?;
        let encoded = self.read_encoded(&mut query)?;
        if offset >= encoded.len() {
            return Ok(Vec::new());
        }
        let end = offset.saturating_add(size).min(encoded.len());
        Ok(encoded[offset..end].to_vec())
    }

    fn read_encoded(&self, query: &mut ResolvedQuery) -> Result<Vec<u8>, FsError> {
        let value = dispatch::read(self, query)?;
        let property = query.property().ok_or_else(|| FsError::is_directory(&query.path))?;
        self.encode(query, property, &value)
    }

    fn encode(&self, query: &ResolvedQuery, property: &Property, value: &Value) -> Result<Vec<u8>, FsError> {
        let options = self.codec(query.encoding());
        if query.dir_type == DirType::Structure {
            return Ok(codec::encode(Format::Ascii, value, options)?);
        }
        let format = property.format().element_format(&query.extension);
        let encoded = match value {
            Value::Array(values) => codec::encode_all(format, values, options)?,
            other => codec::encode(format, other, options)?,
        };
        Ok(encoded)
    }

    fn write_path(&self, path: &str, data: &[u8], offset: usize) -> Result<usize, FsError> {
        let mut query = parse(self, path)?;
        let property = query
            .property()
            .cloned()
            .filter(|p| !p.is_directory())
            .ok_or_else(|| FsError::unsupported(format!("{} is a directory", path)))?;
        if !property.is_writable() || query.dir_type == DirType::Structure {
            return Err(FsError::unsupported(format!("{} is read-only", property.name())));
        }

        let format = property.format();
        let length = property.file_length(&query.extension);
        let input = if offset > 0 || (format == Format::Binary && data.len() < length) {
            if offset.checked_add(data.len()).map_or(true, |end| end > length) {
                return Err(FsError::invalid_input(format!(
                    "{} bytes at offset {} overrun {} ({} bytes)",
                    data.len(),
                    offset,
                    property.name(),
                    length
                )));
            }
            Cow::Owned(self.splice_current(&query, &property, data, offset)?)
        } else {
            Cow::Borrowed(data)
        };
        if format == Format::Binary && !query.flags.json && input.len() != length {
            return Err(FsError::invalid_input(format!(
                "{} takes {} bytes, got {}",
                property.name(),
                length,
                input.len()
            )));
        }

        let value = self.decode(&query, &property, &input)?;
        dispatch::write(self, &mut query, &value)?;
        Ok(data.len())
    }

    /// Overlay `data` onto the current encoded value at `offset`
    fn splice_current(
        &self,
        query: &ResolvedQuery,
        property: &Property,
        data: &[u8],
        offset: usize,
    ) -> Result<Vec<u8>, FsError> {
        if query.flags.json || !property.format().is_variable_length() {
            return Err(FsError::invalid_input(format!(
                "{} does not accept partial writes",
                property.name()
            )));
        }
        let mut current = query.clone();
        current.flags.uncached = true;
        let existing = self.read_encoded(&mut current)?;
        Ok(codec::overlay(&existing, offset, data))
    }

    fn decode(&self, query: &ResolvedQuery, property: &Property, input: &[u8]) -> Result<Value, FsError> {
        let options = self.codec(query.encoding());
        let format = property.format().element_format(&query.extension);
        let value = match query.extension {
            Extension::All => Value::Array(codec::decode_all(
                format,
                input,
                property.elements(),
                property.length(),
                options,
            )?),
            _ => codec::decode(format, input, options)?,
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, eeprom, switch2, switch8, thermometer};
    use owfs_bus::{Chip, SimDevice, SimulatedBus};
    use owfs_core::TtlClass;

    fn bus() -> SimulatedBus {
        SimulatedBus::with_devices([
            SimDevice::new(thermometer(), Chip::thermometer(21.5)),
            SimDevice::new(switch8(), Chip::switch8()),
            SimDevice::new(switch2(), Chip::switch2()),
            SimDevice::new(eeprom(), Chip::eeprom()),
        ])
    }

    fn text(bytes: Vec<u8>) -> String {
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_getattr() {
        let (ctx, _) = context(&[bus()]);
        let root = ctx.getattr("/").unwrap();
        assert_eq!(root.kind, FileKind::Directory);
        assert_eq!(root.mode, 0o040755);

        let temperature = ctx.getattr(&format!("/{}/temperature", thermometer())).unwrap();
        assert_eq!(temperature.kind, FileKind::File);
        assert_eq!(temperature.mode, 0o100444);
        assert_eq!(temperature.size, 12);

        let pio = ctx.getattr(&format!("/{}/PIO.ALL", switch8())).unwrap();
        assert_eq!(pio.mode, 0o100666);
        assert_eq!(pio.size, 15);

        let structure = ctx.getattr("/structure/29/PIO.ALL").unwrap();
        assert_eq!(structure.mode, 0o100444);
        assert_eq!(structure.size, "B,-00001,000008,rw,000015,s,".len());

        let pages = ctx.getattr(&format!("/{}/pages", eeprom())).unwrap();
        assert_eq!(pages.kind, FileKind::Directory);
    }

    #[test]
    fn test_read_temperature_in_each_scale() {
        let (ctx, _) = context(&[bus()]);
        let path = format!("/uncached/text/{}/temperature", thermometer());
        assert_eq!(text(ctx.read(&path, 64, 0).unwrap()), "21.5");

        ctx.write("/settings/units/temperature_scale", b"F", 0).unwrap();
        assert_eq!(text(ctx.read(&path, 64, 0).unwrap()), "70.7");
        assert_eq!(ctx.stats().get(EngineStat::Reads), 2);
    }

    #[test]
    fn test_padded_and_sliced_reads() {
        let (ctx, _) = context(&[bus()]);
        let path = format!("/{}/temphigh", thermometer());
        assert_eq!(text(ctx.read(&path, 64, 0).unwrap()), "          75");
        assert_eq!(text(ctx.read(&path, 1, 11).unwrap()), "5");
        assert!(ctx.read(&path, 4, 100).unwrap().is_empty());
    }

    #[test]
    fn test_switch_round_trip() {
        let (ctx, _) = context(&[bus()]);
        let all = format!("/{}/PIO.ALL", switch2());
        assert_eq!(text(ctx.read(&all, 64, 0).unwrap()), "0,0");

        assert_eq!(ctx.write(&format!("/{}/PIO.B", switch2()), b"1", 0).unwrap(), 1);
        assert_eq!(text(ctx.read(&all, 64, 0).unwrap()), "0,1");

        ctx.write(&all, b"1,0", 0).unwrap();
        assert_eq!(text(ctx.read(&all, 64, 0).unwrap()), "1,0");
        assert_eq!(ctx.stats().get(EngineStat::Writes), 2);
    }

    #[test]
    fn test_json_read() {
        let (ctx, _) = context(&[bus()]);
        let path = format!("/json/{}/PIO.ALL", switch8());
        assert_eq!(
            text(ctx.read(&path, 256, 0).unwrap()),
            "[false,false,false,false,false,false,false,false]"
        );
    }

    #[test]
    fn test_binary_write_with_offset() {
        let (ctx, _) = context(&[bus()]);
        let page = format!("/{}/pages/page.1", eeprom());
        ctx.write(&page, b"owfs", 4).unwrap();

        let read = ctx.read(&page, 32, 0).unwrap();
        assert_eq!(read.len(), 32);
        assert_eq!(&read[..4], &[0xFF; 4]);
        assert_eq!(&read[4..8], b"owfs");

        let memory = ctx.read(&format!("/uncached/{}/memory", eeprom()), 128, 36).unwrap();
        assert_eq!(&memory[..4], b"owfs");
    }

    #[test]
    fn test_binary_write_too_long() {
        let (ctx, _) = context(&[bus()]);
        let page = format!("/{}/pages/page.0", eeprom());
        let err = ctx.write(&page, &[0u8; 40], 0).unwrap_err();
        assert!(matches!(err, FsError::InvalidInput(_)));
        assert_eq!(ctx.stats().get(EngineStat::WriteErrors), 1);
    }

    #[test]
    fn test_write_past_the_end_is_rejected() {
        let (ctx, _) = context(&[bus()]);
        let page = format!("/{}/pages/page.1", eeprom());
        for offset in [usize::MAX, 32, 30] {
            let err = ctx.write(&page, b"xyz", offset).unwrap_err();
            assert_eq!(err.errno(), libc::EINVAL, "offset {}", offset);
        }
        assert_eq!(ctx.write(&page, b"x", 31).unwrap(), 1);
        let read = ctx.read(&format!("/uncached{}", page), 32, 0).unwrap();
        assert_eq!(read[31], b'x');
    }

    #[test]
    fn test_packed_value_wider_than_the_array() {
        let (ctx, _) = context(&[bus()]);
        let byte = format!("/uncached/text/{}/PIO.BYTE", switch8());
        ctx.write(&byte, b"5", 0).unwrap();
        assert_eq!(ctx.write(&byte, b"256", 0).unwrap_err().errno(), libc::EINVAL);
        assert_eq!(text(ctx.read(&byte, 16, 0).unwrap()), "5");

        let pair = format!("/uncached/text/{}/PIO.BYTE", switch2());
        assert_eq!(ctx.write(&pair, b"4", 0).unwrap_err().errno(), libc::EINVAL);
        assert_eq!(ctx.write(&pair, b"3", 0).unwrap(), 1);
    }

    #[test]
    fn test_rejected_value_is_not_retried() {
        let (ctx, _) = context(&[bus()]);
        let err = ctx.write(&format!("/{}/por", switch8()), b"1", 0).unwrap_err();
        assert_eq!(err.errno(), libc::EINVAL);
        assert_eq!(ctx.stats().get(EngineStat::WriteRetries), 0);
        assert_eq!(ctx.stats().get(EngineStat::Relocations), 0);
        assert_eq!(ctx.stats().get(EngineStat::WriteErrors), 1);

        assert!(ctx.write(&format!("/{}/por", switch8()), b"0", 0).is_ok());
    }

    #[test]
    fn test_offset_write_on_a_number_is_rejected() {
        let (ctx, _) = context(&[bus()]);
        let err = ctx
            .write(&format!("/{}/temphigh", thermometer()), b"3", 1)
            .unwrap_err();
        assert!(matches!(err, FsError::InvalidInput(_)));
    }

    #[test]
    fn test_settings_are_live() {
        let (ctx, _) = context(&[bus()]);
        ctx.write("/settings/timeout/volatile", b"3", 0).unwrap();
        assert_eq!(ctx.timeouts().seconds(TtlClass::Volatile), 3);
        assert_eq!(
            text(ctx.read("/text/settings/timeout/volatile", 16, 0).unwrap()),
            "3"
        );
        assert!(matches!(
            ctx.write("/settings/units/temperature_scale", b"Q", 0),
            Err(FsError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_error_codes() {
        let (ctx, _) = context(&[bus()]);
        let errno = |result: Result<Vec<u8>, FsError>| result.unwrap_err().errno();

        assert_eq!(errno(ctx.read(&format!("/{}", thermometer()), 16, 0)), libc::EISDIR);
        assert_eq!(
            ctx.readdir(&format!("/{}/temperature", thermometer())).unwrap_err().errno(),
            libc::ENOTDIR
        );
        assert_eq!(
            ctx.write(&format!("/{}/temperature", thermometer()), b"30", 0)
                .unwrap_err()
                .errno(),
            libc::ENOTSUP
        );
        assert_eq!(
            ctx.write(&format!("/{}", thermometer()), b"1", 0).unwrap_err().errno(),
            libc::ENOTSUP
        );
        assert_eq!(errno(ctx.read("/28.000000000000/temperature", 16, 0)), libc::ENOENT);
        assert_eq!(errno(ctx.read("/nonsense", 16, 0)), libc::ENOENT);
    }

    #[test]
    fn test_pinned_bus_failure_is_eio() {
        let sim = bus();
        let (ctx, _) = context(&[sim.clone()]);
        let path = format!("/bus.0/{}/temphigh", thermometer());
        ctx.read(&path, 16, 0).unwrap();

        sim.detach(&thermometer());
        let err = ctx.write(&path, b"30", 0).unwrap_err();
        assert_eq!(err.errno(), libc::EIO);
        assert_eq!(ctx.stats().get(EngineStat::WriteRetries), 1);
    }

    #[test]
    fn test_disconnected_bus_is_connection_aborted() {
        let sim = bus();
        let (ctx, _) = context(&[sim.clone()]);
        let path = format!("/bus.0/{}/temphigh", thermometer());
        ctx.read(&path, 16, 0).unwrap();

        sim.disconnect(false);
        let err = ctx.write(&path, b"30", 0).unwrap_err();
        assert_eq!(err.errno(), libc::ECONNABORTED);
    }

    #[test]
    fn test_structure_read() {
        let (ctx, _) = context(&[bus()]);
        assert_eq!(
            text(ctx.read("/structure/29/PIO.ALL", 64, 0).unwrap()),
            "B,-00001,000008,rw,000015,s,"
        );
        assert!(matches!(
            ctx.write("/structure/29/PIO.ALL", b"1,1,1,1,1,1,1,1", 0),
            Err(FsError::Unsupported(_))
        ));
    }

    #[test]
    fn test_system_and_statistics() {
        let (ctx, _) = context(&[bus(), SimulatedBus::new()]);
        assert_eq!(
            text(ctx.read("/text/system/configuration/buses", 16, 0).unwrap()),
            "2"
        );
        ctx.read(&format!("/{}/temphigh", thermometer()), 16, 0).unwrap();
        // the statistics read counts itself
        let calls = text(ctx.read("/text/statistics/read/calls", 16, 0).unwrap());
        assert_eq!(calls, "2");
        assert_eq!(
            text(ctx.read("/text/bus.1/interface/settings/name", 32, 0).unwrap()),
            "sim1"
        );
    }
}
