//! Path parser
//!
//! Turns a path such as `/uncached/bus.0/29.C4A40C000000/PIO.ALL` into a
//! [`ResolvedQuery`]. Segments are consumed by a small state machine: the
//! top level accepts the bus selector, modifiers and the virtual
//! directories; the device tree accepts `alarm`, device addresses and hub
//! branches; a device accepts property names with an optional extension.
//!
//! Real devices are bound to the bus they answer on while parsing, so a
//! device that is not present fails the parse.

use owfs_core::{
    Address, Branch, BranchHop, Combination, DirType, Extension, Format, FsError, Namespace,
    Numbering, ParseError, Property, ResolvedQuery, Source, PATH_MAX,
};
use owfs_core::registry::LETTERS;
use tracing::trace;

use crate::context::Context;

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    /// Top level: bus selector, modifiers and virtual directories
    Unspecified,
    /// Inside a virtual directory, expecting a pseudo-device
    NonReal,
    /// Device tree where `alarm` is still allowed
    Branch,
    /// Device tree expecting a device address
    Real,
    Property,
    /// Below a property subdirectory
    Subproperty(String),
    Done,
}

/// Parse `path`, binding any device to the bus it answers on
pub fn parse(ctx: &Context, path: &str) -> Result<ResolvedQuery, FsError> {
    Parser::new(ctx, path, false).run()
}

/// Parse a path from a trusted source; devices are not checked for presence
pub fn parse_trusted(ctx: &Context, path: &str) -> Result<ResolvedQuery, FsError> {
    Parser::new(ctx, path, true).run()
}

struct Parser<'c> {
    ctx: &'c Context,
    query: ResolvedQuery,
    trusted: bool,
    state: State,
}

impl<'c> Parser<'c> {
    fn new(ctx: &'c Context, path: &str, trusted: bool) -> Self {
        Self {
            ctx,
            query: ResolvedQuery::new(path),
            trusted,
            state: State::Unspecified,
        }
    }

    fn run(mut self) -> Result<ResolvedQuery, FsError> {
        check_length(&self.query.path)?;
        let path = self.query.path.clone();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        for (i, segment) in segments.iter().enumerate() {
            if self.state == State::Done {
                return Err(ParseError::TrailingSegments(segments[i..].join("/")).into());
            }
            let more = i + 1 < segments.len();
            self.state = self.step(segment, more)?;
        }

        if self.query.dir_type == DirType::Root {
            self.query.dir_type = DirType::Real;
        }
        trace!(
            path = %self.query.path,
            dir_type = ?self.query.dir_type,
            bus = ?self.query.bus,
            "parsed path"
        );
        Ok(self.query)
    }

    fn step(&mut self, segment: &str, more: bool) -> Result<State, FsError> {
        match self.state.clone() {
            State::Unspecified => self.top_level(segment),
            State::NonReal => self.pseudo_device(segment),
            State::Branch => self.branch(segment),
            State::Real => self.device(segment),
            State::Property => self.property(segment, None, more),
            State::Subproperty(prefix) => self.property(segment, Some(&prefix), more),
            State::Done => Err(ParseError::TrailingSegments(segment.to_string()).into()),
        }
    }

    /// Returns true if `segment` was a modifier
    fn modifier(&mut self, segment: &str) -> bool {
        let flags = &mut self.query.flags;
        match segment {
            "uncached" => flags.uncached = true,
            "text" => flags.text = true,
            "json" => flags.json = true,
            _ => return false,
        }
        true
    }

    fn top_level(&mut self, segment: &str) -> Result<State, FsError> {
        if let Some(index) = bus_selector(segment) {
            if self.query.flags.bus_explicit {
                return Err(ParseError::NestedBusSelector.into());
            }
            if self.ctx.bus(index).is_none() {
                return Err(ParseError::UnknownBusIndex(index).into());
            }
            self.query.bus = Some(index);
            self.query.flags.bus_explicit = true;
            self.query.flags.bus_local = true;
            return Ok(State::Unspecified);
        }
        if self.modifier(segment) {
            return Ok(State::Unspecified);
        }

        let dir_type = match segment {
            "settings" => DirType::Settings,
            "system" => DirType::System,
            "statistics" => DirType::Statistics,
            "structure" => DirType::Structure,
            "interface" => DirType::Interface,
            _ => return self.branch(segment),
        };
        // interface belongs to one bus, the rest to none
        let needs_bus = dir_type == DirType::Interface;
        if needs_bus != self.query.flags.bus_explicit {
            return Err(ParseError::MisplacedSegment(segment.to_string()).into());
        }
        self.query.dir_type = dir_type;
        Ok(State::NonReal)
    }

    fn pseudo_device(&mut self, segment: &str) -> Result<State, FsError> {
        let registry = self.ctx.registry();
        let device = match Namespace::for_dir_type(self.query.dir_type) {
            Some(namespace) => registry.find_virtual(namespace, segment),
            None => family_code(segment).and_then(|family| registry.find_exact(family)),
        };
        let device = device.ok_or_else(|| ParseError::UnknownDevice(segment.to_string()))?;
        self.query.device = Some(device.clone());
        Ok(State::Property)
    }

    fn branch(&mut self, segment: &str) -> Result<State, FsError> {
        if segment == "alarm" {
            self.query.flags.alarm = true;
            return Ok(State::Real);
        }
        self.device(segment)
    }

    fn device(&mut self, segment: &str) -> Result<State, FsError> {
        if self.modifier(segment) {
            return Ok(self.state.clone());
        }
        if bus_selector(segment).is_some() {
            return Err(ParseError::NestedBusSelector.into());
        }

        let address = Address::parse(segment).map_err(ParseError::from)?;
        let device = self.ctx.registry().find_family(address.family()).clone();
        self.query.address = address;
        self.query.device = Some(device);
        if !self.trusted {
            self.locate(&address)?;
        }
        Ok(State::Property)
    }

    /// Bind the query to the bus `address` answers on
    fn locate(&mut self, address: &Address) -> Result<(), FsError> {
        let scanner = self.ctx.scanner();
        let branch = &self.query.branch;

        if let (true, Some(bus)) = (self.query.flags.bus_explicit, self.query.bus) {
            return match scanner.check_presence_on(bus, address, branch) {
                Ok(true) => Ok(()),
                Ok(false) => Err(FsError::NotPresent(*address)),
                Err(err) if err.is_connection() => Err(FsError::Connection {
                    bus,
                    reason: err.to_string(),
                }),
                Err(_) => Err(FsError::NotPresent(*address)),
            };
        }

        let found = if self.query.flags.uncached {
            scanner.recheck_presence(address, branch, self.query.bus)
        } else {
            scanner.check_presence(address, branch, self.query.bus)
        };
        match found {
            Some(bus) => {
                self.query.bus = Some(bus);
                self.query.flags.bus_local = true;
                Ok(())
            }
            None => Err(FsError::NotPresent(*address)),
        }
    }

    fn property(&mut self, segment: &str, prefix: Option<&str>, more: bool) -> Result<State, FsError> {
        let (name, suffix) = match segment.split_once('.') {
            Some((name, suffix)) => (name, Some(suffix)),
            None => (segment, None),
        };
        let full = match prefix {
            Some(dir) => format!("{}/{}", dir, name),
            None => name.to_string(),
        };

        let device = self
            .query
            .device
            .clone()
            .ok_or_else(|| ParseError::UnknownProperty(full.clone()))?;
        let index = device
            .find_property(&full)
            .ok_or_else(|| ParseError::UnknownProperty(full.clone()))?;
        let property = device
            .property_at(index)
            .ok_or_else(|| ParseError::UnknownProperty(full.clone()))?;
        self.query.property = Some(index);

        if property.is_directory() && suffix.is_some() {
            return Err(ParseError::UnexpectedExtension(full).into());
        }
        match (property.format(), property.source()) {
            (Format::Subdirectory, _) if more => Ok(State::Subproperty(full)),
            (Format::Directory, Source::Branch(branch)) if self.query.dir_type != DirType::Structure => {
                self.enter_branch(branch);
                Ok(State::Branch)
            }
            (Format::Subdirectory | Format::Directory, _) => Ok(State::Done),
            _ => {
                self.query.extension = parse_extension(property, suffix)?;
                Ok(State::Done)
            }
        }
    }

    /// Continue below a hub port; the hub itself is no longer selected
    fn enter_branch(&mut self, branch: Branch) {
        let hub = self.query.address;
        self.query.branch.push(BranchHop { hub, branch });
        self.query.address = Address::ZERO;
        self.query.device = None;
        self.query.property = None;
    }
}

fn check_length(path: &str) -> Result<(), ParseError> {
    if path.len() > PATH_MAX {
        return Err(ParseError::PathTooLong(path.len()));
    }
    if path.contains('\0') {
        return Err(ParseError::UnexpectedNull);
    }
    Ok(())
}

/// `bus.N`
fn bus_selector(segment: &str) -> Option<usize> {
    let digits = segment.strip_prefix("bus.")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn family_code(segment: &str) -> Option<u8> {
    if segment.len() != 2 {
        return None;
    }
    u8::from_str_radix(segment, 16).ok()
}

/// Resolve the text after the first `.` of a property segment
fn parse_extension(property: &Property, suffix: Option<&str>) -> Result<Extension, ParseError> {
    let name = property.name();
    let (aggregate, text) = match (property.aggregate(), suffix) {
        (None, None) => return Ok(Extension::Index(0)),
        (None, Some(_)) => return Err(ParseError::UnexpectedExtension(name.to_string())),
        (Some(_), None) => return Err(ParseError::MissingExtension(name.to_string())),
        (Some(aggregate), Some(text)) => (aggregate, text),
    };
    let out_of_range = || ParseError::ExtensionOutOfRange {
        property: name.to_string(),
        extension: text.to_string(),
    };
    let non_numeric = || ParseError::NonNumericExtension(text.to_string());

    if aggregate.combination == Combination::Sparse {
        return match aggregate.numbering {
            Numbering::Letters => Ok(Extension::Sparse(text.to_string())),
            Numbering::Numbers if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) => {
                Ok(Extension::Sparse(text.to_string()))
            }
            Numbering::Numbers => Err(non_numeric()),
        };
    }
    if text.eq_ignore_ascii_case("ALL") {
        return Ok(Extension::All);
    }
    if text.eq_ignore_ascii_case("BYTE") && property.is_bitfield() {
        return Ok(Extension::Byte);
    }

    let index = match aggregate.numbering {
        Numbering::Letters => {
            let mut chars = text.chars();
            match (chars.next(), chars.next()) {
                (Some(letter), None) if letter.is_ascii_alphabetic() => {
                    (letter.to_ascii_uppercase() as u8 - b'A') as usize
                }
                // past `Z` elements are named by number
                _ => match text.parse::<usize>() {
                    Ok(index) if index >= LETTERS => index,
                    _ => return Err(non_numeric()),
                },
            }
        }
        Numbering::Numbers => {
            let number: i64 = text.parse().map_err(|_| non_numeric())?;
            usize::try_from(number).map_err(|_| out_of_range())?
        }
    };
    if index >= aggregate.elements {
        return Err(out_of_range());
    }
    Ok(Extension::Index(index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, eeprom, hub, switch2, switch8, thermometer};
    use owfs_bus::{Chip, SimDevice, SimulatedBus};

    fn bus_with(addresses: &[Address]) -> SimulatedBus {
        SimulatedBus::with_devices(
            addresses
                .iter()
                .map(|a| SimDevice::new(*a, Chip::for_family(a.family()))),
        )
    }

    fn parse_err(ctx: &Context, path: &str) -> ParseError {
        match parse(ctx, path) {
            Err(FsError::Parse(err)) => err,
            other => panic!("expected a parse error for {}, got {:?}", path, other),
        }
    }

    #[test]
    fn test_root_is_the_real_union() {
        let (ctx, _) = context(&[SimulatedBus::new()]);
        let query = parse(&ctx, "/").unwrap();
        assert_eq!(query.dir_type, DirType::Real);
        assert!(query.is_dir());
        assert!(query.bus.is_none());
        assert_eq!(parse(&ctx, "").unwrap().dir_type, DirType::Real);
    }

    #[test]
    fn test_device_property_binds_bus() {
        let (ctx, _) = context(&[SimulatedBus::new(), bus_with(&[thermometer()])]);
        let path = format!("/{}/temperature", thermometer().with_crc());
        let query = parse(&ctx, &path).unwrap();
        assert_eq!(query.address, thermometer());
        assert_eq!(query.bus, Some(1));
        assert!(query.flags.bus_local);
        assert!(!query.flags.bus_explicit);
        assert_eq!(query.property().unwrap().name(), "temperature");
        assert_eq!(query.extension, Extension::Index(0));
        assert!(!query.is_dir());
    }

    #[test]
    fn test_parse_is_idempotent() {
        let (ctx, _) = context(&[bus_with(&[switch8()])]);
        let path = format!("/text/{}/PIO.3", switch8());
        let first = parse(&ctx, &path).unwrap();
        let second = parse(&ctx, &path).unwrap();
        assert_eq!(first, second);
        assert!(first.flags.text);
    }

    #[test]
    fn test_numbered_extension_range() {
        let (ctx, _) = context(&[bus_with(&[switch8()])]);
        for i in 0..8 {
            let query = parse(&ctx, &format!("/{}/PIO.{}", switch8(), i)).unwrap();
            assert_eq!(query.extension, Extension::Index(i));
        }
        assert!(matches!(
            parse_err(&ctx, &format!("/{}/PIO.8", switch8())),
            ParseError::ExtensionOutOfRange { .. }
        ));
        assert!(matches!(
            parse_err(&ctx, &format!("/{}/PIO.-1", switch8())),
            ParseError::ExtensionOutOfRange { .. }
        ));
        assert_eq!(
            parse_err(&ctx, &format!("/{}/PIO.x1", switch8())),
            ParseError::NonNumericExtension("x1".into())
        );
    }

    #[test]
    fn test_lettered_extension_range() {
        let (ctx, _) = context(&[bus_with(&[switch2()])]);
        let a = parse(&ctx, &format!("/{}/PIO.A", switch2())).unwrap();
        assert_eq!(a.extension, Extension::Index(0));
        let b = parse(&ctx, &format!("/{}/sensed.b", switch2())).unwrap();
        assert_eq!(b.extension, Extension::Index(1));
        assert!(matches!(
            parse_err(&ctx, &format!("/{}/PIO.C", switch2())),
            ParseError::ExtensionOutOfRange { .. }
        ));
        assert_eq!(
            parse_err(&ctx, &format!("/{}/PIO.7", switch2())),
            ParseError::NonNumericExtension("7".into())
        );
    }

    #[test]
    fn test_all_and_byte() {
        let (ctx, _) = context(&[bus_with(&[switch8(), thermometer()])]);
        let all = parse(&ctx, &format!("/{}/PIO.all", switch8())).unwrap();
        assert_eq!(all.extension, Extension::All);
        let byte = parse(&ctx, &format!("/{}/PIO.BYTE", switch8())).unwrap();
        assert_eq!(byte.extension, Extension::Byte);

        assert_eq!(
            parse_err(&ctx, &format!("/{}/PIO", switch8())),
            ParseError::MissingExtension("PIO".into())
        );
        assert_eq!(
            parse_err(&ctx, &format!("/{}/temperature.ALL", thermometer())),
            ParseError::UnexpectedExtension("temperature".into())
        );
    }

    #[test]
    fn test_checksum_is_verified() {
        let (ctx, _) = context(&[bus_with(&[thermometer()])]);
        let bad = format!("/{}.{:02X}", thermometer(), thermometer().crc() ^ 0xFF);
        assert!(matches!(parse_err(&ctx, &bad), ParseError::InvalidDeviceChecksum(_)));
        assert!(matches!(parse_err(&ctx, "/28.67C6"), ParseError::InvalidAddress(_)));
    }

    #[test]
    fn test_absent_device() {
        let (ctx, _) = context(&[SimulatedBus::new()]);
        let path = format!("/{}", thermometer());
        assert_eq!(parse(&ctx, &path), Err(FsError::NotPresent(thermometer())));
    }

    #[test]
    fn test_trusted_parse_skips_presence() {
        let (ctx, _) = context(&[SimulatedBus::new()]);
        let query = parse_trusted(&ctx, &format!("/{}/temperature", thermometer())).unwrap();
        assert_eq!(query.address, thermometer());
        assert_eq!(query.bus, None);
    }

    #[test]
    fn test_bus_selector() {
        let (ctx, _) = context(&[SimulatedBus::new(), bus_with(&[thermometer()])]);
        let query = parse(&ctx, &format!("/bus.1/{}", thermometer())).unwrap();
        assert_eq!(query.bus, Some(1));
        assert!(query.flags.bus_explicit);

        assert_eq!(parse_err(&ctx, "/bus.0/bus.1"), ParseError::NestedBusSelector);
        assert_eq!(parse_err(&ctx, "/bus.7"), ParseError::UnknownBusIndex(7));
        assert_eq!(
            parse(&ctx, &format!("/bus.0/{}", thermometer())),
            Err(FsError::NotPresent(thermometer()))
        );
    }

    #[test]
    fn test_explicit_bus_connection_failure() {
        let dead = bus_with(&[thermometer()]);
        dead.disconnect(false);
        let (ctx, _) = context(&[dead]);
        let err = parse(&ctx, &format!("/bus.0/{}", thermometer())).unwrap_err();
        assert!(matches!(err, FsError::Connection { bus: 0, .. }));
    }

    #[test]
    fn test_virtual_directories() {
        let (ctx, _) = context(&[SimulatedBus::new()]);
        let query = parse(&ctx, "/settings/timeout/volatile").unwrap();
        assert_eq!(query.dir_type, DirType::Settings);
        assert_eq!(query.device.as_ref().unwrap().code(), "timeout");
        assert_eq!(query.property().unwrap().name(), "volatile");

        assert!(parse(&ctx, "/system").unwrap().is_dir());
        assert_eq!(parse_err(&ctx, "/statistics/nothing"), ParseError::UnknownDevice("nothing".into()));
        assert_eq!(parse_err(&ctx, "/bus.0/settings"), ParseError::MisplacedSegment("settings".into()));
    }

    #[test]
    fn test_interface_needs_a_bus() {
        let (ctx, _) = context(&[SimulatedBus::new()]);
        assert_eq!(parse_err(&ctx, "/interface"), ParseError::MisplacedSegment("interface".into()));
        let query = parse(&ctx, "/bus.0/interface/settings/name").unwrap();
        assert_eq!(query.dir_type, DirType::Interface);
        assert_eq!(query.bus, Some(0));
    }

    #[test]
    fn test_structure_needs_no_device() {
        let (ctx, _) = context(&[]);
        let query = parse(&ctx, "/structure/29/PIO.BYTE").unwrap();
        assert_eq!(query.dir_type, DirType::Structure);
        assert_eq!(query.extension, Extension::Byte);
        assert!(query.address.is_zero());
        assert_eq!(parse_err(&ctx, "/structure/77"), ParseError::UnknownDevice("77".into()));
    }

    #[test]
    fn test_subdirectory_members() {
        let (ctx, _) = context(&[bus_with(&[eeprom()])]);
        let dir = parse(&ctx, &format!("/{}/pages", eeprom())).unwrap();
        assert!(dir.is_dir());
        let page = parse(&ctx, &format!("/{}/pages/page.3", eeprom())).unwrap();
        assert_eq!(page.property().unwrap().name(), "pages/page");
        assert_eq!(page.extension, Extension::Index(3));
        assert!(matches!(
            parse_err(&ctx, &format!("/{}/pages/page.4", eeprom())),
            ParseError::ExtensionOutOfRange { .. }
        ));
    }

    #[test]
    fn test_hub_branch() {
        let sim = SimulatedBus::with_devices([
            SimDevice::new(hub(), Chip::Hub),
            SimDevice::new(thermometer(), Chip::thermometer(21.0)).on_branch(hub(), Branch::Main),
        ]);
        let (ctx, _) = context(&[SimulatedBus::new(), sim]);

        let dir = parse(&ctx, &format!("/{}/main", hub())).unwrap();
        assert!(dir.is_dir());
        assert!(dir.address.is_zero());
        assert_eq!(dir.branch, vec![BranchHop { hub: hub(), branch: Branch::Main }]);
        assert_eq!(dir.bus, Some(1));

        // not reachable on the aux port; checked first since presence is cached by address
        assert!(parse(&ctx, &format!("/{}/aux/{}", hub(), thermometer())).is_err());

        let query = parse(&ctx, &format!("/{}/main/{}/temperature", hub(), thermometer())).unwrap();
        assert_eq!(query.address, thermometer());
        assert_eq!(query.bus, Some(1));
        assert_eq!(query.branch.len(), 1);
    }

    #[test]
    fn test_alarm_and_modifiers() {
        let (ctx, _) = context(&[SimulatedBus::new()]);
        let query = parse(&ctx, "/uncached/json/alarm").unwrap();
        assert!(query.flags.alarm);
        assert!(query.flags.uncached);
        assert!(query.flags.json);
        assert!(query.is_dir());
    }

    #[test]
    fn test_trailing_segments() {
        let (ctx, _) = context(&[bus_with(&[thermometer()])]);
        let path = format!("/{}/temperature/more/stuff", thermometer());
        assert_eq!(parse_err(&ctx, &path), ParseError::TrailingSegments("more/stuff".into()));
        assert_eq!(
            parse_err(&ctx, &format!("/{}/nothing", thermometer())),
            ParseError::UnknownProperty("nothing".into())
        );
    }

    #[test]
    fn test_path_limits() {
        let (ctx, _) = context(&[]);
        let long = format!("/{}", "a".repeat(PATH_MAX));
        assert_eq!(parse_err(&ctx, &long), ParseError::PathTooLong(PATH_MAX + 1));
        assert_eq!(parse_err(&ctx, "/settings\0"), ParseError::UnexpectedNull);
    }
}
