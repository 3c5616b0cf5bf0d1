//! owfs Discovery - Where devices are and what each directory holds
//!
//! This crate provides:
//! - Presence checks that bind a device address to a bus, with a TTL cache
//! - Directory listings per bus or across every bus, walked in parallel and
//!   cached per bus and hub branch
//! - Alarm listings from the conditional search

pub mod presence;
pub mod scanner;

pub use presence::sense;
pub use scanner::{ScanMode, Scanner};
