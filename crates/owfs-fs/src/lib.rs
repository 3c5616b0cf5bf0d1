//! owfs Filesystem - The virtual filesystem over the 1-Wire buses
//!
//! A [`Context`] owns everything a request needs. Paths are resolved by
//! [`parser`], listed by [`directory`] and read or written through
//! [`dispatch`]; [`ops`] puts the four filesystem callbacks on top.

pub mod context;
pub mod directory;
pub mod dispatch;
pub mod ops;
pub mod parser;
mod virtuals;

#[cfg(test)]
mod testing;

pub use context::{Context, ContextBuilder};
pub use ops::{Attributes, FileKind};
pub use parser::{parse, parse_trusted};
