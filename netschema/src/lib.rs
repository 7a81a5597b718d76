//! A compiler for network configuration schemas.
//!
//! Schema documents describe the types exchanged with a configuration
//! daemon: scalars, structs, dicts and arrays, arranged in nested scopes,
//! along with the services and methods that use them. [`xml`] reads a
//! document into an element tree and [`schema`] compiles that tree into a
//! type graph.

// #![warn(rust_2018_idioms)]

pub mod driver;
pub mod schema;
pub mod source;
pub mod xml;

// Public exports
pub use driver::{Driver, Status};

/// Identifies the compiler in bug reports.
pub const COMPILER_VERSION: &str = concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"));
