//! Array notations.
//!
//! A notation is an alternate textual encoding for arrays of a particular
//! scalar kind. For example an array of bytes annotated with the `ipv4addr`
//! notation is written as `192.168.1.1` rather than as a list of four bytes.
//!
//! The notations known to the process are kept in a [`NotationRegistry`]. The
//! registry is populated once at startup, then frozen: [`NotationRegistry::install`]
//! publishes it for the rest of the process and [`NotationRegistry::global`]
//! hands out shared references to it.

use itertools::Itertools;
use once_cell::sync::OnceCell;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use uuid::Uuid;

use crate::schema::types::ScalarKind;

/// The maximum number of notations a registry can hold.
pub const MAX_NOTATIONS: usize = 64;

pub type ParseFn = fn(&str) -> Option<Vec<u8>>;
pub type PrintFn = fn(&[u8]) -> Option<String>;

#[derive(Debug, Clone)]
pub struct Notation {
    name: String,
    element_kind: ScalarKind,
    parse: ParseFn,
    print: PrintFn,
}

impl Notation {
    pub fn new(
        name: impl Into<String>,
        element_kind: ScalarKind,
        parse: ParseFn,
        print: PrintFn,
    ) -> Notation {
        Notation {
            name: name.into(),
            element_kind,
            parse,
            print,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The scalar kind of the array elements this notation applies to.
    pub fn element_kind(&self) -> ScalarKind {
        self.element_kind
    }

    /// Convert the textual form into array elements.
    pub fn parse(&self, text: &str) -> Option<Vec<u8>> {
        (self.parse)(text)
    }

    /// Convert array elements into the textual form.
    pub fn print(&self, data: &[u8]) -> Option<String> {
        (self.print)(data)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    CapacityExceeded { name: String },
    DuplicateNotation { name: String },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::CapacityExceeded { name } => write!(
                f,
                "cannot register notation `{name}`: at most {MAX_NOTATIONS} notations are supported"
            ),
            RegistryError::DuplicateNotation { name } => {
                write!(f, "notation `{name}` is already registered")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

static GLOBAL_REGISTRY: OnceCell<NotationRegistry> = OnceCell::new();

#[derive(Debug, Clone, Default)]
pub struct NotationRegistry {
    notations: Vec<Arc<Notation>>,
}

impl NotationRegistry {
    /// Construct an empty registry.
    pub fn new() -> NotationRegistry {
        NotationRegistry::default()
    }

    /// Construct a registry containing the builtin notations.
    pub fn with_builtins() -> NotationRegistry {
        let mut registry = NotationRegistry::new();
        for notation in builtin_notations() {
            // The builtins have distinct names and fit well within the capacity
            if let Err(error) = registry.register(notation) {
                unreachable!("{error}");
            }
        }
        registry
    }

    pub fn register(&mut self, notation: Notation) -> Result<Arc<Notation>, RegistryError> {
        if self.lookup(notation.name()).is_some() {
            return Err(RegistryError::DuplicateNotation {
                name: notation.name,
            });
        }
        if self.notations.len() >= MAX_NOTATIONS {
            return Err(RegistryError::CapacityExceeded {
                name: notation.name,
            });
        }

        let notation = Arc::new(notation);
        self.notations.push(notation.clone());
        Ok(notation)
    }

    pub fn lookup(&self, name: &str) -> Option<&Arc<Notation>> {
        self.notations.iter().find(|notation| notation.name() == name)
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = &Arc<Notation>> {
        self.notations.iter()
    }

    pub fn len(&self) -> usize {
        self.notations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notations.is_empty()
    }

    /// Publish `registry` as the process wide registry. This can only be done
    /// once, and only before the first call to [`NotationRegistry::global`];
    /// otherwise the registry is handed back.
    pub fn install(registry: NotationRegistry) -> Result<(), NotationRegistry> {
        GLOBAL_REGISTRY.set(registry)
    }

    /// The process wide registry, which defaults to the builtin notations if
    /// none was installed.
    pub fn global() -> &'static NotationRegistry {
        GLOBAL_REGISTRY.get_or_init(NotationRegistry::with_builtins)
    }
}

fn builtin_notations() -> [Notation; 4] {
    [
        Notation::new("ipv4addr", ScalarKind::Byte, parse_ipv4addr, print_ipv4addr),
        Notation::new("ipv6addr", ScalarKind::Byte, parse_ipv6addr, print_ipv6addr),
        Notation::new("hwaddr", ScalarKind::Byte, parse_hwaddr, print_hwaddr),
        Notation::new("uuid", ScalarKind::Byte, parse_uuid, print_uuid),
    ]
}

fn parse_ipv4addr(text: &str) -> Option<Vec<u8>> {
    let addr = text.parse::<Ipv4Addr>().ok()?;
    Some(addr.octets().to_vec())
}

fn print_ipv4addr(data: &[u8]) -> Option<String> {
    let octets = <[u8; 4]>::try_from(data).ok()?;
    Some(Ipv4Addr::from(octets).to_string())
}

fn parse_ipv6addr(text: &str) -> Option<Vec<u8>> {
    let addr = text.parse::<Ipv6Addr>().ok()?;
    Some(addr.octets().to_vec())
}

fn print_ipv6addr(data: &[u8]) -> Option<String> {
    let octets = <[u8; 16]>::try_from(data).ok()?;
    Some(Ipv6Addr::from(octets).to_string())
}

fn parse_hex_octet(text: &str) -> Option<u8> {
    match text.len() {
        1 | 2 if text.chars().all(|c| c.is_ascii_hexdigit()) => {
            u8::from_str_radix(text, 16).ok()
        }
        _ => None,
    }
}

fn parse_hwaddr(text: &str) -> Option<Vec<u8>> {
    if text.is_empty() {
        return None;
    }
    text.split(':').map(parse_hex_octet).collect()
}

fn print_hwaddr(data: &[u8]) -> Option<String> {
    if data.is_empty() {
        return None;
    }
    Some(format!("{:02x}", data.iter().format(":")))
}

fn parse_uuid(text: &str) -> Option<Vec<u8>> {
    let uuid = Uuid::try_parse(text).ok()?;
    Some(uuid.as_bytes().to_vec())
}

fn print_uuid(data: &[u8]) -> Option<String> {
    let uuid = Uuid::from_slice(data).ok()?;
    Some(uuid.hyphenated().to_string())
}
