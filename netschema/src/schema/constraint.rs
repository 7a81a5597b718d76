//! Constraints attached to scalar types.

use crate::schema::reporting::SchemaError;
use crate::xml::Node;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    Bitmap(BitmapConstraint),
}

impl Constraint {
    pub fn name(&self) -> &'static str {
        match self {
            Constraint::Bitmap(_) => "bitmap",
        }
    }

    pub fn as_bitmap(&self) -> Option<&BitmapConstraint> {
        match self {
            Constraint::Bitmap(bitmap) => Some(bitmap),
        }
    }
}

/// Names for the bits of an integer, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitmapConstraint {
    bits: Vec<(String, u32)>,
}

impl BitmapConstraint {
    pub fn new() -> BitmapConstraint {
        BitmapConstraint::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: u32) {
        self.bits.push((name.into(), value));
    }

    pub fn bits(&self) -> impl ExactSizeIterator<Item = (&str, u32)> + Clone + '_ {
        self.bits.iter().map(|(name, value)| (name.as_str(), *value))
    }

    pub fn value(&self, name: &str) -> Option<u32> {
        self.bits().find(|(bit, _)| *bit == name).map(|(_, value)| value)
    }

    pub fn name(&self, value: u32) -> Option<&str> {
        self.bits().find(|(_, bit)| *bit == value).map(|(name, _)| name)
    }
}

/// Build a bitmap from the children of a node, where each child names a bit
/// and contains its value:
///
/// ```xml
/// <define name="flags" type="uint32" constraint="bitmap">
///   <up>0x1</up>
///   <running>0x40</running>
/// </define>
/// ```
pub fn build_bitmap_constraint(node: &Node) -> Result<BitmapConstraint, SchemaError> {
    let mut bitmap = BitmapConstraint::new();

    for child in node.children() {
        let value = child
            .text()
            .and_then(parse_unsigned)
            .and_then(|value| u32::try_from(value).ok());

        match value {
            Some(value) => bitmap.push(child.name(), value),
            None => {
                return Err(SchemaError::BadConstraint {
                    span: child.span(),
                    element: child.name().to_owned(),
                })
            }
        }
    }

    Ok(bitmap)
}

/// Parse an unsigned integer literal the way C's `strtoul` does with base 0:
/// `0x` introduces hexadecimal, a leading `0` octal, and anything else is
/// decimal. Unlike `strtoul` the whole string must be consumed.
pub fn parse_unsigned(text: &str) -> Option<u64> {
    let text = text.trim();
    let (digits, radix) = if let Some(hex) = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        (hex, 16)
    } else if text.len() > 1 && text.starts_with('0') {
        (&text[1..], 8)
    } else {
        (text, 10)
    };

    // `from_str_radix` accepts a leading `+`, which `strtoul` would not
    // accept after the prefix.
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    u64::from_str_radix(digits, radix).ok()
}
