use codespan_reporting::diagnostic::{Diagnostic, Label};
use std::fmt;

use crate::schema::types::{Class, ScalarKind};
use crate::source::{FileId, Span};

/// Errors encountered while building a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// A top level element other than `define` or `service`.
    UnsupportedElement { span: Span, name: String },
    MissingAttribute {
        span: Span,
        element: String,
        attribute: &'static str,
    },
    /// A keyword was used as the name of a type or service.
    ReservedName { span: Span, name: String },
    DuplicateDefinition { span: Span, name: String },
    DuplicateMember { span: Span, name: String },
    UnknownType {
        span: Span,
        name: String,
        /// The type being defined, if `name` was referenced as its base type.
        base_of: Option<String>,
        suggestion: Option<String>,
    },
    /// More than one type element was found where exactly one was expected.
    AmbiguousType { span: Span },
    /// No type element was found where exactly one was expected.
    EmptyTypeContext { span: Span },
    UnknownClass { span: Span, class: String },
    /// A bit of a bitmap constraint did not contain an unsigned integer.
    BadConstraint { span: Span, element: String },
    UnknownNotation { span: Span, name: String },
    IncompatibleNotation {
        span: Span,
        name: String,
        notation_kind: ScalarKind,
        element_kind: ScalarKind,
    },
    InvalidLength {
        span: Span,
        attribute: &'static str,
        value: String,
    },
    InvertedLength { span: Span, minlen: u64, maxlen: u64 },
    /// A struct or dict member without a name.
    UnnamedMember { span: Span, class: Class },
    NotImplemented { span: Span, feature: &'static str },
}

impl SchemaError {
    pub fn span(&self) -> Span {
        match self {
            SchemaError::UnsupportedElement { span, .. }
            | SchemaError::MissingAttribute { span, .. }
            | SchemaError::ReservedName { span, .. }
            | SchemaError::DuplicateDefinition { span, .. }
            | SchemaError::DuplicateMember { span, .. }
            | SchemaError::UnknownType { span, .. }
            | SchemaError::AmbiguousType { span }
            | SchemaError::EmptyTypeContext { span }
            | SchemaError::UnknownClass { span, .. }
            | SchemaError::BadConstraint { span, .. }
            | SchemaError::UnknownNotation { span, .. }
            | SchemaError::IncompatibleNotation { span, .. }
            | SchemaError::InvalidLength { span, .. }
            | SchemaError::InvertedLength { span, .. }
            | SchemaError::UnnamedMember { span, .. }
            | SchemaError::NotImplemented { span, .. } => *span,
        }
    }

    pub fn message(&self) -> String {
        match self {
            SchemaError::UnsupportedElement { name, .. } => {
                format!("unsupported schema element <{name}>")
            }
            SchemaError::MissingAttribute {
                element, attribute, ..
            } => format!("<{element}> element lacks `{attribute}` attribute"),
            SchemaError::ReservedName { name, .. } => {
                format!("`{name}` is a reserved name")
            }
            SchemaError::DuplicateDefinition { name, .. } => {
                format!("attempt to redefine type `{name}`")
            }
            SchemaError::DuplicateMember { name, .. } => {
                format!("member `{name}` is defined more than once")
            }
            SchemaError::UnknownType {
                name,
                base_of: Some(defined),
                ..
            } => format!("definition of `{defined}` references unknown base type `{name}`"),
            SchemaError::UnknownType { name, .. } => format!("unknown type `{name}`"),
            SchemaError::AmbiguousType { .. } => "definition of type is ambiguous".to_owned(),
            SchemaError::EmptyTypeContext { .. } => {
                "cannot build type, no type element in this context".to_owned()
            }
            SchemaError::UnknownClass { class, .. } => format!("unknown class `{class}`"),
            SchemaError::BadConstraint { element, .. } => {
                format!("bad bit value for <{element}> in bitmap constraint")
            }
            SchemaError::UnknownNotation { name, .. } => format!("unknown notation `{name}`"),
            SchemaError::IncompatibleNotation { name, .. } => {
                format!("incompatible notation `{name}`")
            }
            SchemaError::InvalidLength {
                attribute, value, ..
            } => format!("invalid `{attribute}` value `{value}`"),
            SchemaError::InvertedLength { minlen, maxlen, .. } => {
                format!("`minlen` of {minlen} is greater than `maxlen` of {maxlen}")
            }
            SchemaError::UnnamedMember { class, .. } => {
                format!("{} member without a name", class.name())
            }
            SchemaError::NotImplemented { feature, .. } => format!("{feature} not implemented"),
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic<FileId> {
        let labels = |message: &str| match self.span() {
            Span::Range(range) => vec![Label::primary(range.file_id(), range).with_message(message)],
            Span::Empty => Vec::new(),
        };

        let diagnostic = Diagnostic::error().with_message(self.message());
        match self {
            SchemaError::UnsupportedElement { .. } => diagnostic
                .with_labels(labels("unsupported element"))
                .with_notes(vec![
                    "expected a <define> or <service> element".to_owned()
                ]),
            SchemaError::MissingAttribute { attribute, .. } => diagnostic
                .with_labels(labels(&format!("missing `{attribute}`"))),
            SchemaError::ReservedName { .. } => diagnostic
                .with_labels(labels("reserved name"))
                .with_notes(vec![format!(
                    "the reserved names are {}",
                    itertools::join(super::RESERVED_NAMES.iter().map(|name| format!("`{name}`")), ", ")
                )]),
            SchemaError::DuplicateDefinition { .. } => {
                diagnostic.with_labels(labels("already defined in this scope"))
            }
            SchemaError::DuplicateMember { .. } => {
                diagnostic.with_labels(labels("duplicate member"))
            }
            SchemaError::UnknownType { suggestion, .. } => {
                let diagnostic = diagnostic.with_labels(labels("unknown type"));
                match suggestion {
                    Some(suggestion) => {
                        diagnostic.with_notes(vec![format!("help: did you mean `{suggestion}`?")])
                    }
                    None => diagnostic,
                }
            }
            SchemaError::AmbiguousType { .. } => diagnostic
                .with_labels(labels("unexpected second type"))
                .with_notes(vec!["expected exactly one type element".to_owned()]),
            SchemaError::EmptyTypeContext { .. } => diagnostic
                .with_labels(labels("no type"))
                .with_notes(vec!["expected exactly one type element".to_owned()]),
            SchemaError::UnknownClass { .. } => diagnostic
                .with_labels(labels("unknown class"))
                .with_notes(vec![
                    "expected one of `struct`, `dict` or `array`".to_owned()
                ]),
            SchemaError::BadConstraint { .. } => diagnostic
                .with_labels(labels("bad bit value"))
                .with_notes(vec!["expected an unsigned integer".to_owned()]),
            SchemaError::UnknownNotation { .. } => {
                diagnostic.with_labels(labels("unknown notation"))
            }
            SchemaError::IncompatibleNotation {
                name,
                notation_kind,
                element_kind,
                ..
            } => diagnostic
                .with_labels(labels(&format!("array of `{element_kind}`")))
                .with_notes(vec![format!(
                    "notation `{name}` applies to arrays of `{notation_kind}`"
                )]),
            SchemaError::InvalidLength { .. } => diagnostic
                .with_labels(labels("invalid length"))
                .with_notes(vec!["expected an unsigned integer".to_owned()]),
            SchemaError::InvertedLength { .. } => {
                diagnostic.with_labels(labels("empty length range"))
            }
            SchemaError::UnnamedMember { .. } => diagnostic
                .with_labels(labels("unnamed member"))
                .with_notes(vec![
                    "members are named with `<name class=\"...\">` or `<name type=\"...\"/>`"
                        .to_owned(),
                ]),
            SchemaError::NotImplemented { .. } => {
                diagnostic.with_labels(labels("not implemented"))
            }
        }
    }
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

impl std::error::Error for SchemaError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{ByteRange, FileRange};

    #[test]
    fn diagnostics_point_at_the_node() {
        let range = FileRange::new(0, ByteRange::new(10, 24));
        let error = SchemaError::UnknownType {
            span: Span::Range(range),
            name: "uint23".to_owned(),
            base_of: None,
            suggestion: Some("uint32".to_owned()),
        };

        let diagnostic = error.to_diagnostic();
        assert_eq!(diagnostic.message, "unknown type `uint23`");
        assert_eq!(diagnostic.labels.len(), 1);
        assert_eq!(diagnostic.labels[0].range, 10..24);
        assert_eq!(diagnostic.notes, ["help: did you mean `uint32`?"]);
    }

    #[test]
    fn nodes_without_location_have_no_labels() {
        let error = SchemaError::EmptyTypeContext { span: Span::Empty };

        assert!(error.to_diagnostic().labels.is_empty());
        assert_eq!(
            error.to_string(),
            "cannot build type, no type element in this context",
        );
    }

    #[test]
    fn base_type_errors_name_the_definition() {
        let error = SchemaError::UnknownType {
            span: Span::Empty,
            name: "strng".to_owned(),
            base_of: Some("ipaddr".to_owned()),
            suggestion: None,
        };

        assert_eq!(
            error.message(),
            "definition of `ipaddr` references unknown base type `strng`",
        );
    }
}
