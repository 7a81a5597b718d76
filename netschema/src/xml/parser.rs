//! Reading schema documents.
//!
//! This reads the subset of XML used by schema files: elements, attributes,
//! text, comments and processing instructions. Document type declarations and
//! CDATA sections are not supported.

use codespan_reporting::diagnostic::{Diagnostic, Label};
use fxhash::FxHashSet;
use std::borrow::Cow;

use crate::source::{BytePos, ByteRange, FileId, FileRange};
use crate::xml::lexer::{self, Content, Markup, Tokens};
use crate::xml::Node;

/// The deepest element nesting a document may have.
pub const MAX_DEPTH: usize = 256;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadError {
    Lexer(lexer::Error),
    UnexpectedToken {
        range: FileRange,
        found: &'static str,
        expected: &'static str,
    },
    UnexpectedEof {
        range: Option<FileRange>,
        expected: &'static str,
    },
    MismatchedEndTag {
        range: FileRange,
        open_range: FileRange,
        expected: String,
        found: String,
    },
    DuplicateAttribute {
        range: FileRange,
        name: String,
    },
    UnknownEntity {
        range: FileRange,
        entity: String,
    },
    TrailingContent {
        range: FileRange,
    },
    /// Elements were nested more than [`MAX_DEPTH`] levels deep.
    NestingTooDeep {
        range: FileRange,
    },
}

impl From<lexer::Error> for ReadError {
    fn from(error: lexer::Error) -> ReadError {
        ReadError::Lexer(error)
    }
}

impl ReadError {
    pub fn to_diagnostic(&self) -> Diagnostic<FileId> {
        let primary = |range: &FileRange| Label::primary(range.file_id(), *range);

        match self {
            ReadError::Lexer(error) => error.to_diagnostic(),
            ReadError::UnexpectedToken {
                range,
                found,
                expected,
            } => Diagnostic::error()
                .with_message(format!("unexpected token {found}"))
                .with_labels(vec![primary(range).with_message("unexpected token")])
                .with_notes(vec![format!("expected {expected}")]),
            ReadError::UnexpectedEof { range, expected } => Diagnostic::error()
                .with_message("unexpected end of file")
                .with_labels(range.iter().map(primary).collect())
                .with_notes(vec![format!("expected {expected}")]),
            ReadError::MismatchedEndTag {
                range,
                open_range,
                expected,
                found,
            } => Diagnostic::error()
                .with_message(format!("mismatched end tag `</{found}>`"))
                .with_labels(vec![
                    primary(range).with_message(format!("expected `</{expected}>`")),
                    Label::secondary(open_range.file_id(), *open_range)
                        .with_message("element opened here"),
                ]),
            ReadError::DuplicateAttribute { range, name } => Diagnostic::error()
                .with_message(format!("attribute `{name}` is given more than once"))
                .with_labels(vec![primary(range).with_message("duplicate attribute")]),
            ReadError::UnknownEntity { range, entity } => Diagnostic::error()
                .with_message(format!("unknown entity `&{entity};`"))
                .with_labels(vec![primary(range)]),
            ReadError::TrailingContent { range } => Diagnostic::error()
                .with_message("content after the root element")
                .with_labels(vec![primary(range)])
                .with_notes(vec!["a document has exactly one root element".to_owned()]),
            ReadError::NestingTooDeep { range } => Diagnostic::error()
                .with_message("elements are nested too deeply")
                .with_labels(vec![primary(range).with_message("element opened here")])
                .with_notes(vec![format!("at most {MAX_DEPTH} levels of nesting are supported")]),
        }
    }
}

/// Read the root element of a document.
pub fn read_document(file_id: FileId, source: &str) -> Result<Node, ReadError> {
    let mut tokens = Tokens::new(file_id, source);

    let root = loop {
        match tokens.next_content().transpose()? {
            Some((_, Content::Text(text))) if is_blank(text) => {}
            Some((range, Content::StartTagOpen)) => break read_element(&mut tokens, range, 1)?,
            Some((range, token)) => {
                return Err(ReadError::UnexpectedToken {
                    range,
                    found: token.description(),
                    expected: "root element",
                })
            }
            None => {
                return Err(ReadError::UnexpectedEof {
                    range: tokens.position(),
                    expected: "root element",
                })
            }
        }
    };

    while let Some((range, token)) = tokens.next_content().transpose()? {
        match token {
            Content::Text(text) if is_blank(text) => {}
            _ => return Err(ReadError::TrailingContent { range }),
        }
    }

    Ok(root)
}

fn is_blank(text: &str) -> bool {
    text.chars().all(|c| c.is_ascii_whitespace())
}

fn next_markup<'source>(
    tokens: &mut Tokens<'source>,
    expected: &'static str,
) -> Result<(FileRange, Markup<'source>), ReadError> {
    match tokens.next_markup().transpose()? {
        Some(token) => Ok(token),
        None => Err(ReadError::UnexpectedEof {
            range: tokens.position(),
            expected,
        }),
    }
}

fn expect_name<'source>(
    tokens: &mut Tokens<'source>,
    expected: &'static str,
) -> Result<(FileRange, &'source str), ReadError> {
    match next_markup(tokens, expected)? {
        (range, Markup::Name(name)) => Ok((range, name)),
        (range, token) => Err(ReadError::UnexpectedToken {
            range,
            found: token.description(),
            expected,
        }),
    }
}

/// Read an element whose `<` has just been consumed. `depth` counts the
/// element itself, the root being at depth 1.
fn read_element(
    tokens: &mut Tokens<'_>,
    open: FileRange,
    depth: usize,
) -> Result<Node, ReadError> {
    if depth > MAX_DEPTH {
        return Err(ReadError::NestingTooDeep { range: open });
    }

    let (name_range, name) = expect_name(tokens, "element name")?;
    let mut node = Node::new(name);
    let mut seen = FxHashSet::default();

    loop {
        match next_markup(tokens, "attribute or `>`")? {
            (range, Markup::Name(attr)) => {
                if !seen.insert(attr) {
                    return Err(ReadError::DuplicateAttribute {
                        range,
                        name: attr.to_owned(),
                    });
                }
                match next_markup(tokens, "`=`")? {
                    (_, Markup::Equals) => {}
                    (range, token) => {
                        return Err(unexpected(range, token.description(), "`=`"))
                    }
                }
                let value = match next_markup(tokens, "attribute value")? {
                    (range, Markup::Value(value)) => {
                        decode(value, range.file_id(), range.start() + 1)?
                    }
                    (range, token) => {
                        return Err(unexpected(range, token.description(), "attribute value"))
                    }
                };
                node.set_attr(attr.to_owned(), value.into_owned());
            }
            (range, Markup::EmptyTagClose) => {
                let span = open.merge(&range);
                return Ok(node.with_span(span));
            }
            (_, Markup::TagClose) => break,
            (range, token) => {
                return Err(unexpected(range, token.description(), "attribute or `>`"))
            }
        }
    }

    let mut text = String::new();
    loop {
        let (range, token) = match tokens.next_content().transpose()? {
            Some(token) => token,
            None => {
                return Err(ReadError::UnexpectedEof {
                    range: tokens.position(),
                    expected: "end tag",
                })
            }
        };

        match token {
            Content::Text(chunk) => {
                text.push_str(&decode(chunk, range.file_id(), range.start())?);
            }
            Content::StartTagOpen => {
                let child = read_element(tokens, range, depth + 1)?;
                node.push_child(child);
            }
            Content::EndTagOpen => {
                let (end_range, end_name) = expect_name(tokens, "element name")?;
                if end_name != name {
                    return Err(ReadError::MismatchedEndTag {
                        range: end_range,
                        open_range: name_range,
                        expected: name.to_owned(),
                        found: end_name.to_owned(),
                    });
                }
                let close = match next_markup(tokens, "`>`")? {
                    (range, Markup::TagClose) => range,
                    (range, token) => return Err(unexpected(range, token.description(), "`>`")),
                };

                let text = text.trim();
                if !text.is_empty() {
                    node = node.with_text(text);
                }
                let span = open.merge(&close);
                return Ok(node.with_span(span));
            }
            token => return Err(unexpected(range, token.description(), "content or end tag")),
        }
    }
}

fn unexpected(range: FileRange, found: &'static str, expected: &'static str) -> ReadError {
    ReadError::UnexpectedToken {
        range,
        found,
        expected,
    }
}

/// Replace the predefined entities and character references in `text`, which
/// starts at byte `start` of the file `file_id`.
fn decode(text: &str, file_id: FileId, start: BytePos) -> Result<Cow<'_, str>, ReadError> {
    if !text.contains('&') {
        return Ok(Cow::Borrowed(text));
    }

    let unknown_entity = |entity: &str, offset: usize, len: usize| {
        let start = start + offset as BytePos;
        ReadError::UnknownEntity {
            range: FileRange::new(file_id, ByteRange::new(start, start + len as BytePos)),
            entity: entity.to_owned(),
        }
    };

    let mut decoded = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        decoded.push_str(&rest[..amp]);
        let offset = text.len() - rest.len() + amp;

        let reference = &rest[amp + 1..];
        match reference.split_once(';') {
            Some((entity, after)) => match entity_char(entity) {
                Some(c) => {
                    decoded.push(c);
                    rest = after;
                }
                None => return Err(unknown_entity(entity, offset, entity.len() + 2)),
            },
            None => return Err(unknown_entity(reference, offset, reference.len() + 1)),
        }
    }
    decoded.push_str(rest);

    Ok(Cow::Owned(decoded))
}

fn entity_char(entity: &str) -> Option<char> {
    match entity {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "amp" => Some('&'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => {
            let code = if let Some(hex) = entity.strip_prefix("#x") {
                u32::from_str_radix(hex, 16).ok()?
            } else if let Some(decimal) = entity.strip_prefix('#') {
                decimal.parse().ok()?
            } else {
                return None;
            };
            char::from_u32(code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(source: &str) -> Result<Node, ReadError> {
        read_document(0, source)
    }

    #[test]
    fn elements_attributes_and_text() {
        let source = r#"<?xml version="1.0" encoding="utf-8"?>
<!-- interface schema -->
<schema>
  <define name="flags" type="uint32" constraint="bitmap">
    <up> 0x1 </up>
    <running>0x40</running>
  </define>
  <define name='ifindex' type='uint32'/>
</schema>
"#;
        let root = read(source).unwrap();

        assert_eq!(root.name(), "schema");
        assert_eq!(root.text(), None);
        assert_eq!(root.children().len(), 2);

        let flags = &root.children()[0];
        assert_eq!(flags.attr("name"), Some("flags"));
        assert_eq!(flags.attr("constraint"), Some("bitmap"));
        let bits: Vec<_> = flags.children().iter().map(|bit| (bit.name(), bit.text())).collect();
        assert_eq!(bits, [("up", Some("0x1")), ("running", Some("0x40"))]);

        let ifindex = &root.children()[1];
        assert_eq!(ifindex.attr("type"), Some("uint32"));
        assert!(!ifindex.has_children());
    }

    #[test]
    fn spans_cover_the_element() {
        let source = "<schema><define name=\"a\"/></schema>";
        let root = read(source).unwrap();

        let range = root.span().file_range().unwrap();
        assert_eq!((range.start(), range.end()), (0, source.len() as BytePos));
        let define = root.children()[0].span().file_range().unwrap();
        assert_eq!(&source[std::ops::Range::from(define)], "<define name=\"a\"/>");
    }

    #[test]
    fn entities_are_decoded() {
        let root = read("<a title=\"&lt;&amp;&gt;\">&#65;&#x42;&quot;&apos;</a>").unwrap();

        assert_eq!(root.attr("title"), Some("<&>"));
        assert_eq!(root.text(), Some("AB\"'"));
    }

    #[test]
    fn unknown_entity() {
        let error = read("<a>&nbsp;</a>").unwrap_err();

        match error {
            ReadError::UnknownEntity { range, entity } => {
                assert_eq!(entity, "nbsp");
                assert_eq!((range.start(), range.end()), (3, 9));
            }
            error => panic!("unexpected error: {error:?}"),
        }
    }

    #[test]
    fn unterminated_entity() {
        assert!(matches!(
            read("<a>&amp</a>"),
            Err(ReadError::UnknownEntity { .. }),
        ));
    }

    #[test]
    fn mismatched_end_tag() {
        let error = read("<schema><define></schema></define>").unwrap_err();

        assert!(matches!(
            error,
            ReadError::MismatchedEndTag { expected, found, .. }
                if expected == "define" && found == "schema"
        ));
    }

    #[test]
    fn duplicate_attribute() {
        assert!(matches!(
            read("<define name=\"a\" name=\"b\"/>"),
            Err(ReadError::DuplicateAttribute { name, .. }) if name == "name"
        ));
    }

    #[test]
    fn unexpected_end_of_file() {
        assert!(matches!(
            read("<schema><define>"),
            Err(ReadError::UnexpectedEof { .. }),
        ));
        assert!(matches!(read("  "), Err(ReadError::UnexpectedEof { .. })));
    }

    #[test]
    fn trailing_content() {
        assert!(matches!(
            read("<schema/>\n<schema/>"),
            Err(ReadError::TrailingContent { .. }),
        ));
        assert!(read("<schema/>\n<!-- done -->\n").is_ok());
    }

    #[test]
    fn unterminated_comment() {
        assert!(matches!(
            read("<schema><!-- </schema>"),
            Err(ReadError::Lexer(lexer::Error::Unterminated { close: "-->", .. })),
        ));
    }

    #[test]
    fn nesting_is_limited() {
        let nested = |depth: usize| "<a>".repeat(depth) + &"</a>".repeat(depth);

        assert!(read(&nested(MAX_DEPTH)).is_ok());

        let source = nested(MAX_DEPTH + 1);
        match read(&source) {
            Err(ReadError::NestingTooDeep { range }) => {
                let start = (3 * MAX_DEPTH) as BytePos;
                assert_eq!((range.start(), range.end()), (start, start + 1));
            }
            result => panic!("unexpected result: {result:?}"),
        }

        // Far deeper than the stack would allow without the limit
        let source = nested(100_000);
        assert!(matches!(read(&source), Err(ReadError::NestingTooDeep { .. })));
    }
}
