use codespan_reporting::diagnostic::{Diagnostic, Label};
use logos::{Filter, Logos};

use crate::source::{BytePos, ByteRange, FileId, FileRange};

/// Tokens between tags.
#[derive(Clone, Debug, PartialEq, Eq, Logos)]
#[logos(extras = FileId)]
pub enum Content<'source> {
    #[regex(r"[^<]+")]
    Text(&'source str),

    #[token("<")]
    StartTagOpen,
    #[token("</")]
    EndTagOpen,

    #[token("<!--", |lexer| skip_past(lexer, "-->"))]
    #[token("<?", |lexer| skip_past(lexer, "?>"))]
    Unterminated(&'static str),

    #[error]
    Error,
}

/// Tokens inside a tag.
#[derive(Clone, Debug, PartialEq, Eq, Logos)]
#[logos(extras = FileId)]
pub enum Markup<'source> {
    #[regex(r"[a-zA-Z_:][a-zA-Z0-9_:.\-]*")]
    Name(&'source str),
    #[regex(r#""[^"<]*""#, |lexer| &lexer.slice()[1..(lexer.slice().len() - 1)])]
    #[regex(r"'[^'<]*'", |lexer| &lexer.slice()[1..(lexer.slice().len() - 1)])]
    Value(&'source str),

    #[token("=")]
    Equals,
    #[token(">")]
    TagClose,
    #[token("/>")]
    EmptyTagClose,

    #[error]
    #[regex(r"[ \t\r\n]+", logos::skip)]
    Error,
}

/// Skip a comment or processing instruction, up to and including `close`.
fn skip_past<'source>(
    lexer: &mut logos::Lexer<'source, Content<'source>>,
    close: &'static str,
) -> Filter<&'static str> {
    match lexer.remainder().find(close) {
        Some(offset) => {
            lexer.bump(offset + close.len());
            Filter::Skip
        }
        None => {
            lexer.bump(lexer.remainder().len());
            Filter::Emit(close)
        }
    }
}

impl<'source> Content<'source> {
    pub fn description(&self) -> &'static str {
        match self {
            Content::Text(_) => "text",
            Content::StartTagOpen => "<",
            Content::EndTagOpen => "</",
            Content::Unterminated(_) => "unterminated markup",
            Content::Error => "error",
        }
    }
}

impl<'source> Markup<'source> {
    pub fn description(&self) -> &'static str {
        match self {
            Markup::Name(_) => "name",
            Markup::Value(_) => "attribute value",
            Markup::Equals => "=",
            Markup::TagClose => ">",
            Markup::EmptyTagClose => "/>",
            Markup::Error => "error",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    UnexpectedCharacter { range: FileRange },
    Unterminated { range: FileRange, close: &'static str },
}

impl Error {
    pub fn range(&self) -> FileRange {
        match self {
            Error::UnexpectedCharacter { range } | Error::Unterminated { range, .. } => *range,
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic<FileId> {
        match self {
            Error::UnexpectedCharacter { range } => Diagnostic::error()
                .with_message("unexpected character")
                .with_labels(vec![Label::primary(range.file_id(), *range)]),
            Error::Unterminated { range, close } => Diagnostic::error()
                .with_message("unterminated markup")
                .with_labels(vec![Label::primary(range.file_id(), *range)
                    .with_message("starts here")])
                .with_notes(vec![format!("Help: expected `{close}` before the end of the file")]),
        }
    }
}

enum Mode<'source> {
    Content(logos::Lexer<'source, Content<'source>>),
    Markup(logos::Lexer<'source, Markup<'source>>),
    Switching,
}

/// A token stream that reads either content or markup tokens, depending on
/// what the reader expects next.
pub struct Tokens<'source> {
    mode: Mode<'source>,
}

impl<'source> Tokens<'source> {
    pub fn new(file_id: FileId, source: &'source str) -> Tokens<'source> {
        assert!(
            source.len() <= u32::MAX as usize,
            "`source` must be less than 4GiB in length"
        );

        Tokens {
            mode: Mode::Content(Content::lexer_with_extras(source, file_id)),
        }
    }

    pub fn next_content(&mut self) -> Option<Result<(FileRange, Content<'source>), Error>> {
        let mut lexer = match std::mem::replace(&mut self.mode, Mode::Switching) {
            Mode::Content(lexer) => lexer,
            Mode::Markup(lexer) => lexer.morph(),
            Mode::Switching => return None,
        };
        let token = lexer.next();
        let range = file_range(lexer.extras, lexer.span());
        self.mode = Mode::Content(lexer);

        match token? {
            Content::Error => Some(Err(Error::UnexpectedCharacter { range })),
            Content::Unterminated(close) => Some(Err(Error::Unterminated { range, close })),
            token => Some(Ok((range, token))),
        }
    }

    pub fn next_markup(&mut self) -> Option<Result<(FileRange, Markup<'source>), Error>> {
        let mut lexer = match std::mem::replace(&mut self.mode, Mode::Switching) {
            Mode::Content(lexer) => lexer.morph(),
            Mode::Markup(lexer) => lexer,
            Mode::Switching => return None,
        };
        let token = lexer.next();
        let range = file_range(lexer.extras, lexer.span());
        self.mode = Mode::Markup(lexer);

        match token? {
            Markup::Error => Some(Err(Error::UnexpectedCharacter { range })),
            token => Some(Ok((range, token))),
        }
    }

    /// An empty range at the current position.
    pub fn position(&self) -> Option<FileRange> {
        let (file_id, end) = match &self.mode {
            Mode::Content(lexer) => (lexer.extras, lexer.span().end),
            Mode::Markup(lexer) => (lexer.extras, lexer.span().end),
            Mode::Switching => return None,
        };
        Some(file_range(file_id, end..end))
    }
}

fn file_range(file_id: FileId, range: std::ops::Range<usize>) -> FileRange {
    let start = range.start as BytePos;
    let end = range.end as BytePos;
    FileRange::new(file_id, ByteRange::new(start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(source: &str) -> Vec<Content<'_>> {
        Content::lexer_with_extras(source, 0).collect()
    }

    #[test]
    fn content_skips_comments_and_declarations() {
        let tokens = content("<?xml version=\"1.0\"?> <!-- a <comment> --><");

        assert_eq!(tokens, [Content::Text(" "), Content::StartTagOpen]);
    }

    #[test]
    fn unterminated_comment() {
        let tokens = content("text <!-- no end");

        assert_eq!(tokens, [Content::Text("text "), Content::Unterminated("-->")]);
    }

    #[test]
    fn markup_tokens() {
        let tokens: Vec<_> =
            Markup::lexer_with_extras(r#"define name="ifindex" type='uint32'/>"#, 0).collect();

        assert_eq!(
            tokens,
            [
                Markup::Name("define"),
                Markup::Name("name"),
                Markup::Equals,
                Markup::Value("ifindex"),
                Markup::Name("type"),
                Markup::Equals,
                Markup::Value("uint32"),
                Markup::EmptyTagClose,
            ],
        );
    }

    #[test]
    fn switching_modes_keeps_the_position() {
        let mut tokens = Tokens::new(0, "<uint32>7</uint32>");

        let (range, token) = tokens.next_content().unwrap().unwrap();
        assert_eq!(token, Content::StartTagOpen);
        assert_eq!((range.start(), range.end()), (0, 1));

        let (range, token) = tokens.next_markup().unwrap().unwrap();
        assert_eq!(token, Markup::Name("uint32"));
        assert_eq!((range.start(), range.end()), (1, 7));

        assert_eq!(tokens.next_markup().unwrap().unwrap().1, Markup::TagClose);
        assert_eq!(tokens.next_content().unwrap().unwrap().1, Content::Text("7"));
        assert_eq!(tokens.next_content().unwrap().unwrap().1, Content::EndTagOpen);
        assert_eq!(
            tokens.next_markup().unwrap().unwrap().1,
            Markup::Name("uint32"),
        );
        assert_eq!(tokens.next_markup().unwrap().unwrap().1, Markup::TagClose);
        assert!(tokens.next_content().is_none());
    }
}
