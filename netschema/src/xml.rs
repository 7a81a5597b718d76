//! Schema documents.
//!
//! The schema builder works on a generic element tree: each [`Node`] has a
//! name, attributes, ordered children and optional text content. Trees are
//! either read from a file with [`read_document`], or built in code:
//!
//! ```
//! use netschema::xml::Node;
//!
//! let define = Node::new("define")
//!     .with_attr("name", "ifindex")
//!     .with_attr("type", "uint32");
//! let schema = Node::new("schema").with_child(define);
//!
//! assert_eq!(schema.children()[0].attr("name"), Some("ifindex"));
//! ```

use crate::source::Span;

pub mod lexer;
pub mod parser;

pub use self::parser::{read_document, ReadError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Node>,
    text: Option<String>,
    span: Span,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Node {
        Node {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
            text: None,
            span: Span::Empty,
        }
    }

    /// Set an attribute, replacing any previous value.
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Node {
        self.set_attr(name.into(), value.into());
        self
    }

    pub fn with_child(mut self, child: Node) -> Node {
        self.children.push(child);
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = Node>) -> Node {
        self.children.extend(children);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Node {
        self.text = Some(text.into());
        self
    }

    pub fn with_span(mut self, span: impl Into<Span>) -> Node {
        self.span = span.into();
        self
    }

    pub(crate) fn set_attr(&mut self, name: String, value: String) {
        match self.attributes.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, existing)) => *existing = value,
            None => self.attributes.push((name, value)),
        }
    }

    pub(crate) fn push_child(&mut self, child: Node) {
        self.children.push(child);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(attr, _)| attr == name)
            .map(|(_, value)| value.as_str())
    }

    /// Attributes in document order.
    pub fn attributes(&self) -> impl ExactSizeIterator<Item = (&str, &str)> + '_ {
        self.attributes
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    /// The first child with the given name.
    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|child| child.name == name)
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn span(&self) -> Span {
        self.span
    }
}
