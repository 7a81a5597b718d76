//! Rendering schemas as text.
//!
//! ```text
//! define ifindex = uint32;
//! define link = struct { name: string, index: ifindex };
//!
//! service interface "org.example.Interface" {
//!     method rename(ifindex, name: string);
//! }
//! ```

use fxhash::FxHashMap;
use pretty::{Doc, DocAllocator, DocBuilder, DocPtr, RefDoc};
use scoped_arena::Scope;

use crate::schema::constraint::Constraint;
use crate::schema::scope::{Method, ScopeId, Service};
use crate::schema::types::{NameType, Type, TypeId};
use crate::schema::Schema;

const INDENT: isize = 4;

pub struct Context<'schema, 'arena> {
    schema: &'schema Schema,
    /// The name each type is referred to by, the first definition winning.
    names: FxHashMap<TypeId, String>,
    scope: &'arena Scope<'arena>,
}

impl<'schema, 'arena> Context<'schema, 'arena> {
    pub fn new(schema: &'schema Schema, scope: &'arena Scope<'arena>) -> Context<'schema, 'arena> {
        let mut names = FxHashMap::default();
        collect_names(schema, schema.root(), None, &mut names);
        Context {
            schema,
            names,
            scope,
        }
    }

    /// The definitions, nested scopes and services of the whole schema.
    pub fn schema(&'arena self) -> DocBuilder<'arena, Self> {
        self.scope_items(self.schema.root())
    }

    fn scope_items(&'arena self, id: ScopeId) -> DocBuilder<'arena, Self> {
        let scopes = self.schema.scopes();
        let scope = scopes.scope(id);

        let definitions = scope
            .types()
            .map(|(name, r#type)| self.definition(name, r#type));
        let nested = (scope.children().iter())
            .filter(|child| !is_empty(self.schema, **child))
            .map(|child| self.nested_scope(*child));
        let services = scope.services().iter().map(|service| self.service(service));

        self.intersperse(definitions.chain(nested).chain(services), self.hardline())
    }

    fn nested_scope(&'arena self, id: ScopeId) -> DocBuilder<'arena, Self> {
        let name = self.schema.scopes().scope(id).name().unwrap_or("_");
        self.concat([
            self.text("scope"),
            self.space(),
            self.text(name.to_owned()),
            self.space(),
            self.text("{"),
            self.concat([self.hardline(), self.scope_items(id)])
                .nest(INDENT),
            self.hardline(),
            self.text("}"),
        ])
    }

    /// `define NAME = TYPE;`
    pub fn definition(&'arena self, name: &str, r#type: TypeId) -> DocBuilder<'arena, Self> {
        self.concat([
            self.concat([
                self.text("define"),
                self.space(),
                self.text(name.to_owned()),
                self.space(),
                self.text("="),
            ])
            .group(),
            self.space(),
            self.type_body(r#type),
            self.text(";"),
        ])
    }

    /// A reference to a type: its name if it has one, otherwise its structure.
    pub fn type_ref(&'arena self, r#type: TypeId) -> DocBuilder<'arena, Self> {
        match self.names.get(&r#type) {
            Some(name) => self.text(name.clone()),
            None => self.type_body(r#type),
        }
    }

    pub fn type_body(&'arena self, r#type: TypeId) -> DocBuilder<'arena, Self> {
        match &self.schema[r#type] {
            Type::Scalar(info) => match &info.constraint {
                None => self.text(info.kind.name()),
                Some(Constraint::Bitmap(bitmap)) => self.concat([
                    self.text(info.kind.name()),
                    self.space(),
                    self.text("bitmap"),
                    self.space(),
                    self.sequence(
                        self.text("{"),
                        bitmap.bits().map(|(name, value)| {
                            self.concat([
                                self.text(name.to_owned()),
                                self.space(),
                                self.text("="),
                                self.space(),
                                self.text(format!("{value:#x}")),
                            ])
                        }),
                        self.text(","),
                        self.text("}"),
                    ),
                ]),
            },
            Type::Struct(members) => {
                self.concat([self.text("struct"), self.space(), self.members(members)])
            }
            Type::Dict(members) => {
                self.concat([self.text("dict"), self.space(), self.members(members)])
            }
            Type::Array(info) => {
                let bounds = match (info.minlen, info.maxlen) {
                    (0, None) => self.nil(),
                    (minlen, maxlen) => self.concat([
                        self.text(";"),
                        self.space(),
                        self.text(minlen.to_string()),
                        self.text(".."),
                        match maxlen {
                            Some(maxlen) => self.text(maxlen.to_string()),
                            None => self.nil(),
                        },
                    ]),
                };
                let notation = match &info.notation {
                    Some(notation) => self.concat([
                        self.space(),
                        self.text("notation"),
                        self.space(),
                        self.text(notation.name().to_owned()),
                    ]),
                    None => self.nil(),
                };
                self.concat([
                    self.text("array"),
                    self.text("["),
                    self.type_ref(info.element),
                    bounds,
                    self.text("]"),
                    notation,
                ])
            }
        }
    }

    fn members(&'arena self, members: &[NameType]) -> DocBuilder<'arena, Self> {
        self.sequence(
            self.text("{"),
            members.iter().map(|member| self.name_type(member)),
            self.text(","),
            self.text("}"),
        )
    }

    fn name_type(&'arena self, member: &NameType) -> DocBuilder<'arena, Self> {
        match member.name() {
            Some(name) => self.concat([
                self.text(name.to_owned()),
                self.text(":"),
                self.space(),
                self.type_ref(member.r#type),
            ]),
            None => self.type_ref(member.r#type),
        }
    }

    pub fn service(&'arena self, service: &Service) -> DocBuilder<'arena, Self> {
        let header = self.concat([
            self.text("service"),
            self.space(),
            self.text(service.name.clone()),
            self.space(),
            self.text(format!("{:?}", service.interface)),
            self.space(),
        ]);
        if service.methods.is_empty() {
            return self.concat([header, self.text("{}")]);
        }

        self.concat([
            header,
            self.text("{"),
            self.concat(
                (service.methods.iter())
                    .map(|method| self.concat([self.hardline(), self.method(method)])),
            )
            .nest(INDENT),
            self.hardline(),
            self.text("}"),
        ])
    }

    fn method(&'arena self, method: &Method) -> DocBuilder<'arena, Self> {
        self.concat([
            self.text("method"),
            self.space(),
            self.text(method.name.clone()),
            self.text("("),
            self.intersperse(
                (method.arguments.iter()).map(|argument| self.name_type(argument)),
                self.concat([self.text(","), self.space()]),
            ),
            self.text(")"),
            self.text(";"),
        ])
    }

    pub fn sequence(
        &'arena self,
        start_delim: DocBuilder<'arena, Self>,
        docs: impl ExactSizeIterator<Item = DocBuilder<'arena, Self>> + Clone,
        separator: DocBuilder<'arena, Self>,
        end_delim: DocBuilder<'arena, Self>,
    ) -> DocBuilder<'arena, Self> {
        if docs.len() == 0 {
            self.concat([start_delim, end_delim])
        } else {
            DocBuilder::flat_alt(
                self.concat([
                    start_delim.clone(),
                    self.concat(
                        docs.clone()
                            .map(|doc| self.concat([self.hardline(), doc, separator.clone()])),
                    )
                    .nest(INDENT),
                    self.hardline(),
                    end_delim.clone(),
                ]),
                self.concat([
                    start_delim,
                    self.space(),
                    self.intersperse(docs, self.concat([separator, self.space()])),
                    self.space(),
                    end_delim,
                ]),
            )
            .group()
        }
    }
}

/// Record the names of the types defined in `id` and its permanent
/// descendants, qualified by the names of the enclosing scopes.
fn collect_names(
    schema: &Schema,
    id: ScopeId,
    prefix: Option<&str>,
    names: &mut FxHashMap<TypeId, String>,
) {
    let scope = schema.scopes().scope(id);
    let qualify = |name: &str| match prefix {
        Some(prefix) => format!("{prefix}.{name}"),
        None => name.to_owned(),
    };

    for (name, r#type) in scope.types() {
        names.entry(r#type).or_insert_with(|| qualify(name));
    }
    for child in scope.children() {
        if let Some(name) = schema.scopes().scope(*child).name() {
            collect_names(schema, *child, Some(&qualify(name)), names);
        }
    }
}

/// Scopes with nothing in them are left out of the output.
fn is_empty(schema: &Schema, id: ScopeId) -> bool {
    let scope = schema.scopes().scope(id);
    scope.types().len() == 0
        && scope.services().is_empty()
        && (scope.children().iter()).all(|child| is_empty(schema, *child))
}

impl<'schema, 'arena, A: 'arena> DocAllocator<'arena, A> for Context<'schema, 'arena> {
    type Doc = RefDoc<'arena, A>;

    #[inline]
    fn alloc(&'arena self, doc: Doc<'arena, Self::Doc, A>) -> Self::Doc {
        // Based on the `DocAllocator` implementation for `pretty::Arena`
        RefDoc(match doc {
            // Return 'static references for common variants to avoid some allocations
            Doc::Nil => &Doc::Nil,
            Doc::Hardline => &Doc::Hardline,
            Doc::Fail => &Doc::Fail,
            // space()
            Doc::BorrowedText(" ") => &Doc::BorrowedText(" "),
            // line()
            Doc::FlatAlt(RefDoc(Doc::Hardline), RefDoc(Doc::BorrowedText(" "))) => {
                &Doc::FlatAlt(RefDoc(&Doc::Hardline), RefDoc(&Doc::BorrowedText(" ")))
            }

            // Schema tokens
            Doc::BorrowedText("define") => &Doc::BorrowedText("define"),
            Doc::BorrowedText("struct") => &Doc::BorrowedText("struct"),
            Doc::BorrowedText("dict") => &Doc::BorrowedText("dict"),
            Doc::BorrowedText("array") => &Doc::BorrowedText("array"),
            Doc::BorrowedText("method") => &Doc::BorrowedText("method"),
            Doc::BorrowedText(":") => &Doc::BorrowedText(":"),
            Doc::BorrowedText(",") => &Doc::BorrowedText(","),
            Doc::BorrowedText("=") => &Doc::BorrowedText("="),
            Doc::BorrowedText(";") => &Doc::BorrowedText(";"),
            Doc::BorrowedText("{") => &Doc::BorrowedText("{"),
            Doc::BorrowedText("}") => &Doc::BorrowedText("}"),
            Doc::BorrowedText("[") => &Doc::BorrowedText("["),
            Doc::BorrowedText("]") => &Doc::BorrowedText("]"),
            Doc::BorrowedText("(") => &Doc::BorrowedText("("),
            Doc::BorrowedText(")") => &Doc::BorrowedText(")"),

            _ => self.scope.to_scope(doc),
        })
    }

    fn alloc_column_fn(
        &'arena self,
        f: impl 'arena + Fn(usize) -> Self::Doc,
    ) -> <Self::Doc as DocPtr<'arena, A>>::ColumnFn {
        self.scope.to_scope(f)
    }

    fn alloc_width_fn(
        &'arena self,
        f: impl 'arena + Fn(isize) -> Self::Doc,
    ) -> <Self::Doc as DocPtr<'arena, A>>::WidthFn {
        self.scope.to_scope(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::NotationRegistry;
    use crate::xml::Node;

    fn render(document: Node, width: usize) -> String {
        let mut schema = Schema::with_builtins();
        schema
            .load(&document, &NotationRegistry::with_builtins())
            .unwrap();

        let scope = Scope::new();
        let context = Context::new(&schema, &scope);
        let doc = context.schema().into_doc();
        doc.pretty(width).to_string()
    }

    fn without_builtins(output: &str) -> Vec<&str> {
        output.lines().filter(|line| !is_builtin(line)).collect()
    }

    fn is_builtin(line: &str) -> bool {
        crate::schema::ScalarKind::ALL
            .iter()
            .any(|kind| line == format!("define {0} = {0};", kind.name()))
    }

    #[test]
    fn definitions_refer_to_named_types() {
        let document = Node::new("schema")
            .with_child(
                Node::new("define")
                    .with_attr("name", "ifindex")
                    .with_attr("type", "uint32"),
            )
            .with_child(
                Node::new("define")
                    .with_attr("name", "link")
                    .with_attr("class", "struct")
                    .with_child(Node::new("name").with_attr("type", "string"))
                    .with_child(Node::new("index").with_attr("type", "ifindex")),
            );

        let output = render(document, 80);
        assert_eq!(
            without_builtins(&output),
            [
                "define ifindex = uint32;",
                "define link = struct { name: string, index: uint32 };",
            ],
        );
    }

    #[test]
    fn narrow_output_breaks_members_onto_lines() {
        let document = Node::new("schema").with_child(
            Node::new("define")
                .with_attr("name", "link")
                .with_attr("class", "struct")
                .with_child(Node::new("name").with_attr("type", "string"))
                .with_child(Node::new("index").with_attr("type", "uint32")),
        );

        let output = render(document, 20);
        assert_eq!(
            without_builtins(&output),
            [
                "define link = struct {",
                "    name: string,",
                "    index: uint32,",
                "};",
            ],
        );
    }

    #[test]
    fn arrays_bitmaps_and_services() {
        let document = Node::new("schema")
            .with_child(
                Node::new("define")
                    .with_attr("name", "flags")
                    .with_attr("type", "uint32")
                    .with_attr("constraint", "bitmap")
                    .with_child(Node::new("up").with_text("1"))
                    .with_child(Node::new("running").with_text("0x40")),
            )
            .with_child(
                Node::new("define")
                    .with_attr("name", "address")
                    .with_attr("class", "array")
                    .with_attr("element-type", "byte")
                    .with_attr("minlen", "4")
                    .with_attr("maxlen", "4")
                    .with_attr("notation", "ipv4addr"),
            )
            .with_child(
                Node::new("service")
                    .with_attr("name", "link")
                    .with_attr("interface", "org.example.Link")
                    .with_child(
                        Node::new("method").with_attr("name", "up").with_child(
                            Node::new("arguments")
                                .with_child(Node::new("flags"))
                                .with_child(Node::new("local").with_attr("type", "address")),
                        ),
                    ),
            );

        let output = render(document, 80);
        assert_eq!(
            without_builtins(&output),
            [
                "define flags = uint32 bitmap { up = 0x1, running = 0x40 };",
                "define address = array[byte; 4..4] notation ipv4addr;",
                "service link \"org.example.Link\" {",
                "    method up(flags, local: address);",
                "}",
            ],
        );
    }
}
