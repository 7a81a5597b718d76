//! Building the type graph from a schema document.
//!
//! The builder walks the document depth first. Each `build_*` function that
//! returns a [`TypeId`] hands its caller one owned reference, which the caller
//! must either store (after holding it) or release, on every path including
//! errors. Ephemeral scopes are only ever created through
//! [`Context::with_ephemeral_scope`], which destroys them when the closure
//! returns.

use tracing::{debug, warn};

use crate::schema::constraint::{self, Constraint};
use crate::schema::notation::NotationRegistry;
use crate::schema::reporting::SchemaError;
use crate::schema::scope::{Method, ScopeId, ScopeTree, Service};
use crate::schema::types::{Class, NameType, Type, TypeId, TypeRegistry};
use crate::schema::{CLASS_NAMES, RESERVED_NAMES};
use crate::xml::Node;

/// Only suggest names at most this many edits away from an unknown name.
const MAX_SUGGESTION_DISTANCE: usize = 2;

/// The forms a `<define>` element can take, decided by its attributes and
/// children.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Definition<'doc> {
    /// `<define name="..." class="struct|dict|array">...</define>`
    Complex { class: &'doc str },
    /// `<define name="..." type="..."/>`
    Alias { base: &'doc str },
    /// `<define name="..."><type/></define>`
    Inline,
    /// `<define name="..."/>`
    Constant,
}

impl<'doc> Definition<'doc> {
    pub fn of(node: &'doc Node) -> Definition<'doc> {
        if let Some(class) = node.attr("class") {
            Definition::Complex { class }
        } else if let Some(base) = node.attr("type") {
            Definition::Alias { base }
        } else if node.has_children() {
            Definition::Inline
        } else {
            Definition::Constant
        }
    }
}

/// What a type list is being built for.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ListKind {
    Struct,
    Dict,
    Arguments,
}

impl ListKind {
    /// The aggregate class whose members must all be named, if any.
    fn named_class(self) -> Option<Class> {
        match self {
            ListKind::Struct => Some(Class::Struct),
            ListKind::Dict => Some(Class::Dict),
            ListKind::Arguments => None,
        }
    }
}

pub struct Context<'a> {
    pub types: &'a mut TypeRegistry,
    pub scopes: &'a mut ScopeTree,
    pub notations: &'a NotationRegistry,
}

impl<'a> Context<'a> {
    pub fn new(
        types: &'a mut TypeRegistry,
        scopes: &'a mut ScopeTree,
        notations: &'a NotationRegistry,
    ) -> Context<'a> {
        Context {
            types,
            scopes,
            notations,
        }
    }

    /// Run `build` in a fresh anonymous child of `parent`, destroying the
    /// child afterwards whether or not `build` succeeded.
    pub fn with_ephemeral_scope<T>(
        &mut self,
        parent: ScopeId,
        build: impl FnOnce(&mut Self, ScopeId) -> Result<T, SchemaError>,
    ) -> Result<T, SchemaError> {
        let scope = self.scopes.new_scope(Some(parent), None);
        let result = build(self, scope);
        self.scopes.destroy(self.types, scope);
        result
    }

    /// Process the children of the root element of a schema document.
    pub fn process_schema(&mut self, document: &Node, scope: ScopeId) -> Result<(), SchemaError> {
        for child in document.children() {
            match child.name() {
                "define" => self.process_define(child, scope)?,
                "service" => self.process_service(child, scope)?,
                name => {
                    return Err(SchemaError::UnsupportedElement {
                        span: child.span(),
                        name: name.to_owned(),
                    })
                }
            }
        }
        Ok(())
    }

    pub fn process_define(&mut self, node: &Node, scope: ScopeId) -> Result<(), SchemaError> {
        let name = required_attr(node, "name")?;
        check_reserved(node, name)?;

        match Definition::of(node) {
            Definition::Complex { class } => {
                let context = self.scopes.new_scope(Some(scope), Some(name));
                let result = self
                    .build_complex_type(node, class, context)
                    .and_then(|r#type| self.define_type(node, scope, name, r#type));
                if result.is_err() {
                    self.scopes.destroy(self.types, context);
                }
                result
            }
            Definition::Alias { base } => {
                let context = self.scopes.new_scope(Some(scope), Some(name));
                let result = self
                    .build_simple_type(node, base, context, Some(name))
                    .and_then(|r#type| self.define_type(node, scope, name, r#type));
                if result.is_err() {
                    self.scopes.destroy(self.types, context);
                }
                result
            }
            Definition::Inline => {
                let r#type = self.build_one_type(node, scope)?;
                self.define_type(node, scope, name, r#type)
            }
            Definition::Constant => Err(SchemaError::NotImplemented {
                span: node.span(),
                feature: "constant definitions",
            }),
        }
    }

    /// Define `name` in `scope`, consuming the caller's reference to `type`.
    fn define_type(
        &mut self,
        node: &Node,
        scope: ScopeId,
        name: &str,
        r#type: TypeId,
    ) -> Result<(), SchemaError> {
        let result = self.scopes.typedef(self.types, scope, name, r#type);
        self.types.release(r#type);

        match result {
            Ok(()) => {
                debug!(name, ?scope, class = self.types[r#type].class().name(), "typedef");
                Ok(())
            }
            Err(_) => Err(SchemaError::DuplicateDefinition {
                span: node.span(),
                name: name.to_owned(),
            }),
        }
    }

    /// Build the members of a struct or dict, or the arguments of a method,
    /// from the children of `node`. Nested `<define>` elements register names
    /// in `scope` without adding an entry.
    pub fn build_typelist(
        &mut self,
        node: &Node,
        scope: ScopeId,
        kind: ListKind,
    ) -> Result<Vec<NameType>, SchemaError> {
        let mut list = Vec::new();
        match self.fill_typelist(node, scope, kind, &mut list) {
            Ok(()) => Ok(list),
            Err(error) => {
                self.types.release_members(list);
                Err(error)
            }
        }
    }

    fn fill_typelist(
        &mut self,
        node: &Node,
        scope: ScopeId,
        kind: ListKind,
        list: &mut Vec<NameType>,
    ) -> Result<(), SchemaError> {
        for child in node.children() {
            if child.name() == "define" {
                self.process_define(child, scope)?;
                continue;
            }

            let (name, r#type) = self.build_member(child, scope)?;

            let error = match (name.as_deref(), kind.named_class()) {
                (None, Some(class)) => Some(SchemaError::UnnamedMember {
                    span: child.span(),
                    class,
                }),
                (Some(name), _) if list.iter().any(|member| member.name() == Some(name)) => {
                    Some(SchemaError::DuplicateMember {
                        span: child.span(),
                        name: name.to_owned(),
                    })
                }
                _ => None,
            };
            if let Some(error) = error {
                self.types.release(r#type);
                return Err(error);
            }

            list.push(NameType::new(name, self.types.hold(r#type)));
            self.types.release(r#type);
        }
        Ok(())
    }

    /// Build a single entry of a type list, returning its name (if any) and
    /// an owned reference to its type.
    fn build_member(
        &mut self,
        node: &Node,
        scope: ScopeId,
    ) -> Result<(Option<String>, TypeId), SchemaError> {
        let tag = node.name();

        // <struct>, <dict> or <array>
        if CLASS_NAMES.contains(&tag) {
            let r#type = self.with_ephemeral_scope(scope, |this, local| {
                this.build_complex_type(node, tag, local)
            })?;
            return Ok((None, r#type));
        }

        // <uint32/>
        if self.scopes.lookup(scope, tag).is_some() {
            let r#type = self.build_simple_type(node, tag, scope, None)?;
            return Ok((None, r#type));
        }

        // <somename class="..."> or <somename type="..."/>
        check_reserved(node, tag)?;
        let context = self.scopes.new_scope(Some(scope), Some(tag));
        let result = if let Some(class) = node.attr("class") {
            self.build_complex_type(node, class, context)
        } else if let Some(base) = node.attr("type") {
            self.build_simple_type(node, base, context, None)
        } else {
            Err(self.unknown_type(node, scope, tag, None))
        };

        match result {
            Ok(r#type) => Ok((Some(tag.to_owned()), r#type)),
            Err(error) => {
                self.scopes.destroy(self.types, context);
                Err(error)
            }
        }
    }

    pub fn build_complex_type(
        &mut self,
        node: &Node,
        class: &str,
        scope: ScopeId,
    ) -> Result<TypeId, SchemaError> {
        let (r#type, kind) = match class {
            "struct" => (self.types.new_struct(), ListKind::Struct),
            "dict" => (self.types.new_dict(), ListKind::Dict),
            "array" => return self.build_array_type(node, scope),
            _ => {
                return Err(SchemaError::UnknownClass {
                    span: node.span(),
                    class: class.to_owned(),
                })
            }
        };

        match self.build_typelist(node, scope, kind) {
            Ok(members) => {
                self.types.set_members(r#type, members);
                Ok(r#type)
            }
            Err(error) => {
                self.types.release(r#type);
                Err(error)
            }
        }
    }

    fn build_array_type(&mut self, node: &Node, scope: ScopeId) -> Result<TypeId, SchemaError> {
        let element = match node.attr("element-type") {
            Some(name) => match self.scopes.lookup(scope, name) {
                Some(element) => self.types.hold(element),
                None => return Err(self.unknown_type(node, scope, name, None)),
            },
            None => self.build_one_type(node, scope)?,
        };

        let result = self.array_from_element(node, element);
        self.types.release(element);
        result
    }

    /// Create the array type described by the attributes of `node`.
    fn array_from_element(&mut self, node: &Node, element: TypeId) -> Result<TypeId, SchemaError> {
        let minlen = length_attr(node, "minlen")?.unwrap_or(0);
        let maxlen = length_attr(node, "maxlen")?;
        if let Some(maxlen) = maxlen.filter(|maxlen| minlen > *maxlen) {
            return Err(SchemaError::InvertedLength {
                span: node.span(),
                minlen,
                maxlen,
            });
        }

        let notation = match (node.attr("notation"), &self.types[element]) {
            (None, _) => None,
            (Some(name), Type::Scalar(info)) => {
                let notation = match self.notations.lookup(name) {
                    Some(notation) => notation,
                    None => {
                        return Err(SchemaError::UnknownNotation {
                            span: node.span(),
                            name: name.to_owned(),
                        })
                    }
                };
                if notation.element_kind() != info.kind {
                    return Err(SchemaError::IncompatibleNotation {
                        span: node.span(),
                        name: name.to_owned(),
                        notation_kind: notation.element_kind(),
                        element_kind: info.kind,
                    });
                }
                Some(notation.clone())
            }
            (Some(name), element) => {
                warn!(
                    notation = name,
                    class = element.class().name(),
                    "ignoring notation on array of non-scalar elements"
                );
                None
            }
        };

        let array = self.types.new_array(element, minlen, maxlen);
        if let Some(notation) = notation {
            self.types.set_notation(array, notation);
        }
        Ok(array)
    }

    /// Resolve a reference to the type `name`, applying any `constraint`
    /// given on `node` to a fresh copy of it.
    ///
    /// `defining` names the type being defined in terms of `name`, if any.
    pub fn build_simple_type(
        &mut self,
        node: &Node,
        name: &str,
        scope: ScopeId,
        defining: Option<&str>,
    ) -> Result<TypeId, SchemaError> {
        let r#type = match self.scopes.lookup(scope, name) {
            Some(r#type) => self.types.hold(r#type),
            None => return Err(self.unknown_type(node, scope, name, defining)),
        };

        let constraint = match node.attr("constraint") {
            Some(constraint) => constraint,
            None => return Ok(r#type),
        };
        let kind = match &self.types[r#type] {
            Type::Scalar(info) => info.kind,
            other => {
                warn!(
                    constraint,
                    class = other.class().name(),
                    "ignoring constraint on non-scalar type"
                );
                return Ok(r#type);
            }
        };

        let constrained = self.types.new_scalar(kind);
        self.types.release(r#type);

        match constraint {
            "bitmap" => match constraint::build_bitmap_constraint(node) {
                Ok(bitmap) => {
                    self.types
                        .set_constraint(constrained, Constraint::Bitmap(bitmap));
                }
                Err(error) => {
                    self.types.release(constrained);
                    return Err(error);
                }
            },
            _ => warn!(constraint, base = name, "ignoring unknown constraint kind"),
        }
        Ok(constrained)
    }

    /// Build the single type described by the children of `node`, processing
    /// any `<define>` elements among them first.
    pub fn build_one_type(&mut self, node: &Node, scope: ScopeId) -> Result<TypeId, SchemaError> {
        let mut result = None;
        match self.fill_one_type(node, scope, &mut result) {
            Ok(()) => result.ok_or(SchemaError::EmptyTypeContext { span: node.span() }),
            Err(error) => {
                if let Some(r#type) = result {
                    self.types.release(r#type);
                }
                Err(error)
            }
        }
    }

    fn fill_one_type(
        &mut self,
        node: &Node,
        scope: ScopeId,
        result: &mut Option<TypeId>,
    ) -> Result<(), SchemaError> {
        for child in node.children() {
            let tag = child.name();
            if tag == "define" {
                self.process_define(child, scope)?;
                continue;
            }
            if result.is_some() {
                return Err(SchemaError::AmbiguousType { span: child.span() });
            }

            let r#type = if CLASS_NAMES.contains(&tag) {
                self.with_ephemeral_scope(scope, |this, local| {
                    this.build_complex_type(child, tag, local)
                })?
            } else {
                self.build_simple_type(child, tag, scope, None)?
            };
            *result = Some(r#type);
        }
        Ok(())
    }

    pub fn process_service(&mut self, node: &Node, scope: ScopeId) -> Result<(), SchemaError> {
        let name = required_attr(node, "name")?;
        let interface = required_attr(node, "interface")?;
        check_reserved(node, name)?;

        debug!(name, interface, "service");
        let service = self.scopes.add_service(scope, Service::new(name, interface));

        for child in node.children() {
            match child.name() {
                "method" => self.process_method(child, scope, service)?,
                other => warn!(service = name, element = other, "ignoring element in service"),
            }
        }
        Ok(())
    }

    pub fn process_method(
        &mut self,
        node: &Node,
        scope: ScopeId,
        service: usize,
    ) -> Result<(), SchemaError> {
        let name = required_attr(node, "name")?;

        let arguments = match node.child("arguments") {
            Some(arguments) => self.with_ephemeral_scope(scope, |this, local| {
                this.build_typelist(arguments, local, ListKind::Arguments)
            })?,
            None => Vec::new(),
        };

        debug!(name, arguments = arguments.len(), "method");
        let method = Method {
            name: name.to_owned(),
            arguments,
        };
        self.scopes.add_method(scope, service, method);
        Ok(())
    }

    fn unknown_type(
        &self,
        node: &Node,
        scope: ScopeId,
        name: &str,
        defining: Option<&str>,
    ) -> SchemaError {
        let suggestion = self
            .scopes
            .visible_names(scope)
            .map(|candidate| (levenshtein::levenshtein(name, candidate), candidate))
            .filter(|(distance, _)| *distance <= MAX_SUGGESTION_DISTANCE)
            .min_by_key(|(distance, _)| *distance)
            .map(|(_, candidate)| candidate.to_owned());

        SchemaError::UnknownType {
            span: node.span(),
            name: name.to_owned(),
            base_of: defining.map(str::to_owned),
            suggestion,
        }
    }
}

fn required_attr<'doc>(node: &'doc Node, attribute: &'static str) -> Result<&'doc str, SchemaError> {
    node.attr(attribute)
        .ok_or_else(|| SchemaError::MissingAttribute {
            span: node.span(),
            element: node.name().to_owned(),
            attribute,
        })
}

fn check_reserved(node: &Node, name: &str) -> Result<(), SchemaError> {
    if RESERVED_NAMES.contains(&name) {
        return Err(SchemaError::ReservedName {
            span: node.span(),
            name: name.to_owned(),
        });
    }
    Ok(())
}

fn length_attr(node: &Node, attribute: &'static str) -> Result<Option<u64>, SchemaError> {
    match node.attr(attribute) {
        None => Ok(None),
        Some(value) => match constraint::parse_unsigned(value) {
            Some(length) => Ok(Some(length)),
            None => Err(SchemaError::InvalidLength {
                span: node.span(),
                attribute,
                value: value.to_owned(),
            }),
        },
    }
}
