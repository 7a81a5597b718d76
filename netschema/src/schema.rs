//! The schema type system.
//!
//! A [`Schema`] owns a [`TypeRegistry`] and a [`ScopeTree`] whose root scope
//! holds the builtin scalar types. Loading a document adds its definitions
//! and services to the root scope.

use tracing::debug;

use crate::xml::Node;

pub mod build;
pub mod constraint;
pub mod notation;
pub mod pretty;
pub mod reporting;
pub mod scope;
pub mod types;

pub use self::constraint::{BitmapConstraint, Constraint};
pub use self::notation::{Notation, NotationRegistry};
pub use self::reporting::SchemaError;
pub use self::scope::{Method, Scope, ScopeId, ScopeTree, Service};
pub use self::types::{Class, NameType, ScalarKind, Type, TypeId, TypeRegistry};

/// Names that cannot be used for types, members or services.
pub const RESERVED_NAMES: [&str; 5] = ["dict", "struct", "array", "define", "choice"];

/// Element names that introduce an anonymous aggregate.
pub const CLASS_NAMES: [&str; 3] = ["struct", "dict", "array"];

#[derive(Debug)]
pub struct Schema {
    types: TypeRegistry,
    scopes: ScopeTree,
    root: ScopeId,
}

impl Schema {
    /// Create a schema with an empty root scope.
    pub fn new() -> Schema {
        let mut scopes = ScopeTree::new();
        let root = scopes.new_scope(None, None);
        Schema {
            types: TypeRegistry::new(),
            scopes,
            root,
        }
    }

    /// Create a schema whose root scope defines each [`ScalarKind`] under its
    /// name.
    pub fn with_builtins() -> Schema {
        let mut schema = Schema::new();
        for kind in ScalarKind::ALL {
            let r#type = schema.types.new_scalar(kind);
            let result = schema
                .scopes
                .typedef(&mut schema.types, schema.root, kind.name(), r#type);
            schema.types.release(r#type);
            // The scalar names are distinct
            if let Err(duplicate) = result {
                unreachable!("builtin `{kind}` defined twice: {duplicate:?}");
            }
        }
        schema
    }

    pub fn root(&self) -> ScopeId {
        self.root
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    pub fn scopes(&self) -> &ScopeTree {
        &self.scopes
    }

    /// Add the definitions and services of a `<schema>` document to the root
    /// scope.
    ///
    /// Loading stops at the first error. Definitions processed before it stay
    /// in the schema.
    pub fn load(&mut self, document: &Node, notations: &NotationRegistry) -> Result<(), SchemaError> {
        debug!(root = document.name(), "loading schema");
        let mut context = build::Context::new(&mut self.types, &mut self.scopes, notations);
        context.process_schema(document, self.root)
    }

    /// Look up a type defined in the root scope.
    pub fn lookup(&self, name: &str) -> Option<TypeId> {
        self.scopes.lookup(self.root, name)
    }

    /// Look up a dotted name such as `interface.address`, starting from the
    /// root scope.
    pub fn lookup_qualified(&self, path: &str) -> Option<TypeId> {
        self.scopes.lookup_qualified(self.root, path)
    }

    pub fn services(&self) -> &[Service] {
        self.scopes.scope(self.root).services()
    }

    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services().iter().find(|service| service.name == name)
    }
}

impl Default for Schema {
    fn default() -> Schema {
        Schema::with_builtins()
    }
}

impl std::ops::Index<TypeId> for Schema {
    type Output = Type;

    fn index(&self, id: TypeId) -> &Type {
        &self.types[id]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(children: impl IntoIterator<Item = Node>) -> Node {
        Node::new("schema").with_children(children)
    }

    fn define(name: &str) -> Node {
        Node::new("define").with_attr("name", name)
    }

    fn load(document: &Node) -> (Schema, Result<(), SchemaError>) {
        let mut schema = Schema::with_builtins();
        let result = schema.load(document, &NotationRegistry::with_builtins());
        (schema, result)
    }

    fn kind_of(schema: &Schema, id: TypeId) -> ScalarKind {
        schema[id].as_scalar().unwrap().kind
    }

    /// Tear down the root scope, which must free every type that is still
    /// live.
    fn assert_no_leaks(mut schema: Schema) {
        schema.scopes.destroy(&mut schema.types, schema.root);
        assert_eq!(schema.types.live_count(), 0);
    }

    #[test]
    fn builtins_are_defined() {
        let schema = Schema::with_builtins();

        for kind in ScalarKind::ALL {
            let id = schema.lookup(kind.name()).unwrap();
            assert_eq!(kind_of(&schema, id), kind);
            assert_eq!(schema.types().refcount(id), 1);
        }
        assert_no_leaks(schema);
    }

    #[test]
    fn unsupported_top_level_element() {
        let (schema, result) = load(&document([Node::new("typedef")]));

        assert!(matches!(
            result,
            Err(SchemaError::UnsupportedElement { name, .. }) if name == "typedef"
        ));
        assert_no_leaks(schema);
    }

    #[test]
    fn alias_shares_the_base_type() {
        let (schema, result) = load(&document([define("ifindex").with_attr("type", "uint32")]));
        result.unwrap();

        let alias = schema.lookup("ifindex").unwrap();
        assert_eq!(alias, schema.lookup("uint32").unwrap());
        assert_eq!(schema.types().refcount(alias), 2);
        // Aliases get a named scope of their own
        assert!(schema.scopes().child(schema.root(), "ifindex").is_some());
        assert_no_leaks(schema);
    }

    #[test]
    fn duplicate_definitions_are_rejected() {
        let (schema, result) = load(&document([
            define("foo").with_attr("type", "uint32"),
            define("foo").with_attr("type", "string"),
        ]));

        assert!(matches!(
            result,
            Err(SchemaError::DuplicateDefinition { name, .. }) if name == "foo"
        ));
        let foo = schema.lookup("foo").unwrap();
        assert_eq!(kind_of(&schema, foo), ScalarKind::Uint32);
        assert_eq!(schema.types().refcount(foo), 2);
        // The scope made for the rejected definition is gone
        let children = schema.scopes().scope(schema.root()).children();
        assert_eq!(children.len(), 1);
        assert_no_leaks(schema);
    }

    #[test]
    fn reserved_names_are_rejected() {
        for name in RESERVED_NAMES {
            let (schema, result) = load(&document([define(name).with_attr("type", "uint32")]));
            assert!(matches!(result, Err(SchemaError::ReservedName { .. })));
            assert_no_leaks(schema);
        }
    }

    #[test]
    fn define_requires_a_name() {
        let (schema, result) = load(&document([Node::new("define").with_attr("type", "uint32")]));

        assert!(matches!(
            result,
            Err(SchemaError::MissingAttribute { attribute: "name", .. })
        ));
        assert_no_leaks(schema);
    }

    #[test]
    fn unknown_base_type_names_the_definition() {
        let (schema, result) = load(&document([define("ifname").with_attr("type", "strin")]));

        match result {
            Err(SchemaError::UnknownType {
                name,
                base_of,
                suggestion,
                ..
            }) => {
                assert_eq!(name, "strin");
                assert_eq!(base_of.as_deref(), Some("ifname"));
                assert_eq!(suggestion.as_deref(), Some("string"));
            }
            result => panic!("unexpected result: {result:?}"),
        }
        assert!(schema.scopes().child(schema.root(), "ifname").is_none());
        assert_no_leaks(schema);
    }

    #[test]
    fn struct_members_in_declaration_order() {
        let (schema, result) = load(&document([define("link")
            .with_attr("class", "struct")
            .with_child(Node::new("a").with_attr("type", "uint32"))
            .with_child(Node::new("b").with_attr("type", "string"))]));
        result.unwrap();

        let link = schema.lookup("link").unwrap();
        let members = schema[link].members().unwrap();
        let names: Vec<_> = members.iter().map(NameType::name).collect();
        assert_eq!(names, [Some("a"), Some("b")]);

        let a = schema.types().member(link, "a").unwrap();
        let b = schema.types().member(link, "b").unwrap();
        assert_eq!(kind_of(&schema, a), ScalarKind::Uint32);
        assert_eq!(kind_of(&schema, b), ScalarKind::String);
        assert_no_leaks(schema);
    }

    #[test]
    fn nested_definitions_are_addressable_by_qualified_name() {
        let local = Node::new("local")
            .with_attr("class", "array")
            .with_attr("notation", "ipv4addr")
            .with_child(Node::new("byte"));
        let (schema, result) = load(&document([define("address")
            .with_attr("class", "struct")
            .with_child(define("family").with_attr("type", "uint16"))
            .with_child(Node::new("kind").with_attr("type", "family"))
            .with_child(local)]));
        result.unwrap();

        let family = schema.lookup_qualified("address.family").unwrap();
        assert_eq!(family, schema.lookup("uint16").unwrap());
        assert!(schema.lookup("family").is_none());

        let address = schema.lookup("address").unwrap();
        assert_eq!(schema.types().member(address, "kind"), Some(family));
        let local = schema.types().member(address, "local").unwrap();
        assert_eq!(schema[local].class(), Class::Array);
        assert_no_leaks(schema);
    }

    #[test]
    fn struct_members_must_be_named() {
        let (schema, result) = load(&document([define("pair")
            .with_attr("class", "struct")
            .with_child(Node::new("uint32"))]));

        assert!(matches!(
            result,
            Err(SchemaError::UnnamedMember { class: Class::Struct, .. })
        ));
        assert!(schema.lookup("pair").is_none());
        assert_no_leaks(schema);
    }

    #[test]
    fn dict_members_must_be_named() {
        let (schema, result) = load(&document([define("options")
            .with_attr("class", "dict")
            .with_child(Node::new("mtu").with_attr("type", "uint32"))
            .with_child(Node::new("string"))]));

        assert!(matches!(
            result,
            Err(SchemaError::UnnamedMember { class: Class::Dict, .. })
        ));
        assert_no_leaks(schema);
    }

    #[test]
    fn duplicate_members_are_rejected() {
        let (schema, result) = load(&document([define("pair")
            .with_attr("class", "struct")
            .with_child(Node::new("x").with_attr("type", "uint32"))
            .with_child(Node::new("x").with_attr("type", "string"))]));

        assert!(matches!(
            result,
            Err(SchemaError::DuplicateMember { name, .. }) if name == "x"
        ));
        assert_no_leaks(schema);
    }

    #[test]
    fn member_without_type_is_unknown() {
        let (schema, result) = load(&document([define("pair")
            .with_attr("class", "struct")
            .with_child(Node::new("x"))]));

        assert!(matches!(
            result,
            Err(SchemaError::UnknownType { name, base_of: None, .. }) if name == "x"
        ));
        assert_no_leaks(schema);
    }

    #[test]
    fn unknown_class_is_rejected() {
        let (schema, result) = load(&document([define("thing").with_attr("class", "union")]));

        assert!(matches!(
            result,
            Err(SchemaError::UnknownClass { class, .. }) if class == "union"
        ));
        assert_no_leaks(schema);
    }

    #[test]
    fn array_lengths_and_element_type() {
        let (schema, result) = load(&document([define("addrs")
            .with_attr("class", "array")
            .with_attr("element-type", "uint32")
            .with_attr("minlen", "1")
            .with_attr("maxlen", "0x10")]));
        result.unwrap();

        let addrs = schema.lookup("addrs").unwrap();
        let info = schema[addrs].as_array().unwrap();
        assert_eq!(info.element, schema.lookup("uint32").unwrap());
        assert_eq!((info.minlen, info.maxlen), (1, Some(16)));
        assert!(info.notation.is_none());
        assert_no_leaks(schema);
    }

    #[test]
    fn array_lengths_default_to_unbounded() {
        let (schema, result) = load(&document([define("bytes")
            .with_attr("class", "array")
            .with_child(Node::new("byte"))]));
        result.unwrap();

        let info = schema[schema.lookup("bytes").unwrap()].as_array().unwrap();
        assert_eq!((info.minlen, info.maxlen), (0, None));
        assert_no_leaks(schema);
    }

    #[test]
    fn bad_array_lengths_are_rejected() {
        let (schema, result) = load(&document([define("bytes")
            .with_attr("class", "array")
            .with_attr("maxlen", "16k")
            .with_child(Node::new("byte"))]));
        assert!(matches!(
            result,
            Err(SchemaError::InvalidLength { attribute: "maxlen", .. })
        ));
        assert_no_leaks(schema);

        let (schema, result) = load(&document([define("bytes")
            .with_attr("class", "array")
            .with_attr("minlen", "8")
            .with_attr("maxlen", "4")
            .with_child(Node::new("byte"))]));
        assert!(matches!(
            result,
            Err(SchemaError::InvertedLength { minlen: 8, maxlen: 4, .. })
        ));
        assert_no_leaks(schema);
    }

    #[test]
    fn compatible_notation_is_attached() {
        let (schema, result) = load(&document([define("ipv4-address")
            .with_attr("class", "array")
            .with_attr("element-type", "byte")
            .with_attr("notation", "ipv4addr")]));
        result.unwrap();

        let info = schema[schema.lookup("ipv4-address").unwrap()].as_array().unwrap();
        assert_eq!(info.notation.as_ref().unwrap().name(), "ipv4addr");
        assert_no_leaks(schema);
    }

    #[test]
    fn incompatible_notation_is_rejected() {
        let (schema, result) = load(&document([define("ipv4-address")
            .with_attr("class", "array")
            .with_attr("element-type", "uint32")
            .with_attr("notation", "ipv4addr")]));

        match result {
            Err(SchemaError::IncompatibleNotation {
                name,
                notation_kind,
                element_kind,
                ..
            }) => {
                assert_eq!(name, "ipv4addr");
                assert_eq!(notation_kind, ScalarKind::Byte);
                assert_eq!(element_kind, ScalarKind::Uint32);
            }
            result => panic!("unexpected result: {result:?}"),
        }
        assert!(schema.lookup("ipv4-address").is_none());
        assert_no_leaks(schema);
    }

    #[test]
    fn unknown_notation_is_rejected() {
        let (schema, result) = load(&document([define("mac")
            .with_attr("class", "array")
            .with_attr("element-type", "byte")
            .with_attr("notation", "macaddr")]));

        assert!(matches!(result, Err(SchemaError::UnknownNotation { .. })));
        assert_no_leaks(schema);
    }

    #[test]
    fn notation_on_aggregate_elements_is_ignored() {
        let (schema, result) = load(&document([define("pairs")
            .with_attr("class", "array")
            .with_attr("notation", "ipv4addr")
            .with_child(Node::new("struct").with_child(Node::new("x").with_attr("type", "byte")))]));
        result.unwrap();

        let info = schema[schema.lookup("pairs").unwrap()].as_array().unwrap();
        assert!(info.notation.is_none());
        assert_eq!(schema[info.element].class(), Class::Struct);
        assert_no_leaks(schema);
    }

    #[test]
    fn two_type_elements_are_ambiguous() {
        let (schema, result) = load(&document([define("thing")
            .with_child(Node::new("struct"))
            .with_child(Node::new("struct"))]));

        assert!(matches!(result, Err(SchemaError::AmbiguousType { .. })));
        assert!(schema.lookup("thing").is_none());
        assert_no_leaks(schema);
    }

    #[test]
    fn only_definitions_is_an_empty_type_context() {
        let (schema, result) = load(&document([
            define("thing").with_child(define("inner").with_attr("type", "uint32"))
        ]));

        assert!(matches!(result, Err(SchemaError::EmptyTypeContext { .. })));
        assert_no_leaks(schema);
    }

    #[test]
    fn one_definition_and_one_type() {
        let (schema, result) = load(&document([define("thing")
            .with_child(define("inner").with_attr("type", "uint32"))
            .with_child(Node::new("inner"))]));
        result.unwrap();

        // The nested definition is registered in the enclosing scope
        let inner = schema.lookup("inner").unwrap();
        assert_eq!(schema.lookup("thing"), Some(inner));
        assert_eq!(kind_of(&schema, inner), ScalarKind::Uint32);
        assert_no_leaks(schema);
    }

    #[test]
    fn inline_aggregates_are_built_in_ephemeral_scopes() {
        let (schema, result) = load(&document([define("route")
            .with_child(Node::new("struct")
                .with_child(define("metric").with_attr("type", "uint32"))
                .with_child(Node::new("priority").with_attr("type", "metric")))]));
        result.unwrap();

        let route = schema.lookup("route").unwrap();
        let priority = schema.types().member(route, "priority").unwrap();
        assert_eq!(kind_of(&schema, priority), ScalarKind::Uint32);
        // Definitions inside the anonymous struct do not leak out
        assert!(schema.lookup("metric").is_none());
        assert!(schema.lookup_qualified("route.metric").is_none());
        assert_no_leaks(schema);
    }

    #[test]
    fn constant_definitions_are_not_implemented() {
        let (schema, result) = load(&document([define("MAX_MTU")]));

        assert!(matches!(result, Err(SchemaError::NotImplemented { .. })));
        assert_no_leaks(schema);
    }

    #[test]
    fn bitmap_constraint_end_to_end() {
        let (schema, result) = load(&document([define("ipaddr")
            .with_attr("type", "string")
            .with_attr("constraint", "bitmap")
            .with_child(Node::new("FLAG1").with_text("1"))
            .with_child(Node::new("FLAG2").with_text("2"))]));
        result.unwrap();

        let ipaddr = schema.lookup("ipaddr").unwrap();
        let info = schema[ipaddr].as_scalar().unwrap();
        assert_eq!(info.kind, ScalarKind::String);
        // A constrained copy, not the builtin itself
        assert_ne!(Some(ipaddr), schema.lookup("string"));

        let bitmap = info.constraint.as_ref().and_then(Constraint::as_bitmap).unwrap();
        let bits: Vec<_> = bitmap.bits().collect();
        assert_eq!(bits, [("FLAG1", 1), ("FLAG2", 2)]);
        assert_no_leaks(schema);
    }

    #[test]
    fn bad_bitmap_value_names_the_bit() {
        let (schema, result) = load(&document([define("ipaddr")
            .with_attr("type", "string")
            .with_attr("constraint", "bitmap")
            .with_child(Node::new("FLAG1").with_text("x"))
            .with_child(Node::new("FLAG2").with_text("2"))]));

        assert!(matches!(
            result,
            Err(SchemaError::BadConstraint { element, .. }) if element == "FLAG1"
        ));
        assert!(schema.lookup("ipaddr").is_none());
        assert_no_leaks(schema);
    }

    #[test]
    fn unknown_constraint_kind_gives_an_unconstrained_copy() {
        let (schema, result) = load(&document([define("level")
            .with_attr("type", "uint32")
            .with_attr("constraint", "range")]));
        result.unwrap();

        let level = schema.lookup("level").unwrap();
        assert_ne!(Some(level), schema.lookup("uint32"));
        assert!(schema[level].as_scalar().unwrap().constraint.is_none());
        assert_no_leaks(schema);
    }

    #[test]
    fn services_and_methods() {
        let (schema, result) = load(&document([
            define("ifindex").with_attr("type", "uint32"),
            Node::new("service")
                .with_attr("name", "interface")
                .with_attr("interface", "org.example.Interface")
                .with_child(
                    Node::new("method").with_attr("name", "rename").with_child(
                        Node::new("arguments")
                            .with_child(define("newname").with_attr("type", "string"))
                            .with_child(Node::new("ifindex"))
                            .with_child(Node::new("name").with_attr("type", "newname")),
                    ),
                )
                .with_child(Node::new("method").with_attr("name", "up")),
        ]));
        result.unwrap();

        let service = schema.service("interface").unwrap();
        assert_eq!(service.interface, "org.example.Interface");
        assert_eq!(service.methods.len(), 2);

        let rename = service.method("rename").unwrap();
        let names: Vec<_> = rename.arguments.iter().map(NameType::name).collect();
        assert_eq!(names, [None, Some("name")]);
        assert_eq!(rename.arguments[0].r#type, schema.lookup("ifindex").unwrap());
        let name = rename.argument("name").unwrap();
        assert_eq!(kind_of(&schema, name), ScalarKind::String);

        // Argument local definitions do not leak into the schema
        assert!(schema.lookup("newname").is_none());
        assert!(service.method("up").unwrap().arguments.is_empty());
        assert_no_leaks(schema);
    }

    #[test]
    fn service_requires_an_interface() {
        let (schema, result) = load(&document([
            Node::new("service").with_attr("name", "interface")
        ]));

        assert!(matches!(
            result,
            Err(SchemaError::MissingAttribute { attribute: "interface", .. })
        ));
        assert!(schema.services().is_empty());
        assert_no_leaks(schema);
    }

    #[test]
    fn failed_method_arguments_are_released() {
        let (schema, result) = load(&document([Node::new("service")
            .with_attr("name", "interface")
            .with_attr("interface", "org.example.Interface")
            .with_child(
                Node::new("method").with_attr("name", "configure").with_child(
                    Node::new("arguments")
                        .with_child(Node::new("mtu").with_attr("type", "uint32"))
                        .with_child(Node::new("flags").with_attr("type", "unknown")),
                ),
            )]));

        assert!(matches!(result, Err(SchemaError::UnknownType { .. })));
        let service = schema.service("interface").unwrap();
        assert!(service.methods.is_empty());
        // Only the builtins remain
        assert_eq!(schema.types().live_count(), ScalarKind::ALL.len());
        assert_no_leaks(schema);
    }
}
