//! Lexical scopes and the services declared in them.
//!
//! Scopes form a forest stored in an arena. A parent owns its children
//! through its child list, and a child refers back to its parent only so
//! that lookups can walk outwards. Names are resolved by checking the local
//! definitions of a scope, then those of its ancestors up to the root:
//! siblings and children are never searched.
//!
//! Two kinds of scope are created while building a schema:
//!
//! - *permanent* scopes have a name and are linked into their parent's child
//!   list, so that definitions nested inside a named type can later be
//!   addressed by a qualified name such as `address.family`,
//! - *ephemeral* scopes are anonymous. They know their parent but are not in
//!   its child list, and are destroyed by their creator as soon as the type or
//!   argument list they were made for has been built.

use index_vec::IndexVec;
use tracing::trace;

use crate::schema::types::{NameType, TypeId, TypeRegistry};

index_vec::define_index_type! {
    pub struct ScopeId = u32;
}

/// A method of a service.
#[derive(Debug, Clone)]
pub struct Method {
    pub name: String,
    pub arguments: Vec<NameType>,
}

impl Method {
    pub fn argument(&self, name: &str) -> Option<TypeId> {
        self.arguments
            .iter()
            .find(|argument| argument.name() == Some(name))
            .map(|argument| argument.r#type)
    }
}

/// A service, implemented by objects exposing an RPC interface.
#[derive(Debug, Clone)]
pub struct Service {
    pub name: String,
    pub interface: String,
    pub methods: Vec<Method>,
}

impl Service {
    pub fn new(name: impl Into<String>, interface: impl Into<String>) -> Service {
        Service {
            name: name.into(),
            interface: interface.into(),
            methods: Vec::new(),
        }
    }

    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.iter().find(|method| method.name == name)
    }
}

#[derive(Debug, Default)]
pub struct Scope {
    name: Option<String>,
    parent: Option<ScopeId>,
    children: Vec<ScopeId>,
    types: Vec<(String, TypeId)>,
    services: Vec<Service>,
}

impl Scope {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn parent(&self) -> Option<ScopeId> {
        self.parent
    }

    /// Permanent child scopes, in creation order.
    pub fn children(&self) -> &[ScopeId] {
        &self.children
    }

    /// Local type definitions, in definition order.
    pub fn types(&self) -> impl ExactSizeIterator<Item = (&str, TypeId)> + '_ {
        self.types.iter().map(|(name, r#type)| (name.as_str(), *r#type))
    }

    pub fn services(&self) -> &[Service] {
        &self.services
    }

    fn lookup_local(&self, name: &str) -> Option<TypeId> {
        self.types
            .iter()
            .find(|(local, _)| local == name)
            .map(|(_, r#type)| *r#type)
    }
}

/// A name that is already defined in the same scope.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DuplicateName {
    pub existing: TypeId,
}

/// Arena of scopes.
///
/// Destroyed scopes leave a tombstone behind and their ids are never handed
/// out again, so the arena grows with every scope created while building a
/// schema, ephemeral ones included. Stale ids are detected rather than
/// silently reaching a newer scope.
#[derive(Debug, Default)]
pub struct ScopeTree {
    scopes: IndexVec<ScopeId, Option<Scope>>,
}

impl ScopeTree {
    pub fn new() -> ScopeTree {
        ScopeTree::default()
    }

    /// Create a scope. A scope with both a parent and a name is permanent, and
    /// is added to its parent's children.
    pub fn new_scope(&mut self, parent: Option<ScopeId>, name: Option<&str>) -> ScopeId {
        let id = self.scopes.push(Some(Scope {
            name: name.map(str::to_owned),
            parent,
            ..Scope::default()
        }));

        if let (Some(parent), Some(_)) = (parent, name) {
            self.scope_mut(parent).children.push(id);
        }

        trace!(?id, ?parent, name, "new scope");
        id
    }

    /// Destroy a scope and everything in it, releasing the types it defines and
    /// the argument types of its services.
    pub fn destroy(&mut self, types: &mut TypeRegistry, id: ScopeId) {
        if let Some(parent) = self.scope(id).parent {
            if let Some(parent) = self.get_mut(parent) {
                parent.children.retain(|child| *child != id);
            }
        }
        self.destroy_unlinked(types, id);
    }

    fn destroy_unlinked(&mut self, types: &mut TypeRegistry, id: ScopeId) {
        let scope = match self.scopes.get_mut(id).and_then(Option::take) {
            Some(scope) => scope,
            None => panic!("scope {id:?} was destroyed twice"),
        };
        trace!(?id, name = scope.name(), "destroy scope");

        for child in scope.children {
            // Unlinked from us by moving the child list out above
            self.destroy_unlinked(types, child);
        }
        for (_, r#type) in scope.types {
            types.release(r#type);
        }
        for service in scope.services {
            for method in service.methods {
                types.release_members(method.arguments);
            }
        }

        if let Some(parent) = scope.parent.and_then(|parent| self.get(parent)) {
            debug_assert!(
                !parent.children.contains(&id),
                "destroyed scope {id:?} is still a child of its parent",
            );
        }
    }

    pub fn get(&self, id: ScopeId) -> Option<&Scope> {
        self.scopes.get(id).and_then(Option::as_ref)
    }

    fn get_mut(&mut self, id: ScopeId) -> Option<&mut Scope> {
        self.scopes.get_mut(id).and_then(Option::as_mut)
    }

    /// # Panics
    ///
    /// Panics if the scope has been destroyed.
    pub fn scope(&self, id: ScopeId) -> &Scope {
        match self.get(id) {
            Some(scope) => scope,
            None => panic!("scope {id:?} used after being destroyed"),
        }
    }

    fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        match self.get_mut(id) {
            Some(scope) => scope,
            None => panic!("scope {id:?} used after being destroyed"),
        }
    }

    pub fn is_live(&self, id: ScopeId) -> bool {
        self.get(id).is_some()
    }

    /// Define `name` in `scope`, taking a reference to `type`.
    pub fn typedef(
        &mut self,
        types: &mut TypeRegistry,
        scope: ScopeId,
        name: &str,
        r#type: TypeId,
    ) -> Result<(), DuplicateName> {
        if let Some(existing) = self.lookup_local(scope, name) {
            return Err(DuplicateName { existing });
        }

        let r#type = types.hold(r#type);
        self.scope_mut(scope).types.push((name.to_owned(), r#type));
        Ok(())
    }

    pub fn lookup_local(&self, scope: ScopeId, name: &str) -> Option<TypeId> {
        self.scope(scope).lookup_local(name)
    }

    /// Look up a name in `scope` and then in its ancestors.
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<TypeId> {
        self.ancestors(scope)
            .find_map(|scope| self.lookup_local(scope, name))
    }

    /// Look up a dotted name such as `address.family`.
    ///
    /// All but the last component name permanent scopes. The first of these is
    /// searched for among the children of `scope` and of its ancestors, the
    /// rest are searched for only among the children of the previous one. The
    /// last component must be defined directly in the innermost scope. A name
    /// without dots is looked up as with [`ScopeTree::lookup`].
    pub fn lookup_qualified(&self, scope: ScopeId, path: &str) -> Option<TypeId> {
        let mut components = path.split('.');
        let (first, last) = match path.rsplit_once('.') {
            Some((_, last)) => (components.next()?, last),
            None => return self.lookup(scope, path),
        };

        let mut candidates: Vec<ScopeId> = self
            .ancestors(scope)
            .flat_map(|scope| self.children_named(scope, first))
            .collect();

        let middle: Vec<&str> = components.collect();
        let middle = &middle[..middle.len() - 1];
        for component in middle {
            candidates = candidates
                .into_iter()
                .flat_map(|scope| self.children_named(scope, component))
                .collect();
        }

        candidates
            .into_iter()
            .find_map(|scope| self.lookup_local(scope, last))
    }

    fn children_named<'a>(
        &'a self,
        scope: ScopeId,
        name: &'a str,
    ) -> impl Iterator<Item = ScopeId> + 'a {
        self.scope(scope)
            .children
            .iter()
            .copied()
            .filter(move |child| self.scope(*child).name() == Some(name))
    }

    /// The permanent child scope with the given name, if any.
    pub fn child(&self, scope: ScopeId, name: &str) -> Option<ScopeId> {
        self.children_named(scope, name).next()
    }

    /// `scope` followed by each of its ancestors.
    pub fn ancestors(&self, scope: ScopeId) -> impl Iterator<Item = ScopeId> + '_ {
        std::iter::successors(Some(scope), move |scope| self.scope(*scope).parent)
    }

    /// Every name visible from `scope`, innermost first.
    pub fn visible_names(&self, scope: ScopeId) -> impl Iterator<Item = &str> + '_ {
        self.ancestors(scope)
            .flat_map(move |scope| self.scope(scope).types().map(|(name, _)| name))
    }

    /// Attach a service to a scope, returning its index in the scope.
    pub fn add_service(&mut self, scope: ScopeId, service: Service) -> usize {
        let services = &mut self.scope_mut(scope).services;
        services.push(service);
        services.len() - 1
    }

    /// Add a method to a service. The method's argument list must already own
    /// a reference to each of its types.
    pub fn add_method(&mut self, scope: ScopeId, service: usize, method: Method) {
        self.scope_mut(scope).services[service].methods.push(method);
    }
}
