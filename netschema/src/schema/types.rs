//! The type registry.
//!
//! Schema types form a graph rather than a tree: the same named type can be
//! the element of several arrays and a member of several structs, while also
//! being defined in a scope. Types are therefore stored in an arena and shared
//! by explicit reference counting.
//!
//! The counting protocol is:
//!
//! - every constructor returns a type with a count of one, owned by the
//!   caller,
//! - anything that stores a type (a scope, an aggregate, an argument list)
//!   calls [`TypeRegistry::hold`] before storing it,
//! - an owner that is done with its reference calls [`TypeRegistry::release`].
//!
//! When the count reaches zero the slot is freed and every type it refers to
//! is released in turn. Freed slots are never reused, so a stale [`TypeId`] is
//! always detected instead of silently aliasing a newer type.

use index_vec::IndexVec;
use std::fmt;
use std::ops::Index;
use std::sync::Arc;

use crate::schema::constraint::Constraint;
use crate::schema::notation::Notation;

index_vec::define_index_type! {
    pub struct TypeId = u32;
}

/// Primitive kinds of scalar types.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Void,
    Boolean,
    Byte,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Double,
    String,
    ObjectPath,
}

impl ScalarKind {
    pub const ALL: [ScalarKind; 12] = [
        ScalarKind::Void,
        ScalarKind::Boolean,
        ScalarKind::Byte,
        ScalarKind::Int16,
        ScalarKind::Uint16,
        ScalarKind::Int32,
        ScalarKind::Uint32,
        ScalarKind::Int64,
        ScalarKind::Uint64,
        ScalarKind::Double,
        ScalarKind::String,
        ScalarKind::ObjectPath,
    ];

    /// The name the kind is defined under in a builtin root scope.
    pub fn name(self) -> &'static str {
        match self {
            ScalarKind::Void => "void",
            ScalarKind::Boolean => "boolean",
            ScalarKind::Byte => "byte",
            ScalarKind::Int16 => "int16",
            ScalarKind::Uint16 => "uint16",
            ScalarKind::Int32 => "int32",
            ScalarKind::Uint32 => "uint32",
            ScalarKind::Int64 => "int64",
            ScalarKind::Uint64 => "uint64",
            ScalarKind::Double => "double",
            ScalarKind::String => "string",
            ScalarKind::ObjectPath => "object-path",
        }
    }

    pub fn from_name(name: &str) -> Option<ScalarKind> {
        ScalarKind::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The four kinds of type.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Class {
    Scalar,
    Struct,
    Dict,
    Array,
}

impl Class {
    pub fn name(self) -> &'static str {
        match self {
            Class::Scalar => "scalar",
            Class::Struct => "struct",
            Class::Dict => "dict",
            Class::Array => "array",
        }
    }
}

/// A member of an aggregate, or a method argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameType {
    pub name: Option<String>,
    pub r#type: TypeId,
}

impl NameType {
    pub fn new(name: Option<String>, r#type: TypeId) -> NameType {
        NameType { name, r#type }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

#[derive(Debug, Clone)]
pub struct ScalarInfo {
    pub kind: ScalarKind,
    pub constraint: Option<Constraint>,
}

#[derive(Debug, Clone)]
pub struct ArrayInfo {
    pub element: TypeId,
    pub minlen: u64,
    /// `None` if the array is unbounded.
    pub maxlen: Option<u64>,
    pub notation: Option<Arc<Notation>>,
}

#[derive(Debug, Clone)]
pub enum Type {
    Scalar(ScalarInfo),
    Struct(Vec<NameType>),
    Dict(Vec<NameType>),
    Array(ArrayInfo),
}

impl Type {
    pub fn class(&self) -> Class {
        match self {
            Type::Scalar(_) => Class::Scalar,
            Type::Struct(_) => Class::Struct,
            Type::Dict(_) => Class::Dict,
            Type::Array(_) => Class::Array,
        }
    }

    pub fn as_scalar(&self) -> Option<&ScalarInfo> {
        match self {
            Type::Scalar(info) => Some(info),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayInfo> {
        match self {
            Type::Array(info) => Some(info),
            _ => None,
        }
    }

    /// The members of a struct or dict.
    pub fn members(&self) -> Option<&[NameType]> {
        match self {
            Type::Struct(members) | Type::Dict(members) => Some(members),
            Type::Scalar(_) | Type::Array(_) => None,
        }
    }

    /// Look up a member of a struct or dict by name.
    pub fn member(&self, name: &str) -> Option<TypeId> {
        let members = self.members()?;
        members
            .iter()
            .find(|member| member.name() == Some(name))
            .map(|member| member.r#type)
    }
}

/// A breach of the reference counting protocol.
///
/// These are bugs in the code driving the registry, never the result of a bad
/// schema document. [`TypeRegistry::release`] raises them as panics using this
/// type as the payload.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ContractViolation {
    /// A type was released more often than it was held.
    OverRelease(TypeId),
    /// A type was used after its last reference was released.
    UseAfterFree(TypeId),
    /// A type of the wrong class was passed to a class specific operation.
    ClassMismatch(TypeId, Class),
}

impl ContractViolation {
    pub fn description(&self) -> &'static str {
        match self {
            ContractViolation::OverRelease(_) => "type released more often than held",
            ContractViolation::UseAfterFree(_) => "type used after being freed",
            ContractViolation::ClassMismatch(_, _) => "type has an unexpected class",
        }
    }
}

impl fmt::Display for ContractViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContractViolation::OverRelease(id) | ContractViolation::UseAfterFree(id) => {
                write!(f, "{} ({id:?})", self.description())
            }
            ContractViolation::ClassMismatch(id, class) => {
                write!(f, "{} ({id:?} is not a {})", self.description(), class.name())
            }
        }
    }
}

impl std::error::Error for ContractViolation {}

#[derive(Debug)]
struct Slot {
    refcount: u32,
    data: Option<Type>,
}

/// Arena of reference counted types.
///
/// Freed types leave a tombstone behind and their ids are never reused, so
/// the arena only grows for the lifetime of a schema. This keeps over-release
/// and use after free detectable.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    slots: IndexVec<TypeId, Slot>,
    live: usize,
}

impl TypeRegistry {
    pub fn new() -> TypeRegistry {
        TypeRegistry::default()
    }

    fn alloc(&mut self, r#type: Type) -> TypeId {
        self.live += 1;
        self.slots.push(Slot {
            refcount: 1,
            data: Some(r#type),
        })
    }

    pub fn new_scalar(&mut self, kind: ScalarKind) -> TypeId {
        self.alloc(Type::Scalar(ScalarInfo {
            kind,
            constraint: None,
        }))
    }

    pub fn new_struct(&mut self) -> TypeId {
        self.alloc(Type::Struct(Vec::new()))
    }

    pub fn new_dict(&mut self) -> TypeId {
        self.alloc(Type::Dict(Vec::new()))
    }

    /// Create an array type. The array takes its own reference to `element`.
    pub fn new_array(&mut self, element: TypeId, minlen: u64, maxlen: Option<u64>) -> TypeId {
        let element = self.hold(element);
        self.alloc(Type::Array(ArrayInfo {
            element,
            minlen,
            maxlen,
            notation: None,
        }))
    }

    /// Take another reference to an existing type.
    pub fn hold(&mut self, id: TypeId) -> TypeId {
        match self.slots.get_mut(id) {
            Some(slot) if slot.data.is_some() => {
                slot.refcount += 1;
                id
            }
            _ => std::panic::panic_any(ContractViolation::UseAfterFree(id)),
        }
    }

    /// Drop a reference to a type, returning `true` if this freed it.
    pub fn try_release(&mut self, id: TypeId) -> Result<bool, ContractViolation> {
        let slot = match self.slots.get_mut(id) {
            Some(slot) if slot.data.is_some() => slot,
            _ => return Err(ContractViolation::OverRelease(id)),
        };

        slot.refcount -= 1;
        if slot.refcount > 0 {
            return Ok(false);
        }

        // Release the children iteratively so deeply nested schemas don't
        // overflow the stack.
        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            let slot = &mut self.slots[id];
            let data = match slot.data.take() {
                Some(data) => data,
                None => return Err(ContractViolation::OverRelease(id)),
            };
            self.live -= 1;

            let children = match data {
                Type::Scalar(_) => Vec::new(),
                Type::Array(info) => vec![info.element],
                Type::Struct(members) | Type::Dict(members) => {
                    members.into_iter().map(|member| member.r#type).collect()
                }
            };
            for child in children {
                let slot = match self.slots.get_mut(child) {
                    Some(slot) if slot.data.is_some() => slot,
                    _ => return Err(ContractViolation::OverRelease(child)),
                };
                slot.refcount -= 1;
                if slot.refcount == 0 {
                    pending.push(child);
                }
            }
        }

        Ok(true)
    }

    /// Drop a reference to a type.
    ///
    /// # Panics
    ///
    /// Panics with a [`ContractViolation`] if the type was already freed.
    pub fn release(&mut self, id: TypeId) {
        if let Err(violation) = self.try_release(id) {
            std::panic::panic_any(violation);
        }
    }

    /// Release every type in a member list.
    pub fn release_members(&mut self, members: Vec<NameType>) {
        for member in members {
            self.release(member.r#type);
        }
    }

    fn get_mut(&mut self, id: TypeId) -> &mut Type {
        match self.slots.get_mut(id).and_then(|slot| slot.data.as_mut()) {
            Some(data) => data,
            None => std::panic::panic_any(ContractViolation::UseAfterFree(id)),
        }
    }

    /// Install the members of a struct or dict. The list must already own a
    /// reference to each of its types.
    pub fn set_members(&mut self, id: TypeId, members: Vec<NameType>) {
        match self.get_mut(id) {
            Type::Struct(list) | Type::Dict(list) => *list = members,
            _ => std::panic::panic_any(ContractViolation::ClassMismatch(id, Class::Struct)),
        }
    }

    /// Append a member to a struct or dict, taking a reference to its type.
    pub fn push_member(&mut self, id: TypeId, name: Option<String>, member: TypeId) {
        let member = self.hold(member);
        match self.get_mut(id) {
            Type::Struct(list) | Type::Dict(list) => list.push(NameType::new(name, member)),
            _ => std::panic::panic_any(ContractViolation::ClassMismatch(id, Class::Struct)),
        }
    }

    pub fn set_constraint(&mut self, id: TypeId, constraint: Constraint) {
        match self.get_mut(id) {
            Type::Scalar(info) => info.constraint = Some(constraint),
            _ => std::panic::panic_any(ContractViolation::ClassMismatch(id, Class::Scalar)),
        }
    }

    pub fn set_notation(&mut self, id: TypeId, notation: Arc<Notation>) {
        match self.get_mut(id) {
            Type::Array(info) => info.notation = Some(notation),
            _ => std::panic::panic_any(ContractViolation::ClassMismatch(id, Class::Array)),
        }
    }

    pub fn get(&self, id: TypeId) -> Option<&Type> {
        self.slots.get(id).and_then(|slot| slot.data.as_ref())
    }

    /// Look up a member of a struct or dict by name.
    pub fn member(&self, id: TypeId, name: &str) -> Option<TypeId> {
        self.get(id)?.member(name)
    }

    /// The current reference count of a type, zero once it has been freed.
    pub fn refcount(&self, id: TypeId) -> u32 {
        match self.slots.get(id) {
            Some(slot) if slot.data.is_some() => slot.refcount,
            _ => 0,
        }
    }

    pub fn is_live(&self, id: TypeId) -> bool {
        self.get(id).is_some()
    }

    /// The number of types that have not been freed.
    pub fn live_count(&self) -> usize {
        self.live
    }
}

impl Index<TypeId> for TypeRegistry {
    type Output = Type;

    fn index(&self, id: TypeId) -> &Type {
        match self.get(id) {
            Some(data) => data,
            None => std::panic::panic_any(ContractViolation::UseAfterFree(id)),
        }
    }
}
