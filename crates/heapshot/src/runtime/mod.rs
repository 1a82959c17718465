//! Runtime Module - Managed-Runtime Introspection Contract
//!
//! The snapshot core never looks at runtime memory directly. Everything it
//! needs (type names, field layouts, field values, array elements, liveness)
//! comes through the [`HeapRuntime`] trait, implemented by the binding for a
//! concrete managed runtime.
//!
//! # Identities
//!
//! Objects, types and fields are named by opaque non-zero 32-bit identities.
//! Zero is reserved as the null sentinel of the wire format, so the wrappers
//! are built on `NonZeroU32` and `Option<ObjectId>` costs nothing.
//!
//! # Storage handles
//!
//! `HeapRuntime::Storage` is whatever the binding needs to read fields out of
//! a heap object, a static-field block, or a value embedded in either. The
//! scanner only passes handles back to the runtime that produced them.

pub mod model;

pub use model::{HeapModel, Record, Slot};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(NonZeroU32);

        impl $name {
            /// Wrap a raw identity; zero is the null sentinel and yields `None`
            #[inline]
            pub fn new(raw: u32) -> Option<Self> {
                NonZeroU32::new(raw).map(Self)
            }

            /// Raw 32-bit identity as written on the wire
            #[inline]
            pub fn get(self) -> u32 {
                self.0.get()
            }

            /// Raw identity of an optional id, zero for `None`
            #[inline]
            pub fn raw_or_null(id: Option<Self>) -> u32 {
                id.map_or(0, Self::get)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0.get())
            }
        }
    };
}

define_id!(
    /// Identity of a tracked heap object, stable for the object's lifetime
    ObjectId
);
define_id!(
    /// Identity of a runtime type
    TypeId
);
define_id!(
    /// Identity of a field declared by a type
    FieldId
);

/// Execution domain (application domain, isolate, ...) owning static storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DomainId(pub u32);

/// What a field or array element holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// A reference to a heap object (possibly null)
    Reference,
    /// An inline value of the given value type
    Value(TypeId),
}

impl FieldKind {
    /// Check if this is a reference slot
    pub fn is_reference(&self) -> bool {
        matches!(self, FieldKind::Reference)
    }
}

/// Field metadata supplied by the runtime's reflection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Field identity
    pub id: FieldId,
    /// Field name as declared
    pub name: String,
    /// Type declaring the field
    pub declaring_type: TypeId,
    /// Reference or inline value
    pub kind: FieldKind,
    /// Static (per-domain) rather than per-instance storage
    pub is_static: bool,
}

/// Layout category of a type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeShape {
    /// Class or value type with named fields
    Object,
    /// Array whose elements are references or inline values
    Array { element: FieldKind },
}

impl TypeShape {
    /// Check if this is an array type
    pub fn is_array(&self) -> bool {
        matches!(self, TypeShape::Array { .. })
    }
}

/// Introspection provider of a managed runtime
///
/// All lookups may fail: `None` or an empty list means "no data available"
/// and the caller skips the item. Implementations must be callable from any
/// thread.
pub trait HeapRuntime: Send + Sync {
    /// Handle to readable storage (object body, static block, embedded value)
    type Storage;

    /// Request a full collection; best effort, must not block indefinitely
    fn request_collection(&self);

    /// Enumerate execution domains that own static storage
    fn domains(&self) -> Vec<DomainId>;

    /// Fully qualified display name of a type
    fn type_name(&self, ty: TypeId) -> Option<String>;

    /// Layout category of a type
    fn type_shape(&self, ty: TypeId) -> Option<TypeShape>;

    /// Ordered field list of a type, statics included
    fn fields(&self, ty: TypeId) -> Vec<FieldDescriptor>;

    /// Byte footprint of an inline instance of a value type
    fn value_size(&self, ty: TypeId) -> Option<usize>;

    /// Byte footprint of one element of an array type
    fn array_element_size(&self, array_ty: TypeId) -> Option<usize>;

    /// Byte size of a heap object
    fn object_size(&self, obj: ObjectId) -> u32;

    /// Liveness test used by the post-collection sweep
    fn is_alive(&self, obj: ObjectId) -> bool;

    /// Storage of a heap object
    fn object_storage(&self, obj: ObjectId) -> Option<Self::Storage>;

    /// Static field storage of a type within a domain
    fn static_storage(&self, domain: DomainId, ty: TypeId) -> Option<Self::Storage>;

    /// Read a reference-typed field; `None` for null or unreadable
    fn read_reference(&self, storage: &Self::Storage, field: &FieldDescriptor) -> Option<ObjectId>;

    /// Read a value-typed field as embedded storage
    fn read_value(&self, storage: &Self::Storage, field: &FieldDescriptor) -> Option<Self::Storage>;

    /// Number of elements of an array object
    fn array_length(&self, storage: &Self::Storage) -> usize;

    /// Read a reference array element; `None` for null or unreadable
    fn read_element_reference(&self, storage: &Self::Storage, index: usize) -> Option<ObjectId>;

    /// Read a value array element as embedded storage
    fn read_element_value(&self, storage: &Self::Storage, index: usize) -> Option<Self::Storage>;
}
