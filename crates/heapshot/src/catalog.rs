//! Type Catalog - Per-Dump Type Metadata and Exclusion Cache
//!
//! The catalog is created fresh for every dump and thrown away afterwards, so
//! a type unloaded between dumps never leaves stale names behind.
//!
//! It keeps two things:
//!
//! - **Layouts**: display name, shape and ordered field list of every type the
//!   dump touches, fetched from the runtime once per type.
//! - **Exclusion set**: types proven to carry no references anywhere in their
//!   field closure. Append-only; consulted before expanding any value-typed
//!   field or array element.

use crate::runtime::{FieldDescriptor, HeapRuntime, TypeId, TypeShape};
use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use std::sync::Arc;

/// Metadata of one type as captured at first encounter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo {
    /// Type identity
    pub id: TypeId,
    /// Fully qualified display name
    pub name: String,
    /// Layout category
    pub shape: TypeShape,
    /// Ordered field list, statics included
    pub fields: Vec<FieldDescriptor>,
}

impl TypeInfo {
    /// Instance fields in declaration order
    pub fn instance_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| !f.is_static)
    }

    /// Static fields in declaration order
    pub fn static_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.is_static)
    }

    /// Check if the type declares at least one static field
    pub fn has_static_fields(&self) -> bool {
        self.fields.iter().any(|f| f.is_static)
    }
}

/// Name used when reflection cannot name a type
pub fn unresolved_type_name(ty: TypeId) -> String {
    format!("<type {}>", ty)
}

/// Per-dump type catalog
#[derive(Debug, Default)]
pub struct TypeCatalog {
    types: IndexMap<TypeId, Arc<TypeInfo>>,
    excluded: FxHashSet<TypeId>,
    hits: u64,
    misses: u64,
}

impl TypeCatalog {
    /// Create empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a type, capturing its metadata on first sight
    ///
    /// Returns the metadata and whether this call registered it.
    pub fn resolve_or_register<R>(&mut self, runtime: &R, ty: TypeId) -> (Arc<TypeInfo>, bool)
    where
        R: HeapRuntime + ?Sized,
    {
        if let Some(info) = self.types.get(&ty) {
            self.hits += 1;
            return (info.clone(), false);
        }

        self.misses += 1;
        let name = runtime.type_name(ty).unwrap_or_else(|| {
            log::debug!("No display name for type {}", ty);
            unresolved_type_name(ty)
        });
        let info = Arc::new(TypeInfo {
            id: ty,
            name,
            shape: runtime.type_shape(ty).unwrap_or(TypeShape::Object),
            fields: runtime.fields(ty),
        });
        self.types.insert(ty, info.clone());
        (info, true)
    }

    /// Check if `ty` is known to hold no references
    #[inline]
    pub fn is_excluded(&self, ty: TypeId) -> bool {
        self.excluded.contains(&ty)
    }

    /// Record that `ty` holds no references; returns false if already known
    pub fn mark_excluded(&mut self, ty: TypeId) -> bool {
        let inserted = self.excluded.insert(ty);
        if inserted {
            log::trace!("Type {} excluded from further scanning", ty);
        }
        inserted
    }

    /// Number of registered types
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Check if no type has been registered
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Number of excluded types
    pub fn excluded_count(&self) -> usize {
        self.excluded.len()
    }

    /// Layout lookups answered from the catalog vs. fetched from the runtime
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}
