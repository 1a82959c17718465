//! Analysis Module - Querying Decoded Snapshots
//!
//! [`HeapSnapshot`] indexes a [`SnapshotFile`] for the questions leak
//! hunting asks: how many objects of each type, who references an object,
//! through which field, which types retain a type, and what grew between
//! two dumps.
//!
//! Objects are addressed by their raw 32-bit identity as written in the
//! file. Static pseudo-objects share the identity of their type; the
//! records a dump writes for the same type in several domains are merged
//! into one entry here.

pub mod diff;
pub mod tree;

pub use diff::{SnapshotDiff, TypeGrowth};
pub use tree::{FieldReferences, ReferenceNode};

use crate::error::Result;
use crate::format::{ReferenceRecord, SnapshotFile, TypeRecord};
use crate::runtime::{FieldId, TypeId};
use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::Path;

/// Field name reported for references without a field (array elements)
pub const UNKNOWN_FIELD: &str = "<Unknown>";

/// One object of a loaded snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    /// Raw identity (type identity for static pseudo-objects)
    pub id: u32,
    /// Object type
    pub type_id: TypeId,
    /// Byte size
    pub size: u32,
    /// Outgoing references
    pub references: Vec<ReferenceRecord>,
}

impl ObjectEntry {
    /// Check if this entry stands for a type's static storage
    pub fn is_static(&self) -> bool {
        self.id == self.type_id.get()
    }
}

/// Per-type totals
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeSummary {
    /// Type identity
    pub id: TypeId,
    /// Type name
    pub name: String,
    /// Heap objects of the type, static pseudo-objects excluded
    pub object_count: u64,
    /// Total bytes of those objects
    pub total_size: u64,
}

/// Indexed, queryable snapshot
#[derive(Debug, Clone)]
pub struct HeapSnapshot {
    label: String,
    types: IndexMap<TypeId, TypeRecord>,
    objects: IndexMap<u32, ObjectEntry>,
    by_type: FxHashMap<TypeId, Vec<u32>>,
    referencers: FxHashMap<u32, Vec<u32>>,
}

impl HeapSnapshot {
    /// Index a decoded snapshot file
    pub fn from_file(file: SnapshotFile) -> Self {
        let types: IndexMap<TypeId, TypeRecord> =
            file.types.into_iter().map(|t| (t.id, t)).collect();

        let mut objects: IndexMap<u32, ObjectEntry> = IndexMap::with_capacity(file.objects.len());
        for record in file.objects {
            match objects.get_mut(&record.id) {
                Some(existing) if existing.is_static() => {
                    existing.references.extend(record.references);
                }
                Some(_) => {
                    log::warn!("Object {:#x} recorded twice, keeping the first", record.id);
                }
                None => {
                    objects.insert(
                        record.id,
                        ObjectEntry {
                            id: record.id,
                            type_id: record.type_id,
                            size: record.size,
                            references: record.references,
                        },
                    );
                }
            }
        }

        let mut by_type: FxHashMap<TypeId, Vec<u32>> = FxHashMap::default();
        let mut referencers: FxHashMap<u32, Vec<u32>> = FxHashMap::default();
        for entry in objects.values() {
            if !entry.is_static() {
                by_type.entry(entry.type_id).or_default().push(entry.id);
            }
            let mut seen = FxHashSet::default();
            for reference in &entry.references {
                if seen.insert(reference.target) {
                    referencers
                        .entry(reference.target.get())
                        .or_default()
                        .push(entry.id);
                }
            }
        }

        Self {
            label: file.label,
            types,
            objects,
            by_type,
            referencers,
        }
    }

    /// Open, decode and index a snapshot file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::from_file(SnapshotFile::open(path)?))
    }

    /// Header label
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Per-type totals in file order
    pub fn types(&self) -> Vec<TypeSummary> {
        self.types
            .values()
            .map(|t| {
                let objects = self.objects_of_type(t.id);
                TypeSummary {
                    id: t.id,
                    name: t.name.clone(),
                    object_count: objects.len() as u64,
                    total_size: objects
                        .iter()
                        .filter_map(|id| self.objects.get(id))
                        .map(|o| u64::from(o.size))
                        .sum(),
                }
            })
            .collect()
    }

    /// Type identity for a fully qualified name
    pub fn type_by_name(&self, name: &str) -> Option<TypeId> {
        self.types.values().find(|t| t.name == name).map(|t| t.id)
    }

    /// Name of a type
    pub fn type_name(&self, ty: TypeId) -> Option<&str> {
        self.types.get(&ty).map(|t| t.name.as_str())
    }

    /// Heap objects of a type in file order
    pub fn objects_of_type(&self, ty: TypeId) -> &[u32] {
        self.by_type.get(&ty).map_or(&[], Vec::as_slice)
    }

    /// Object entry by identity
    pub fn object(&self, obj: u32) -> Option<&ObjectEntry> {
        self.objects.get(&obj)
    }

    /// Type name of an object
    pub fn object_type_name(&self, obj: u32) -> Option<&str> {
        self.objects.get(&obj).and_then(|o| self.type_name(o.type_id))
    }

    /// Objects referenced by `obj`, in emission order, duplicates kept
    pub fn references(&self, obj: u32) -> impl Iterator<Item = u32> + '_ {
        self.objects
            .get(&obj)
            .into_iter()
            .flat_map(|o| o.references.iter().map(|r| r.target.get()))
    }

    /// Objects (including static pseudo-objects) referencing `obj`
    pub fn referencers(&self, obj: u32) -> &[u32] {
        self.referencers.get(&obj).map_or(&[], Vec::as_slice)
    }

    /// Name of the field through which `obj` references `target`
    ///
    /// [`UNKNOWN_FIELD`] for array elements or fields missing from the type
    /// record; `None` if `obj` does not reference `target` at all.
    pub fn referencer_field(&self, obj: u32, target: u32) -> Option<&str> {
        let entry = self.objects.get(&obj)?;
        let reference = entry.references.iter().find(|r| r.target.get() == target)?;
        Some(
            reference
                .field
                .and_then(|field| self.field_name(entry.type_id, field))
                .unwrap_or(UNKNOWN_FIELD),
        )
    }

    fn field_name(&self, ty: TypeId, field: FieldId) -> Option<&str> {
        self.types.get(&ty).and_then(|t| t.field_name(field))
    }

    /// Check if `obj` is a static pseudo-object
    pub fn is_static_object(&self, obj: u32) -> bool {
        self.objects.get(&obj).is_some_and(ObjectEntry::is_static)
    }

    /// Sum of heap object sizes
    pub fn total_memory(&self) -> u64 {
        self.objects.values().map(|o| u64::from(o.size)).sum()
    }

    /// Number of heap objects, static pseudo-objects excluded
    pub fn num_objects(&self) -> usize {
        self.objects.values().filter(|o| !o.is_static()).count()
    }

    /// References whose target has no OBJECT record, as (source, target)
    pub fn dangling_references(&self) -> Vec<(u32, u32)> {
        self.objects
            .values()
            .flat_map(|o| {
                o.references
                    .iter()
                    .filter(|r| !self.objects.contains_key(&r.target.get()))
                    .map(move |r| (o.id, r.target.get()))
            })
            .collect()
    }

    /// Shortest referencer chain from a static pseudo-object down to `obj`
    ///
    /// The chain starts at the static root and ends at `obj`. `None` when
    /// no static storage reaches the object.
    pub fn path_to_root(&self, obj: u32) -> Option<Vec<u32>> {
        if !self.objects.contains_key(&obj) {
            return None;
        }

        let mut parent: FxHashMap<u32, u32> = FxHashMap::default();
        let mut queue = VecDeque::from([obj]);
        parent.insert(obj, obj);

        while let Some(current) = queue.pop_front() {
            if self.is_static_object(current) {
                let mut path = vec![current];
                let mut node = current;
                while node != obj {
                    node = parent[&node];
                    path.push(node);
                }
                return Some(path);
            }
            for &referencer in self.referencers(current) {
                if let std::collections::hash_map::Entry::Vacant(slot) = parent.entry(referencer) {
                    slot.insert(current);
                    queue.push_back(referencer);
                }
            }
        }
        None
    }

    /// Inverse reference tree of `ty`, `depth` levels of referencing types deep
    ///
    /// `None` when the snapshot has no TYPE record for `ty`.
    pub fn reference_tree(&self, ty: TypeId, depth: usize) -> Option<ReferenceNode> {
        tree::reference_tree(self, ty, depth)
    }

    /// Growth of this snapshot relative to an older one
    pub fn diff(&self, older: &HeapSnapshot) -> SnapshotDiff {
        diff::diff(older, self)
    }

    pub(crate) fn heap_objects(&self) -> impl Iterator<Item = &ObjectEntry> {
        self.objects.values().filter(|o| !o.is_static())
    }

    pub(crate) fn contains_object(&self, obj: u32) -> bool {
        self.objects.contains_key(&obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{FieldEntry, ObjectRecord, SnapshotCounts};
    use crate::runtime::ObjectId;

    fn ty(raw: u32) -> TypeId {
        TypeId::new(raw).unwrap()
    }

    fn reference(target: u32, field: u32) -> ReferenceRecord {
        ReferenceRecord {
            target: ObjectId::new(target).unwrap(),
            field: FieldId::new(field),
        }
    }

    fn object(id: u32, type_id: u32, size: u32, references: Vec<ReferenceRecord>) -> ObjectRecord {
        ObjectRecord {
            id,
            type_id: ty(type_id),
            size,
            references,
        }
    }

    /// Cache (statics, type 0x10) -> list 0x100 -> items 0x200, 0x300
    fn sample() -> HeapSnapshot {
        let file = SnapshotFile {
            version: 6,
            label: "sample".to_string(),
            counts: SnapshotCounts::default(),
            types: vec![
                TypeRecord {
                    id: ty(0x10),
                    name: "App.Cache".to_string(),
                    fields: vec![FieldEntry {
                        id: FieldId::new(0x11).unwrap(),
                        name: "items".to_string(),
                    }],
                },
                TypeRecord {
                    id: ty(0x20),
                    name: "App.Item[]".to_string(),
                    fields: Vec::new(),
                },
                TypeRecord {
                    id: ty(0x30),
                    name: "App.Item".to_string(),
                    fields: Vec::new(),
                },
            ],
            objects: vec![
                object(0x100, 0x20, 48, vec![reference(0x200, 0), reference(0x300, 0)]),
                object(0x200, 0x30, 16, Vec::new()),
                object(0x300, 0x30, 16, Vec::new()),
                object(0x10, 0x10, 0, vec![reference(0x100, 0x11)]),
                object(0x10, 0x10, 0, vec![reference(0x200, 0x11)]),
            ],
        };
        HeapSnapshot::from_file(file)
    }

    #[test]
    fn test_static_records_merged() {
        let snapshot = sample();
        assert!(snapshot.is_static_object(0x10));
        assert_eq!(snapshot.references(0x10).collect::<Vec<_>>(), vec![0x100, 0x200]);
        assert_eq!(snapshot.num_objects(), 3);
        assert_eq!(snapshot.total_memory(), 80);
    }

    #[test]
    fn test_type_queries() {
        let snapshot = sample();
        let item = snapshot.type_by_name("App.Item").unwrap();
        assert_eq!(snapshot.objects_of_type(item), &[0x200, 0x300]);
        assert_eq!(snapshot.object_type_name(0x100), Some("App.Item[]"));

        let summary = snapshot.types();
        let items = summary.iter().find(|t| t.name == "App.Item").unwrap();
        assert_eq!(items.object_count, 2);
        assert_eq!(items.total_size, 32);
    }

    #[test]
    fn test_referencers_and_fields() {
        let snapshot = sample();
        assert_eq!(snapshot.referencers(0x200), &[0x100, 0x10]);
        assert_eq!(snapshot.referencer_field(0x10, 0x100), Some("items"));
        assert_eq!(snapshot.referencer_field(0x100, 0x200), Some(UNKNOWN_FIELD));
        assert_eq!(snapshot.referencer_field(0x200, 0x100), None);
    }

    #[test]
    fn test_path_to_root() {
        let snapshot = sample();
        assert_eq!(snapshot.path_to_root(0x300), Some(vec![0x10, 0x100, 0x300]));
        assert_eq!(snapshot.path_to_root(0x10), Some(vec![0x10]));
    }

    #[test]
    fn test_no_dangling_references() {
        assert!(sample().dangling_references().is_empty());
    }
}
