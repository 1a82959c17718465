//! Snapshot diff: what appeared between two dumps
//!
//! Objects are matched by identity. Anything in the newer snapshot that the
//! older one does not contain counts as growth, grouped by type name so the
//! two files need not agree on type identities.

use super::HeapSnapshot;
use indexmap::IndexMap;
use serde::Serialize;

/// New objects of one type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeGrowth {
    /// Type name
    pub type_name: String,
    /// Objects absent from the older snapshot
    pub new_objects: u64,
    /// Bytes of those objects
    pub new_bytes: u64,
}

/// Growth between two snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotDiff {
    /// Label of the older snapshot
    pub older: String,
    /// Label of the newer snapshot
    pub newer: String,
    /// Total new objects
    pub new_objects: u64,
    /// Total bytes of new objects
    pub new_bytes: u64,
    /// Per-type growth, largest object count first
    pub growth: Vec<TypeGrowth>,
}

impl SnapshotDiff {
    /// Growth entry for a type name
    pub fn for_type(&self, name: &str) -> Option<&TypeGrowth> {
        self.growth.iter().find(|g| g.type_name == name)
    }
}

pub(super) fn diff(older: &HeapSnapshot, newer: &HeapSnapshot) -> SnapshotDiff {
    let mut by_type: IndexMap<&str, TypeGrowth> = IndexMap::new();

    for entry in newer.heap_objects() {
        if older.contains_object(entry.id) {
            continue;
        }
        let name = newer.type_name(entry.type_id).unwrap_or("<unknown>");
        let growth = by_type.entry(name).or_insert_with(|| TypeGrowth {
            type_name: name.to_string(),
            new_objects: 0,
            new_bytes: 0,
        });
        growth.new_objects += 1;
        growth.new_bytes += u64::from(entry.size);
    }

    let mut growth: Vec<TypeGrowth> = by_type.into_values().collect();
    growth.sort_by(|a, b| {
        b.new_objects
            .cmp(&a.new_objects)
            .then_with(|| a.type_name.cmp(&b.type_name))
    });

    SnapshotDiff {
        older: older.label().to_string(),
        newer: newer.label().to_string(),
        new_objects: growth.iter().map(|g| g.new_objects).sum(),
        new_bytes: growth.iter().map(|g| g.new_bytes).sum(),
        growth,
    }
}
