//! Inverse reference trees: which types hold on to the objects of a type
//!
//! The root node holds every heap object of the queried type. Each level
//! below groups the referencers of the level above by type, so walking
//! down the tree walks toward the static roots that keep the objects alive.
//!
//! Besides plain counts every node carries how many root objects it holds
//! and their bytes, so a branch through which most of the leaked memory is
//! retained stands out even when it has few objects of its own.

use super::{HeapSnapshot, UNKNOWN_FIELD};
use crate::runtime::TypeId;
use indexmap::map::Entry;
use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use serde::Serialize;
use std::fmt;

/// Referencer edges arriving through one field name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldReferences {
    /// Field name, [`UNKNOWN_FIELD`] for array elements
    pub field: String,
    /// Number of (referencer, referenced) pairs using the field
    pub count: u64,
}

/// One type at one level of a reference tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceNode {
    /// Type identity
    pub type_id: TypeId,
    /// Type name
    pub type_name: String,
    /// Distinct objects of the type at this position
    pub object_count: u64,
    /// Bytes of those objects
    pub total_memory: u64,
    /// Distinct objects of the parent level referenced from here
    pub refs_to_parent: u64,
    /// Root-level objects retained through this node, once per path
    pub refs_to_root: u64,
    /// Bytes of those root-level objects
    pub root_memory: u64,
    /// Field breakdown of the edges into the parent level, first seen first
    pub field_references: Vec<FieldReferences>,
    /// Referencing types, most objects first
    pub children: Vec<ReferenceNode>,
}

impl ReferenceNode {
    /// Average object size, 0 for an empty node
    pub fn average_size(&self) -> u64 {
        self.total_memory.checked_div(self.object_count).unwrap_or(0)
    }

    /// Child node for a type name
    pub fn child(&self, type_name: &str) -> Option<&ReferenceNode> {
        self.children.iter().find(|c| c.type_name == type_name)
    }

    fn write_level(&self, f: &mut fmt::Formatter<'_>, level: usize) -> fmt::Result {
        let indent = level * 3;
        let count = self.object_count.to_string();
        writeln!(f, "{:indent$}{} {}", "", count, self.type_name, indent = indent)?;

        if !self.field_references.is_empty() {
            let fields: Vec<String> = self
                .field_references
                .iter()
                .map(|r| format!("{}:{}", r.field, r.count))
                .collect();
            writeln!(
                f,
                "{:indent$}({})",
                "",
                fields.join(", "),
                indent = indent + count.len() + 1
            )?;
        }

        for child in &self.children {
            child.write_level(f, level + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for ReferenceNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_level(f, 0)
    }
}

/// Root objects an object of a node stands in for
#[derive(Debug, Clone, Copy, Default)]
struct RootShare {
    references: u64,
    memory: u64,
}

/// Accumulates one node while its parent level is expanded
struct NodeBuilder<'a> {
    type_id: TypeId,
    objects: IndexMap<u32, RootShare>,
    parents: FxHashSet<u32>,
    fields: IndexMap<&'a str, u64>,
    total_memory: u64,
    refs_to_parent: u64,
    refs_to_root: u64,
    root_memory: u64,
}

impl<'a> NodeBuilder<'a> {
    fn new(type_id: TypeId) -> Self {
        Self {
            type_id,
            objects: IndexMap::new(),
            parents: FxHashSet::default(),
            fields: IndexMap::new(),
            total_memory: 0,
            refs_to_parent: 0,
            refs_to_root: 0,
            root_memory: 0,
        }
    }

    /// Record that `obj` references `parent` through `field`
    fn add(&mut self, snapshot: &HeapSnapshot, parent: u32, obj: u32, share: RootShare, field: &'a str) {
        if self.parents.insert(parent) {
            self.refs_to_parent += 1;
            self.refs_to_root += share.references;
            self.root_memory += share.memory;
        }
        *self.fields.entry(field).or_insert(0) += 1;

        match self.objects.entry(obj) {
            Entry::Occupied(mut slot) => {
                let existing = slot.get_mut();
                existing.references += share.references;
                existing.memory += share.memory;
            }
            Entry::Vacant(slot) => {
                slot.insert(share);
                self.total_memory += snapshot.object(obj).map_or(0, |o| u64::from(o.size));
            }
        }
    }

    fn build(self, snapshot: &'a HeapSnapshot, depth: usize) -> ReferenceNode {
        let children = match depth {
            0 => Vec::new(),
            _ => expand(snapshot, &self.objects, depth - 1),
        };
        ReferenceNode {
            type_id: self.type_id,
            type_name: type_name(snapshot, self.type_id),
            object_count: self.objects.len() as u64,
            total_memory: self.total_memory,
            refs_to_parent: self.refs_to_parent,
            refs_to_root: self.refs_to_root,
            root_memory: self.root_memory,
            field_references: self
                .fields
                .into_iter()
                .map(|(field, count)| FieldReferences {
                    field: field.to_string(),
                    count,
                })
                .collect(),
            children,
        }
    }
}

fn type_name(snapshot: &HeapSnapshot, ty: TypeId) -> String {
    snapshot
        .type_name(ty)
        .map_or_else(|| format!("<type {:#x}>", ty.get()), str::to_string)
}

/// Group the referencers of `objects` by type, `depth` levels further down
fn expand<'a>(
    snapshot: &'a HeapSnapshot,
    objects: &IndexMap<u32, RootShare>,
    depth: usize,
) -> Vec<ReferenceNode> {
    let mut groups: IndexMap<TypeId, NodeBuilder<'a>> = IndexMap::new();

    for (&obj, &share) in objects {
        for &referencer in snapshot.referencers(obj) {
            let Some(entry) = snapshot.object(referencer) else {
                continue;
            };
            let field = snapshot
                .referencer_field(referencer, obj)
                .unwrap_or(UNKNOWN_FIELD);
            groups
                .entry(entry.type_id)
                .or_insert_with(|| NodeBuilder::new(entry.type_id))
                .add(snapshot, obj, referencer, share, field);
        }
    }

    let mut children: Vec<ReferenceNode> = groups
        .into_values()
        .map(|builder| builder.build(snapshot, depth))
        .collect();
    children.sort_by(|a, b| b.object_count.cmp(&a.object_count));
    children
}

pub(super) fn reference_tree(snapshot: &HeapSnapshot, ty: TypeId, depth: usize) -> Option<ReferenceNode> {
    snapshot.type_name(ty)?;

    let mut root = NodeBuilder::new(ty);
    for &obj in snapshot.objects_of_type(ty) {
        let memory = snapshot.object(obj).map_or(0, |o| u64::from(o.size));
        root.objects.insert(obj, RootShare { references: 1, memory });
        root.total_memory += memory;
    }
    root.refs_to_root = root.objects.len() as u64;
    root.root_memory = root.total_memory;

    Some(root.build(snapshot, depth))
}
