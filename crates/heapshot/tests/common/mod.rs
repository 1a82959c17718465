//! Test Utilities for heapshot Integration Tests
//!
//! Fixtures build small heaps on [`HeapModel`], dump them into memory or a
//! temporary directory, and decode the result for assertions.

#![allow(dead_code)]

use heapshot::format::SnapshotFile;
use heapshot::runtime::{
    DomainId, FieldDescriptor, FieldId, FieldKind, HeapModel, HeapRuntime, ObjectId, Record, Slot,
    TypeId, TypeShape,
};
use heapshot::{
    read_snapshot, write_snapshot, DumpConfig, ScanOptions, ScanStats, SnapshotCounts,
    SnapshotWriter, WorkingSnapshot,
};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

/// Label used for in-memory dumps
pub const TEST_LABEL: &str = "heapshot test";

/// ============================================================================
/// DUMP HELPERS
/// ============================================================================

/// Decoded result of one in-memory dump
pub struct Dumped {
    pub bytes: Vec<u8>,
    pub file: SnapshotFile,
    pub counts: SnapshotCounts,
    pub stats: ScanStats,
}

/// Every object and type of the heap, as the live tables would hold them
pub fn snapshot_all(heap: &HeapModel) -> WorkingSnapshot {
    WorkingSnapshot::from_parts(heap.objects(), heap.type_ids())
}

/// Dump the whole heap with default options
pub fn dump(heap: &HeapModel) -> Dumped {
    dump_with(heap, &snapshot_all(heap), ScanOptions::default())
}

/// Dump a chosen snapshot through any runtime
pub fn dump_with<R: HeapRuntime>(
    runtime: &R,
    snapshot: &WorkingSnapshot,
    options: ScanOptions,
) -> Dumped {
    let writer = SnapshotWriter::new(Cursor::new(Vec::new()), TEST_LABEL)
        .expect("header write to memory should succeed");
    let (cursor, counts, stats) =
        write_snapshot(runtime, snapshot, writer, options).expect("dump should succeed");
    let bytes = cursor.into_inner();
    let file = read_snapshot(&mut Cursor::new(bytes.clone())).expect("dump should decode");
    Dumped {
        bytes,
        file,
        counts,
        stats,
    }
}

/// All edges of a decoded file as (source, target, field or 0)
pub fn edges(file: &SnapshotFile) -> Vec<(u32, u32, u32)> {
    let mut edges: Vec<_> = file
        .objects
        .iter()
        .flat_map(|o| {
            o.references
                .iter()
                .map(move |r| (o.id, r.target.get(), FieldId::raw_or_null(r.field)))
        })
        .collect();
    edges.sort_unstable();
    edges
}

/// Configuration writing into `dir`, pickup file included
pub fn config_in(dir: &Path) -> DumpConfig {
    DumpConfig {
        pickup_file: Some(dir.join("heap-shot-dump")),
        ..DumpConfig::default()
    }
    .with_output_dir(dir)
}

/// ============================================================================
/// HEAP FIXTURES
/// ============================================================================

/// Linked node pair `a.next -> b`
pub struct LinkedPair {
    pub heap: HeapModel,
    pub node: TypeId,
    pub next: FieldId,
    pub a: ObjectId,
    pub b: ObjectId,
}

impl LinkedPair {
    pub fn new() -> Self {
        let mut heap = HeapModel::new();
        let node = heap.add_class("App.Node");
        let next = heap.add_field(node, "next", FieldKind::Reference);
        let a = heap.alloc(node, 24);
        let b = heap.alloc(node, 24);
        heap.set_field(a, next, Slot::Ref(b));
        Self {
            heap,
            node,
            next,
            a,
            b,
        }
    }
}

/// Value type `App.Vec2 { x: Int32, y: Int32 }`, reference-free
pub fn add_vec2(heap: &mut HeapModel) -> TypeId {
    let int32 = heap.add_value_type("System.Int32", 4);
    let vec2 = heap.add_value_type("App.Vec2", 16);
    heap.add_field(vec2, "x", FieldKind::Value(int32));
    heap.add_field(vec2, "y", FieldKind::Value(int32));
    vec2
}

/// Embedded value holding a single reference in `field`
pub fn value_with_ref(field: FieldId, target: ObjectId) -> Slot {
    Slot::Value(Arc::new(Record::new().with(field, Slot::Ref(target))))
}

/// ============================================================================
/// INSTRUMENTED RUNTIME
/// ============================================================================

/// Runtime wrapper calling `on_object_read` whenever the scanner opens an
/// object's storage, which only happens while a dump holds its guard
pub struct Instrumented {
    pub inner: HeapModel,
    on_object_read: Box<dyn Fn() + Send + Sync>,
}

impl Instrumented {
    pub fn new(inner: HeapModel, on_object_read: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            inner,
            on_object_read: Box::new(on_object_read),
        }
    }
}

impl HeapRuntime for Instrumented {
    type Storage = Arc<Record>;

    fn request_collection(&self) {
        self.inner.request_collection()
    }

    fn domains(&self) -> Vec<DomainId> {
        self.inner.domains()
    }

    fn type_name(&self, ty: TypeId) -> Option<String> {
        self.inner.type_name(ty)
    }

    fn type_shape(&self, ty: TypeId) -> Option<TypeShape> {
        self.inner.type_shape(ty)
    }

    fn fields(&self, ty: TypeId) -> Vec<FieldDescriptor> {
        self.inner.fields(ty)
    }

    fn value_size(&self, ty: TypeId) -> Option<usize> {
        self.inner.value_size(ty)
    }

    fn array_element_size(&self, array_ty: TypeId) -> Option<usize> {
        self.inner.array_element_size(array_ty)
    }

    fn object_size(&self, obj: ObjectId) -> u32 {
        self.inner.object_size(obj)
    }

    fn is_alive(&self, obj: ObjectId) -> bool {
        self.inner.is_alive(obj)
    }

    fn object_storage(&self, obj: ObjectId) -> Option<Self::Storage> {
        (self.on_object_read)();
        self.inner.object_storage(obj)
    }

    fn static_storage(&self, domain: DomainId, ty: TypeId) -> Option<Self::Storage> {
        self.inner.static_storage(domain, ty)
    }

    fn read_reference(&self, storage: &Self::Storage, field: &FieldDescriptor) -> Option<ObjectId> {
        self.inner.read_reference(storage, field)
    }

    fn read_value(&self, storage: &Self::Storage, field: &FieldDescriptor) -> Option<Self::Storage> {
        self.inner.read_value(storage, field)
    }

    fn array_length(&self, storage: &Self::Storage) -> usize {
        self.inner.array_length(storage)
    }

    fn read_element_reference(&self, storage: &Self::Storage, index: usize) -> Option<ObjectId> {
        self.inner.read_element_reference(storage, index)
    }

    fn read_element_value(&self, storage: &Self::Storage, index: usize) -> Option<Self::Storage> {
        self.inner.read_element_value(storage, index)
    }
}
