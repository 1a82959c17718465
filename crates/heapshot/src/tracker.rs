//! Tracker - Live Object and Type Tables
//!
//! The runtime binding feeds allocation, collection and class-load events
//! into [`LiveTables`] from any thread. Both tables sit behind one lock that
//! is held only for a single insert/remove, or for the clone that produces a
//! [`WorkingSnapshot`].
//!
//! # Thread Safety
//!
//! All hooks are safe to call concurrently with each other and with a dump in
//! progress: the dump only ever sees its own cloned snapshot.

use crate::runtime::{ObjectId, TypeId};
use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
struct TableState {
    objects: FxHashMap<ObjectId, TypeId>,
    types: FxHashSet<TypeId>,
}

/// Tracker statistics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TrackerStats {
    /// Objects currently tracked
    pub live_objects: usize,
    /// Types currently registered
    pub live_types: usize,
    /// Allocation events received
    pub allocations: u64,
    /// Objects removed by liveness sweeps
    pub swept: u64,
}

impl std::fmt::Display for TrackerStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "TrackerStats {{ objects: {}, types: {}, allocations: {}, swept: {} }}",
            self.live_objects, self.live_types, self.allocations, self.swept
        )
    }
}

/// Live tracking tables shared by event hooks and the dump orchestrator
#[derive(Debug, Default)]
pub struct LiveTables {
    state: Mutex<TableState>,
    allocations: AtomicU64,
    swept: AtomicU64,
}

impl LiveTables {
    /// Create empty tables
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocation hook: start tracking `obj`
    pub fn on_allocation(&self, obj: ObjectId, ty: TypeId) {
        self.state.lock().objects.insert(obj, ty);
        self.allocations.fetch_add(1, Ordering::Relaxed);
    }

    /// Class-load hook
    pub fn on_class_load(&self, ty: TypeId) {
        self.state.lock().types.insert(ty);
    }

    /// Class-unload hook
    ///
    /// Objects of the type stay tracked until a sweep proves them dead.
    pub fn on_class_unload(&self, ty: TypeId) {
        self.state.lock().types.remove(&ty);
    }

    /// Post-collection sweep: drop every object `is_alive` rejects
    ///
    /// `is_alive` runs under the table lock and must not call back into
    /// these tables. Returns the number of objects removed.
    pub fn sweep<F>(&self, mut is_alive: F) -> usize
    where
        F: FnMut(ObjectId) -> bool,
    {
        let removed = {
            let mut state = self.state.lock();
            let before = state.objects.len();
            state.objects.retain(|obj, _| is_alive(*obj));
            before - state.objects.len()
        };

        self.swept.fetch_add(removed as u64, Ordering::Relaxed);
        if removed > 0 {
            log::debug!("Liveness sweep removed {} objects", removed);
        }
        removed
    }

    /// Check if `obj` is currently tracked
    pub fn is_tracked(&self, obj: ObjectId) -> bool {
        self.state.lock().objects.contains_key(&obj)
    }

    /// Clone both tables into an isolated snapshot
    ///
    /// The lock is released before the copy is sorted.
    pub fn working_snapshot(&self) -> WorkingSnapshot {
        let (objects, types) = {
            let state = self.state.lock();
            let objects: Vec<(ObjectId, TypeId)> =
                state.objects.iter().map(|(obj, ty)| (*obj, *ty)).collect();
            let types: Vec<TypeId> = state.types.iter().copied().collect();
            (objects, types)
        };
        WorkingSnapshot::from_parts(objects, types)
    }

    /// Current statistics
    pub fn stats(&self) -> TrackerStats {
        let state = self.state.lock();
        TrackerStats {
            live_objects: state.objects.len(),
            live_types: state.types.len(),
            allocations: self.allocations.load(Ordering::Relaxed),
            swept: self.swept.load(Ordering::Relaxed),
        }
    }
}

/// Isolated copy of the tracking tables used by one dump
///
/// Objects and types are kept sorted by id so a dump of the same heap always
/// produces the same byte stream.
#[derive(Debug, Clone, Default)]
pub struct WorkingSnapshot {
    objects: IndexMap<ObjectId, TypeId>,
    types: IndexSet<TypeId>,
}

impl WorkingSnapshot {
    /// Build a snapshot from raw parts
    pub fn from_parts<O, T>(objects: O, types: T) -> Self
    where
        O: IntoIterator<Item = (ObjectId, TypeId)>,
        T: IntoIterator<Item = TypeId>,
    {
        let mut objects: IndexMap<ObjectId, TypeId> = objects.into_iter().collect();
        objects.sort_keys();
        let mut types: IndexSet<TypeId> = types.into_iter().collect();
        types.sort();
        Self { objects, types }
    }

    /// Check if `obj` belongs to the snapshot
    #[inline]
    pub fn contains(&self, obj: ObjectId) -> bool {
        self.objects.contains_key(&obj)
    }

    /// Type of a tracked object
    pub fn type_of(&self, obj: ObjectId) -> Option<TypeId> {
        self.objects.get(&obj).copied()
    }

    /// Tracked objects in id order
    pub fn objects(&self) -> impl Iterator<Item = (ObjectId, TypeId)> + '_ {
        self.objects.iter().map(|(obj, ty)| (*obj, *ty))
    }

    /// Registered types in id order
    pub fn types(&self) -> impl Iterator<Item = TypeId> + '_ {
        self.types.iter().copied()
    }

    /// Number of tracked objects
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Number of registered types
    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    /// Check if nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty() && self.types.is_empty()
    }
}
