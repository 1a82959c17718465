//! # heapshot - Heap Snapshots for Managed Runtimes
//!
//! heapshot captures point-in-time snapshots of a managed heap: every live
//! tracked object, its type, and every reference it holds to another tracked
//! object. Snapshots go to a compact binary file that analysis tools load,
//! query and diff against each other to find what keeps growing.
//!
//! ## Overview
//!
//! - **Live Tables**: allocation, collection and class-load hooks keep a table of
//!   tracked objects and types, safe to call from any thread
//! - **Type Catalog**: per-dump type metadata plus a memo of types proven to hold
//!   no references, so they are never enumerated twice
//! - **Heap Graph Scanner**: walks reference fields, inline value types and
//!   arrays, emitting only edges between tracked objects
//! - **Snapshot Writer**: append-only version 6 encoder with a header patched at
//!   close
//! - **Reader and Analysis**: validating decoder, referencer queries, paths to
//!   static roots and growth diffs
//!
//! ## Quick Start
//!
//! ```rust
//! use heapshot::runtime::{FieldKind, HeapModel, Slot};
//! use heapshot::{write_snapshot, HeapSnapshot, ScanOptions, SnapshotWriter, WorkingSnapshot};
//! use std::io::Cursor;
//!
//! fn main() -> Result<(), heapshot::HeapShotError> {
//!     // Describe a tiny heap: a -> b through field `next`
//!     let mut heap = HeapModel::new();
//!     let node = heap.add_class("App.Node");
//!     let next = heap.add_field(node, "next", FieldKind::Reference);
//!     let a = heap.alloc(node, 24);
//!     let b = heap.alloc(node, 24);
//!     heap.set_field(a, next, Slot::Ref(b));
//!
//!     // Dump it
//!     let snapshot = WorkingSnapshot::from_parts(heap.objects(), heap.type_ids());
//!     let writer = SnapshotWriter::new(Cursor::new(Vec::new()), "example")?;
//!     let (out, counts, _) = write_snapshot(&heap, &snapshot, writer, ScanOptions::default())?;
//!     assert_eq!(counts.references, 1);
//!
//!     // Read it back
//!     let file = heapshot::read_snapshot(&mut Cursor::new(out.into_inner()))?;
//!     let loaded = HeapSnapshot::from_file(file);
//!     assert_eq!(loaded.referencer_field(a.get(), b.get()), Some("next"));
//!     Ok(())
//! }
//! ```
//!
//! ## Taking Dumps From a Runtime
//!
//! A runtime binding implements [`HeapRuntime`], wires its event callbacks to
//! the hooks of a [`HeapShot`] and calls [`HeapShot::take_snapshot`] when a
//! dump is requested (for example from a signal handler thread). Dumps are
//! serialized: a second request waits for the first to finish.
//!
//! ```text
//!  allocation / class-load hooks          dump trigger
//!              │                               │
//!              ▼                               ▼
//!       ┌─────────────┐   clone    ┌───────────────────┐
//!       │ LiveTables  │──────────▶│  WorkingSnapshot   │
//!       └─────────────┘            └─────────┬─────────┘
//!                                            ▼
//!                              ┌──────────────────────────┐
//!                              │ HeapScanner + TypeCatalog │
//!                              └─────────────┬────────────┘
//!                                            ▼
//!                                   SnapshotWriter (.omap)
//! ```
//!
//! ## Modules
//!
//! - [`runtime`]: Runtime introspection contract and the in-memory [`HeapModel`](runtime::HeapModel)
//! - [`tracker`]: Live tables and working snapshots
//! - [`catalog`]: Per-dump type catalog and exclusion set
//! - [`scanner`]: Heap graph scanner
//! - [`format`]: Wire format, writer and reader
//! - [`dump`]: Dump orchestration
//! - [`analysis`]: Queries, reference trees and diffs over loaded snapshots
//! - [`stats`]: Scan statistics
//! - [`config`]: Dump configuration
//! - [`error`]: Error types
//! - [`logging`]: Structured dump events

// Runtime contract and tracking
pub mod runtime;
pub mod tracker;

// Snapshot pipeline
pub mod catalog;
pub mod dump;
pub mod format;
pub mod scanner;

// Reading snapshots back
pub mod analysis;

// Ambient
pub mod config;
pub mod error;
pub mod logging;
pub mod stats;

pub use analysis::{HeapSnapshot, ReferenceNode, SnapshotDiff};
pub use config::DumpConfig;
pub use dump::{write_snapshot, DumpSummary, HeapShot};
pub use error::{HeapShotError, Result};
pub use format::{read_snapshot, SnapshotCounts, SnapshotFile, SnapshotWriter};
pub use runtime::{FieldId, HeapRuntime, ObjectId, TypeId};
pub use scanner::ScanOptions;
pub use stats::ScanStats;
pub use tracker::{LiveTables, WorkingSnapshot};

/// heapshot version string from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
