//! Snapshot Orchestrator
//!
//! [`HeapShot`] owns the live tracking tables and drives complete dumps:
//!
//! 1. Ask the runtime for a full collection and sweep dead objects
//! 2. Take the dump guard (one dump at a time; later callers queue)
//! 3. Clone the live tables into a [`WorkingSnapshot`]
//! 4. Open `<output_dir>/<output_base>_<seq>.omap`
//! 5. Write every tracked object with its edges
//! 6. Write one static pseudo-object per domain and type with statics
//! 7. Finalize the file and publish its absolute path to the pickup file
//!
//! The live tables are locked only for the clone in step 3, so allocation
//! hooks keep running while a dump scans.

use crate::config::DumpConfig;
use crate::error::Result;
use crate::format::{SnapshotCounts, SnapshotWriter};
use crate::logging::{self, DumpEvent, DumpLoggerConfig};
use crate::runtime::{HeapRuntime, ObjectId, TypeId};
use crate::scanner::{HeapScanner, ScanOptions};
use crate::stats::ScanStats;
use crate::tracker::{LiveTables, TrackerStats, WorkingSnapshot};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Result of one finished dump
#[derive(Debug, Clone, Serialize)]
pub struct DumpSummary {
    /// Dump sequence number used in the file name
    pub sequence: u32,
    /// Absolute path of the snapshot file
    pub path: PathBuf,
    /// Final header counters
    pub counts: SnapshotCounts,
    /// Scanner statistics
    pub stats: ScanStats,
    /// Objects removed by the pre-dump sweep
    pub swept: usize,
    /// Whether the pickup file was updated
    pub pickup_written: bool,
    /// Wall-clock start of the dump
    pub started_at: DateTime<Utc>,
    /// Total duration including collection
    pub duration_ms: f64,
}

/// Write all objects and static roots of `snapshot` through `writer`
///
/// Objects are written in id order, then static pseudo-objects for every
/// domain. Closes the writer and returns the sink with the final counters.
pub fn write_snapshot<R, W>(
    runtime: &R,
    snapshot: &WorkingSnapshot,
    writer: SnapshotWriter<W>,
    options: ScanOptions,
) -> Result<(W, SnapshotCounts, ScanStats)>
where
    R: HeapRuntime + ?Sized,
    W: Write + Seek,
{
    let mut scanner = HeapScanner::new(runtime, snapshot, writer, options);

    for (obj, ty) in snapshot.objects() {
        scanner.write_object(obj, ty)?;
    }

    for domain in runtime.domains() {
        for ty in snapshot.types() {
            scanner.write_static_roots(domain, ty)?;
        }
    }

    let (hits, misses) = scanner.catalog().stats();
    log::debug!(
        "Catalog: {} types, {} excluded, {} hits, {} misses",
        scanner.catalog().len(),
        scanner.catalog().excluded_count(),
        hits,
        misses
    );
    scanner.finish()
}

/// Heap snapshot profiler bound to one runtime
pub struct HeapShot<R: HeapRuntime> {
    runtime: Arc<R>,
    tables: Arc<LiveTables>,
    config: DumpConfig,
    /// Dump guard; holds the next sequence number
    dump_lock: Mutex<u32>,
    /// Copy of the sequence number readable without the guard
    dumps: AtomicU32,
}

impl<R: HeapRuntime> HeapShot<R> {
    /// Create a profiler with empty tracking tables
    pub fn new(runtime: Arc<R>, config: DumpConfig) -> Result<Self> {
        config.validate()?;

        if config.verbose {
            logging::configure_logger(DumpLoggerConfig {
                console: true,
                ..DumpLoggerConfig::default()
            });
        }

        log::info!(
            "heap-shot ready, writing to {}",
            config.snapshot_path(0).display()
        );

        Ok(Self {
            runtime,
            tables: Arc::new(LiveTables::new()),
            config,
            dump_lock: Mutex::new(0),
            dumps: AtomicU32::new(0),
        })
    }

    /// Runtime binding
    pub fn runtime(&self) -> &Arc<R> {
        &self.runtime
    }

    /// Live tracking tables, shared with event hooks
    pub fn tables(&self) -> &Arc<LiveTables> {
        &self.tables
    }

    /// Active configuration
    pub fn config(&self) -> &DumpConfig {
        &self.config
    }

    /// Allocation hook
    pub fn on_allocation(&self, obj: ObjectId, ty: TypeId) {
        self.tables.on_allocation(obj, ty);
    }

    /// Class-load hook
    pub fn on_class_load(&self, ty: TypeId) {
        self.tables.on_class_load(ty);
    }

    /// Class-unload hook
    pub fn on_class_unload(&self, ty: TypeId) {
        self.tables.on_class_unload(ty);
    }

    /// Post-collection hook: drop objects the runtime reports dead
    pub fn on_collection(&self) -> usize {
        let runtime = &self.runtime;
        self.tables.sweep(|obj| runtime.is_alive(obj))
    }

    /// Tracker statistics
    pub fn tracker_stats(&self) -> TrackerStats {
        self.tables.stats()
    }

    /// Number of dumps whose file was opened
    ///
    /// Does not wait for a dump in progress; that dump is already counted.
    pub fn dump_count(&self) -> u32 {
        self.dumps.load(Ordering::Acquire)
    }

    /// Take one complete snapshot
    ///
    /// Blocks while another dump is in progress. On error the partial file
    /// is left on disk without counters or end-of-stream tag.
    pub fn take_snapshot(&self) -> Result<DumpSummary> {
        let started_at = Utc::now();
        let started = Instant::now();

        let swept = if self.config.collect_before_dump {
            self.runtime.request_collection();
            let removed = self.on_collection();
            logging::log_event(DumpEvent::Sweep {
                removed,
                remaining: self.tables.stats().live_objects,
            });
            removed
        } else {
            0
        };

        let mut next_sequence = self.dump_lock.lock();
        let snapshot = self.tables.working_snapshot();

        let sequence = *next_sequence;
        let path = self.config.snapshot_path(sequence);
        let writer = SnapshotWriter::create(&path, &self.config.label)
            .map_err(|e| self.report_failure(sequence, e))?;
        *next_sequence += 1;
        self.dumps.store(*next_sequence, Ordering::Release);

        log::info!("Dumping object map to file '{}'", path.display());
        logging::log_event(DumpEvent::DumpStart {
            sequence,
            path: path.display().to_string(),
        });

        let scan_started = Instant::now();
        let (_, counts, stats) = write_snapshot(
            self.runtime.as_ref(),
            &snapshot,
            writer,
            ScanOptions::from(&self.config),
        )
        .map_err(|e| self.report_failure(sequence, e))?;
        logging::log_event(DumpEvent::PhaseEnd {
            sequence,
            phase: "scan",
            duration_ms: scan_started.elapsed().as_secs_f64() * 1000.0,
        });

        let path = std::fs::canonicalize(&path).unwrap_or(path);
        let pickup_written = match self.config.pickup_file {
            Some(ref pickup) => publish_path(pickup, &path),
            None => false,
        };
        drop(next_sequence);

        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        logging::log_event(DumpEvent::ScanStats {
            sequence,
            stats: stats.clone(),
        });
        logging::log_event(DumpEvent::DumpEnd {
            sequence,
            path: path.display().to_string(),
            objects: counts.objects,
            references: counts.references,
            duration_ms,
        });
        log::info!("Dump {} done: {}", sequence, counts);

        Ok(DumpSummary {
            sequence,
            path,
            counts,
            stats,
            swept,
            pickup_written,
            started_at,
            duration_ms,
        })
    }

    fn report_failure(&self, sequence: u32, error: crate::HeapShotError) -> crate::HeapShotError {
        log::error!("Dump {} failed: {}", sequence, error);
        logging::log_event(DumpEvent::DumpFailed {
            sequence,
            error: error.to_string(),
        });
        error
    }
}

/// Write the absolute snapshot path into the pickup file
fn publish_path(pickup: &Path, snapshot: &Path) -> bool {
    match std::fs::write(pickup, snapshot.to_string_lossy().as_bytes()) {
        Ok(()) => true,
        Err(e) => {
            log::warn!("Cannot write pickup file {}: {}", pickup.display(), e);
            logging::log_event(DumpEvent::PickupFailed {
                path: pickup.display().to_string(),
                error: e.to_string(),
            });
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::SnapshotFile;
    use crate::runtime::{FieldKind, HeapModel, Slot};
    use std::io::Cursor;

    fn config_in(dir: &Path) -> DumpConfig {
        DumpConfig {
            pickup_file: Some(dir.join("pickup")),
            ..DumpConfig::default()
        }
        .with_output_dir(dir)
    }

    #[test]
    fn test_write_snapshot_to_memory() {
        let mut heap = HeapModel::new();
        let node = heap.add_class("App.Node");
        let next = heap.add_field(node, "next", FieldKind::Reference);
        let a = heap.alloc(node, 24);
        let b = heap.alloc(node, 24);
        heap.set_field(a, next, Slot::Ref(b));

        let snapshot = WorkingSnapshot::from_parts(heap.objects(), heap.type_ids());
        let writer = SnapshotWriter::new(Cursor::new(Vec::new()), "mem").unwrap();
        let (cursor, counts, stats) =
            write_snapshot(&heap, &snapshot, writer, ScanOptions::default()).unwrap();

        assert_eq!(counts.objects, 2);
        assert_eq!(counts.references, 1);
        assert_eq!(stats.objects_scanned, 2);
        let file = crate::format::read_snapshot(&mut Cursor::new(cursor.into_inner())).unwrap();
        assert_eq!(file.label, "mem");
    }

    #[test]
    fn test_sequence_and_pickup() {
        let dir = tempfile::tempdir().unwrap();
        let heap = Arc::new(HeapModel::new());
        let shot = HeapShot::new(heap, config_in(dir.path())).unwrap();

        let first = shot.take_snapshot().unwrap();
        let second = shot.take_snapshot().unwrap();
        assert_eq!(first.sequence, 0);
        assert_eq!(second.sequence, 1);
        assert_eq!(shot.dump_count(), 2);
        assert!(second.path.ends_with("outfile_1.omap"));
        assert!(second.path.is_absolute());
        assert!(second.pickup_written);

        let pickup = std::fs::read_to_string(dir.path().join("pickup")).unwrap();
        assert_eq!(PathBuf::from(pickup), second.path);
        assert!(SnapshotFile::open(&second.path).is_ok());
    }

    #[test]
    fn test_collection_requested_and_dead_swept() {
        let dir = tempfile::tempdir().unwrap();
        let mut heap = HeapModel::new();
        let node = heap.add_class("App.Node");
        let a = heap.alloc(node, 24);
        let b = heap.alloc(node, 24);
        let heap = Arc::new(heap);

        let shot = HeapShot::new(heap.clone(), config_in(dir.path())).unwrap();
        shot.on_class_load(node);
        shot.on_allocation(a, node);
        shot.on_allocation(b, node);
        heap.kill(b);

        let summary = shot.take_snapshot().unwrap();
        assert_eq!(heap.collection_count(), 1);
        assert_eq!(summary.swept, 1);
        assert_eq!(summary.counts.objects, 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = DumpConfig {
            max_value_depth: 0,
            ..DumpConfig::default()
        };
        assert!(HeapShot::new(Arc::new(HeapModel::new()), config).is_err());
    }

    #[test]
    fn test_unwritable_directory_fails_without_advancing() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir.path().join("missing"));
        let shot = HeapShot::new(Arc::new(HeapModel::new()), config).unwrap();

        let err = shot.take_snapshot().unwrap_err();
        assert!(matches!(err, crate::HeapShotError::Io(_)));
        assert_eq!(shot.dump_count(), 0);
    }
}
