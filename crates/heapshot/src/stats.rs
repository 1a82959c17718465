//! Scan Statistics
//!
//! Counters collected by the scanner during one dump. They are reported in
//! the [`DumpSummary`](crate::dump::DumpSummary) and logged at the end of
//! every dump.

use serde::{Deserialize, Serialize};

/// Per-dump scanning statistics
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanStats {
    /// Tracked objects written
    pub objects_scanned: u64,
    /// Static pseudo-objects written
    pub static_roots: u64,
    /// Reference pairs emitted
    pub references_emitted: u64,
    /// Non-null references to objects outside the snapshot
    pub references_untracked: u64,
    /// Embedded values expanded recursively
    pub value_scans: u64,
    /// Object bodies or value fields skipped because the type was excluded
    pub exclusion_hits: u64,
    /// Types added to the exclusion set
    pub types_excluded: u64,
    /// Value fields left unexpanded by the recursion bound
    pub recursion_cutoffs: u64,
    /// Maximum reference pairs in one record
    pub max_refs_in_object: usize,
    /// Average reference pairs per record
    pub avg_refs_per_object: f64,
}

impl ScanStats {
    /// Create empty stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one finished OBJECT record carrying `ref_count` pairs
    pub fn record(&mut self, ref_count: usize) {
        let records = self.objects_scanned + self.static_roots;
        if records > 0 {
            self.avg_refs_per_object = self.references_emitted as f64 / records as f64;
        }
        if ref_count > self.max_refs_in_object {
            self.max_refs_in_object = ref_count;
        }
    }
}

impl std::fmt::Display for ScanStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} objects, {} static roots, {} refs ({} untracked), {} types excluded",
            self.objects_scanned,
            self.static_roots,
            self.references_emitted,
            self.references_untracked,
            self.types_excluded
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_tracks_max_and_average() {
        let mut stats = ScanStats::new();
        stats.objects_scanned = 2;
        stats.references_emitted = 3;
        stats.record(1);
        stats.record(2);

        assert_eq!(stats.max_refs_in_object, 2);
        assert!((stats.avg_refs_per_object - 1.5).abs() < f64::EPSILON);
    }
}
