//! Merge (compaction) of sealed segments.
//!
//! Overwritten and deleted records keep occupying segment files until a merge
//! copies the live records somewhere else and deletes the old files.
//!
//! ## Process
//!
//! 1. List the segment files; with at most one there is nothing to do
//! 2. Rotate, so every listed segment is sealed
//! 3. Replay the listed segments
//! 4. Drop DELETE records and every PUT the index no longer points at
//! 5. Re-append each remaining PUT verbatim and move its index entry
//! 6. Delete the listed segment files
//!
//! Any error aborts the cycle before step 6, so the old files survive and the
//! next cycle starts over.
//!
//! ## Triggers
//!
//! A single [`MergeWorker`] thread runs every cycle, whether it comes from the
//! periodic timer or from [`DB::merge`](crate::DB::merge), so two merges never
//! overlap.

pub mod job;
pub mod worker;

pub(crate) use job::run_merge;
pub use worker::MergeWorker;

/// Outcome of one merge cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Segment files deleted by the cycle
    pub segments_merged: usize,
    /// Live records copied to the active segment
    pub records_rewritten: usize,
    /// DELETE records and stale PUTs left behind
    pub records_discarded: usize,
}

impl MergeStats {
    /// Returns true if the cycle found nothing to merge
    pub fn is_noop(&self) -> bool {
        self.segments_merged == 0
    }
}
