//! A single merge cycle.

use super::MergeStats;
use crate::error::Result;
use crate::index::IndexEntry;
use crate::record::Record;
use crate::wal::list_segment_ids;
use crate::State;
use parking_lot::RwLock;
use std::path::Path;

/// Run one merge cycle over the segments currently in `dir`.
///
/// The write lock is taken for the rotation, for each rewritten record and
/// for the final deletion, never across the whole cycle, so reads and writes
/// keep flowing while the old segments are scanned.
pub(crate) fn run_merge(dir: &Path, state: &RwLock<State>) -> Result<MergeStats> {
    let ids = list_segment_ids(dir)?;
    let Some(&bound) = ids.last() else {
        return Ok(MergeStats::default());
    };
    if ids.len() <= 1 {
        log::debug!("Merge skipped: only {} segment(s)", ids.len());
        return Ok(MergeStats::default());
    }

    let mut reader = {
        let mut state = state.write();
        let wal = state.wal_mut()?;
        wal.rotate()?;
        wal.new_reader(Some(bound))?
    };

    let mut stats = MergeStats::default();
    while let Some((payload, pos)) = reader.next()? {
        let record = Record::decode(&payload)?;
        record.verify()?;

        if record.is_delete() {
            stats.records_discarded += 1;
            continue;
        }

        let mut guard = state.write();
        let State { index, wal, .. } = &mut *guard;

        // Overwritten or deleted since this copy was written
        if !index.is_current(&record.key, pos, record.checksum) {
            stats.records_discarded += 1;
            continue;
        }

        let wal = wal.as_mut().ok_or_else(State::closed)?;
        let new_pos = wal.write(&payload)?;
        let entry = IndexEntry::new(new_pos, &record);
        index.compare_and_swap(&record.key, pos, record.checksum, entry);
        stats.records_rewritten += 1;
    }

    let merged = reader.segment_ids();
    drop(reader);

    state.write().wal_mut()?.remove_segments(&merged)?;
    stats.segments_merged = merged.len();

    log::info!(
        "Merge completed: {} segment(s) merged, {} record(s) rewritten, {} discarded",
        stats.segments_merged,
        stats.records_rewritten,
        stats.records_discarded
    );

    Ok(stats)
}
