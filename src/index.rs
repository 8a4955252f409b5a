//! In-memory key directory.
//!
//! The index maps every live key to the location of its most recent PUT
//! record. It is never persisted: [`Index::rebuild`] replays the whole log at
//! open, letting later records overwrite earlier ones. A DELETE removes the
//! key, so the index never holds tombstones.

use crate::error::Result;
use crate::record::Record;
use crate::wal::{SegmentId, Wal, WalPos};
use std::collections::HashMap;

/// Where the latest record of a key lives, plus what is needed to validate it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Segment holding the record
    pub segment_id: SegmentId,
    /// Offset of the record's envelope
    pub offset: u64,
    /// Encoded envelope length
    pub len: u64,
    /// Record checksum, as stored in the record header
    pub checksum: u32,
    /// Record timestamp
    pub timestamp: u64,
}

impl IndexEntry {
    /// Build an entry for `record` stored at `pos`
    pub fn new(pos: WalPos, record: &Record) -> Self {
        Self {
            segment_id: pos.segment_id,
            offset: pos.offset,
            len: pos.len,
            checksum: record.checksum,
            timestamp: record.timestamp,
        }
    }

    /// The log position of the record
    pub fn position(&self) -> WalPos {
        WalPos {
            segment_id: self.segment_id,
            offset: self.offset,
            len: self.len,
        }
    }
}

/// What a replay found
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Records read
    pub records: usize,
    /// PUT records among them
    pub puts: usize,
    /// DELETE records among them
    pub deletes: usize,
    /// Largest record timestamp seen
    pub last_timestamp: u64,
    /// Incomplete trailing envelopes, as (segment, offset)
    pub torn_tails: Vec<(SegmentId, u64)>,
}

/// Key -> latest record location
#[derive(Debug, Default)]
pub struct Index {
    entries: HashMap<Vec<u8>, IndexEntry>,
}

impl Index {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the index by replaying every segment of `wal`.
    ///
    /// A record whose checksum does not verify aborts the rebuild.
    pub fn rebuild(wal: &Wal) -> Result<(Self, ReplayStats)> {
        let mut index = Self::new();
        let mut stats = ReplayStats::default();
        let mut reader = wal.new_reader(None)?;

        while let Some((payload, pos)) = reader.next()? {
            let record = Record::decode(&payload)?;
            record.verify()?;

            stats.records += 1;
            stats.last_timestamp = stats.last_timestamp.max(record.timestamp);

            if record.is_delete() {
                stats.deletes += 1;
                index.remove(&record.key);
            } else {
                stats.puts += 1;
                let entry = IndexEntry::new(pos, &record);
                index.insert(record.key, entry);
            }
        }

        stats.torn_tails = reader.torn_tails().to_vec();
        Ok((index, stats))
    }

    /// Look up the entry of a key
    pub fn get(&self, key: &[u8]) -> Option<&IndexEntry> {
        self.entries.get(key)
    }

    /// Point a key at a new record, returning the previous entry
    pub fn insert(&mut self, key: Vec<u8>, entry: IndexEntry) -> Option<IndexEntry> {
        self.entries.insert(key, entry)
    }

    /// Drop a key, returning its entry
    pub fn remove(&mut self, key: &[u8]) -> Option<IndexEntry> {
        self.entries.remove(key)
    }

    /// Returns true if the key is live
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.entries.contains_key(key)
    }

    /// Returns true if the index still points `key` at the record at `pos`
    /// with the given checksum.
    ///
    /// Compaction uses this to tell live copies from stale ones.
    pub fn is_current(&self, key: &[u8], pos: WalPos, checksum: u32) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| entry.position() == pos && entry.checksum == checksum)
    }

    /// Replace the entry of `key` with `new` only if it still is the record at
    /// `expected` with the given checksum. Returns whether the swap happened.
    pub fn compare_and_swap(
        &mut self,
        key: &[u8],
        expected: WalPos,
        checksum: u32,
        new: IndexEntry,
    ) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) if entry.position() == expected && entry.checksum == checksum => {
                *entry = new;
                true
            }
            _ => false,
        }
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no live keys
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
