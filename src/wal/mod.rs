//! Segmented log implementation.
//!
//! The log is a directory of append-only segment files presented as one
//! logical, append-only sequence of entries.
//!
//! ## Architecture
//!
//! - **Envelope**: each entry is framed with a CRC32 and a length (see [`Envelope`])
//! - **Segments**: one active segment takes appends; older segments are sealed
//! - **Rotation**: an append that would overflow the active segment seals it
//!   and continues in a new segment with the next id
//! - **Replay**: [`WalReader`] yields every entry in segment id, then offset order
//!
//! ## File layout
//!
//! ```text
//! <dir>/000000000.seg   sealed
//! <dir>/000000001.seg   sealed
//! <dir>/000000002.seg   active (highest id)
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use caskdb::wal::Wal;
//! use caskdb::Options;
//!
//! # fn main() -> Result<(), caskdb::Error> {
//! let mut wal = Wal::open("./data", &Options::default())?;
//! let pos = wal.write(b"payload")?;
//! assert_eq!(wal.read(pos)?, b"payload".to_vec());
//!
//! let mut reader = wal.new_reader(None)?;
//! while let Some((payload, pos)) = reader.next()? {
//!     println!("{:?} at {:?}", payload, pos);
//! }
//! # Ok(())
//! # }
//! ```

pub mod envelope;
pub mod reader;
pub mod segment;

pub use envelope::{Envelope, ENVELOPE_HEADER_SIZE};
pub use reader::WalReader;
pub use segment::{Segment, SegmentId};

use crate::config::Options;
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// File extension of segment files
pub const SEGMENT_EXTENSION: &str = "seg";

/// Location of one envelope in the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WalPos {
    /// Segment holding the envelope
    pub segment_id: SegmentId,
    /// Offset of the envelope header within the segment
    pub offset: u64,
    /// Encoded length, envelope header included
    pub len: u64,
}

/// The log manager: one active segment plus the sealed segments before it
pub struct Wal {
    dir: PathBuf,
    max_segment_size: u64,
    sync_writes: bool,
    /// The only segment that is ever appended to
    active: Segment,
    /// Older read-only segments, by id
    sealed: BTreeMap<SegmentId, Segment>,
}

impl Wal {
    /// Open the log in `dir`, which must already exist.
    ///
    /// Every segment but the highest-id one is opened read-only. The highest
    /// one (or a new segment 0) becomes active and continues at its end.
    pub fn open<P: AsRef<Path>>(dir: P, options: &Options) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let ids = list_segment_ids(&dir)?;

        let (active_id, older) = match ids.split_last() {
            Some((&last, older)) => (last, older),
            None => (0, &[][..]),
        };

        let mut sealed = BTreeMap::new();
        for &id in older {
            sealed.insert(id, Segment::open_sealed(&dir, id)?);
        }
        let active = Segment::open_active(&dir, active_id, options.sync_writes)?;

        log::debug!(
            "Opened log in {:?}: {} sealed segment(s), active segment {} at offset {}",
            dir,
            sealed.len(),
            active_id,
            active.size()
        );

        Ok(Self {
            dir,
            max_segment_size: options.max_segment_size,
            sync_writes: options.sync_writes,
            active,
            sealed,
        })
    }

    /// Append a payload, rotating first if it would overflow the active segment
    pub fn write(&mut self, payload: &[u8]) -> Result<WalPos> {
        let encoded = Envelope::new(payload.to_vec()).encode();
        let len = encoded.len() as u64;

        // An empty segment takes the entry whatever its size
        if self.active.size() > 0 && self.active.size() + len > self.max_segment_size {
            self.rotate()?;
        }

        let offset = self.active.append(&encoded)?;
        Ok(WalPos {
            segment_id: self.active.id(),
            offset,
            len,
        })
    }

    /// Read back the payload stored at `pos`, verifying the envelope checksum
    pub fn read(&self, pos: WalPos) -> Result<Vec<u8>> {
        let segment = self.segment(pos.segment_id).ok_or_else(|| {
            Error::invalid_argument(format!("segment {} does not exist", pos.segment_id))
        })?;

        let len = usize::try_from(pos.len)
            .map_err(|_| Error::invalid_argument(format!("entry too large: {}", pos.len)))?;
        let bytes = segment.read_at(pos.offset, len)?;
        Envelope::decode(&bytes)?.into_payload()
    }

    /// Seal the active segment and continue in a new one. Returns the new id.
    pub fn rotate(&mut self) -> Result<SegmentId> {
        let next_id = self
            .active
            .id()
            .checked_add(1)
            .ok_or_else(|| Error::invalid_state("segment ids exhausted"))?;

        self.active.sync()?;
        let next = Segment::open_active(&self.dir, next_id, self.sync_writes)?;
        let mut previous = std::mem::replace(&mut self.active, next);
        previous.seal()?;

        log::debug!(
            "Rotated log: sealed segment {} ({} bytes)",
            previous.id(),
            previous.size()
        );
        self.sealed.insert(previous.id(), previous);

        Ok(next_id)
    }

    /// Reader over every segment with id <= `up_to`, or all segments for `None`
    pub fn new_reader(&self, up_to: Option<SegmentId>) -> Result<WalReader> {
        let ids = self
            .segment_ids()
            .into_iter()
            .filter(|&id| up_to.map_or(true, |max| id <= max))
            .collect();
        WalReader::open(&self.dir, ids)
    }

    /// Close and delete sealed segments, lowest id first
    pub fn remove_segments(&mut self, ids: &[SegmentId]) -> Result<()> {
        if ids.contains(&self.active.id()) {
            return Err(Error::invalid_state(format!(
                "cannot remove active segment {}",
                self.active.id()
            )));
        }

        let mut ids = ids.to_vec();
        ids.sort_unstable();

        for id in ids {
            if let Some(segment) = self.sealed.remove(&id) {
                let path = segment.path().to_path_buf();
                segment.close()?;
                fs::remove_file(&path)?;
                log::debug!("Removed segment {}", id);
            }
        }

        Ok(())
    }

    /// Sync the active segment to disk
    pub fn sync(&self) -> Result<()> {
        self.active.sync()
    }

    /// Sync the active segment and release every handle
    pub fn close(self) -> Result<()> {
        let Wal { active, sealed, .. } = self;
        drop(sealed);
        active.close()
    }

    /// Id of the active segment
    pub fn active_segment_id(&self) -> SegmentId {
        self.active.id()
    }

    /// Size of the active segment
    pub fn active_size(&self) -> u64 {
        self.active.size()
    }

    /// Every segment id, ascending (the last one is the active segment)
    pub fn segment_ids(&self) -> Vec<SegmentId> {
        let mut ids: Vec<_> = self.sealed.keys().copied().collect();
        ids.push(self.active.id());
        ids
    }

    /// Number of segments, active included
    pub fn segment_count(&self) -> usize {
        self.sealed.len() + 1
    }

    fn segment(&self, id: SegmentId) -> Option<&Segment> {
        if id == self.active.id() {
            Some(&self.active)
        } else {
            self.sealed.get(&id)
        }
    }
}

/// Generate the file name of a segment
pub fn segment_filename(id: SegmentId) -> String {
    format!("{:09}.{}", id, SEGMENT_EXTENSION)
}

/// Parse a segment file name to extract its id
pub fn parse_segment_filename(filename: &str) -> Option<SegmentId> {
    let stem = filename.strip_suffix(SEGMENT_EXTENSION)?.strip_suffix('.')?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

/// Full path of a segment file
pub fn segment_path(dir: &Path, id: SegmentId) -> PathBuf {
    dir.join(segment_filename(id))
}

/// Ids of every segment file in `dir`, ascending. Other files are ignored.
pub fn list_segment_ids(dir: &Path) -> Result<Vec<SegmentId>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(id) = entry.file_name().to_str().and_then(parse_segment_filename) {
            ids.push(id);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn options(max_segment_size: u64) -> Options {
        Options::default().max_segment_size(max_segment_size)
    }

    #[test]
    fn test_write_and_read() {
        let dir = TempDir::new().unwrap();
        let mut wal = Wal::open(dir.path(), &options(1024)).unwrap();

        let first = wal.write(b"entry1").unwrap();
        let second = wal.write(b"entry2").unwrap();
        assert_eq!((first.segment_id, first.offset, first.len), (0, 0, 14));
        assert_eq!(second.offset, 14);

        assert_eq!(wal.read(first).unwrap(), b"entry1".to_vec());
        assert_eq!(wal.read(second).unwrap(), b"entry2".to_vec());
    }

    #[test]
    fn test_rotation_on_size_limit() {
        let dir = TempDir::new().unwrap();
        let mut wal = Wal::open(dir.path(), &options(32)).unwrap();

        // 8 + 10 = 18 bytes per entry: one fits, two do not
        let a = wal.write(b"0123456789").unwrap();
        let b = wal.write(b"0123456789").unwrap();
        let c = wal.write(b"0123456789").unwrap();

        assert_eq!((a.segment_id, b.segment_id, c.segment_id), (0, 1, 2));
        assert_eq!(wal.segment_ids(), vec![0, 1, 2]);
        assert_eq!(list_segment_ids(dir.path()).unwrap(), vec![0, 1, 2]);
        assert_eq!(wal.read(a).unwrap(), b"0123456789".to_vec());
    }

    #[test]
    fn test_oversized_entry_goes_into_empty_segment() {
        let dir = TempDir::new().unwrap();
        let mut wal = Wal::open(dir.path(), &options(16)).unwrap();

        let big = vec![7u8; 100];
        let pos = wal.write(&big).unwrap();
        assert_eq!(pos.segment_id, 0);
        assert_eq!(wal.segment_count(), 1);

        let next = wal.write(b"x").unwrap();
        assert_eq!(next.segment_id, 1);
        assert_eq!(wal.read(pos).unwrap(), big);
    }

    #[test]
    fn test_reopen_continues_active_segment() {
        let dir = TempDir::new().unwrap();
        {
            let mut wal = Wal::open(dir.path(), &options(32)).unwrap();
            wal.write(b"0123456789").unwrap();
            wal.write(b"abcdefghij").unwrap();
            wal.close().unwrap();
        }

        let mut wal = Wal::open(dir.path(), &options(32)).unwrap();
        assert_eq!(wal.active_segment_id(), 1);
        assert_eq!(wal.active_size(), 18);

        let pos = wal.write(b"xyz").unwrap();
        assert_eq!((pos.segment_id, pos.offset, pos.len), (1, 18, 11));

        let entries = wal.new_reader(None).unwrap().read_all().unwrap();
        let payloads: Vec<_> = entries.into_iter().map(|(p, _)| p).collect();
        assert_eq!(
            payloads,
            vec![b"0123456789".to_vec(), b"abcdefghij".to_vec(), b"xyz".to_vec()]
        );
    }

    #[test]
    fn test_bounded_reader() {
        let dir = TempDir::new().unwrap();
        let mut wal = Wal::open(dir.path(), &options(1024)).unwrap();
        wal.write(b"in-0").unwrap();
        wal.rotate().unwrap();
        wal.write(b"in-1").unwrap();
        wal.rotate().unwrap();
        wal.write(b"in-2").unwrap();

        let mut reader = wal.new_reader(Some(1)).unwrap();
        assert_eq!(reader.segment_ids(), vec![0, 1]);
        assert_eq!(reader.read_all().unwrap().len(), 2);

        // Segment 0 is a legal bound
        let mut reader = wal.new_reader(Some(0)).unwrap();
        assert_eq!(reader.read_all().unwrap().len(), 1);
    }

    #[test]
    fn test_remove_segments() {
        let dir = TempDir::new().unwrap();
        let mut wal = Wal::open(dir.path(), &options(1024)).unwrap();
        let old = wal.write(b"old").unwrap();
        wal.rotate().unwrap();
        wal.rotate().unwrap();

        assert!(matches!(wal.remove_segments(&[2]), Err(Error::InvalidState(_))));

        wal.remove_segments(&[1, 0]).unwrap();
        assert_eq!(wal.segment_ids(), vec![2]);
        assert_eq!(list_segment_ids(dir.path()).unwrap(), vec![2]);
        assert!(matches!(wal.read(old), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_read_detects_corruption() {
        let dir = TempDir::new().unwrap();
        let mut wal = Wal::open(dir.path(), &options(1024)).unwrap();
        let pos = wal.write(b"payload").unwrap();
        wal.close().unwrap();

        let path = segment_path(dir.path(), 0);
        let mut bytes = fs::read(&path).unwrap();
        bytes[ENVELOPE_HEADER_SIZE + 2] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        let wal = Wal::open(dir.path(), &options(1024)).unwrap();
        assert!(matches!(wal.read(pos), Err(Error::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_segment_filename() {
        assert_eq!(segment_filename(1), "000000001.seg");
        assert_eq!(segment_filename(123), "000000123.seg");
        assert_eq!(parse_segment_filename("000000001.seg"), Some(1));
        assert_eq!(parse_segment_filename("42.seg"), Some(42));
        assert_eq!(parse_segment_filename("invalid"), None);
        assert_eq!(parse_segment_filename(".seg"), None);
        assert_eq!(parse_segment_filename("+1.seg"), None);
        assert_eq!(parse_segment_filename("000001.log"), None);
    }

    #[test]
    fn test_list_ignores_other_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("000000003.seg"), b"").unwrap();
        fs::write(dir.path().join("000000001.seg"), b"").unwrap();
        fs::write(dir.path().join("LOCK"), b"").unwrap();
        fs::write(dir.path().join("notes.txt"), b"").unwrap();
        fs::create_dir(dir.path().join("000000009.seg.d")).unwrap();

        assert_eq!(list_segment_ids(dir.path()).unwrap(), vec![1, 3]);
    }
}
