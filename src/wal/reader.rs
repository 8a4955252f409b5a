//! Sequential log reader used for replay and compaction.

use super::envelope::{Envelope, ENVELOPE_HEADER_SIZE};
use super::segment::{Segment, SegmentId};
use super::WalPos;
use crate::error::Result;
use std::io;
use std::path::Path;

/// Reads every envelope of a set of segments, in ascending id then offset order.
///
/// The reader opens its own read-only handles, so it can run without holding
/// any lock on the [`Wal`](super::Wal) it was created from.
pub struct WalReader {
    /// Segments to read, sorted by id
    segments: Vec<Segment>,
    /// Index into `segments` of the segment being read
    current: usize,
    /// Read position within the current segment
    offset: u64,
    /// (segment, offset) of every incomplete trailing envelope seen so far
    torn_tails: Vec<(SegmentId, u64)>,
}

impl WalReader {
    /// Open a reader over the given segment ids in `dir`
    pub fn open(dir: &Path, mut ids: Vec<SegmentId>) -> Result<Self> {
        ids.sort_unstable();
        ids.dedup();

        let segments = ids
            .into_iter()
            .map(|id| Segment::open_sealed(dir, id))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            segments,
            current: 0,
            offset: 0,
            torn_tails: Vec::new(),
        })
    }

    /// Read the next payload and its position.
    ///
    /// Returns `None` once every segment is exhausted. An envelope cut short
    /// by the end of its file ends that segment; it is not an error. A payload
    /// whose checksum does not match fails with `ChecksumMismatch`.
    pub fn next(&mut self) -> Result<Option<(Vec<u8>, WalPos)>> {
        while let Some(segment) = self.segments.get(self.current) {
            let size = segment.size();
            let offset = self.offset;

            if offset + ENVELOPE_HEADER_SIZE as u64 > size {
                self.finish_segment(offset < size);
                continue;
            }

            let mut header = [0u8; ENVELOPE_HEADER_SIZE];
            if !read_or_eof(segment, &mut header, offset)? {
                self.finish_segment(true);
                continue;
            }

            let (checksum, length) = Envelope::decode_header(&header);
            let len = ENVELOPE_HEADER_SIZE as u64 + length as u64;
            if offset + len > size {
                self.finish_segment(true);
                continue;
            }

            let mut payload = vec![0u8; length as usize];
            let payload_offset = offset + ENVELOPE_HEADER_SIZE as u64;
            if !read_or_eof(segment, &mut payload, payload_offset)? {
                self.finish_segment(true);
                continue;
            }

            let position = WalPos {
                segment_id: segment.id(),
                offset,
                len,
            };
            let payload = Envelope { checksum, payload }.into_payload()?;
            self.offset += len;

            return Ok(Some((payload, position)));
        }

        Ok(None)
    }

    /// Read everything that is left
    pub fn read_all(&mut self) -> Result<Vec<(Vec<u8>, WalPos)>> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next()? {
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Ids of the segments this reader covers, ascending
    pub fn segment_ids(&self) -> Vec<SegmentId> {
        self.segments.iter().map(Segment::id).collect()
    }

    /// Incomplete trailing envelopes found so far, as (segment, offset of the envelope)
    pub fn torn_tails(&self) -> &[(SegmentId, u64)] {
        &self.torn_tails
    }

    fn finish_segment(&mut self, torn: bool) {
        if torn {
            if let Some(segment) = self.segments.get(self.current) {
                log::debug!(
                    "Incomplete envelope at end of segment {} (offset {})",
                    segment.id(),
                    self.offset
                );
                self.torn_tails.push((segment.id(), self.offset));
            }
        }
        self.current += 1;
        self.offset = 0;
    }
}

/// Positional read that reports end-of-file as `false` instead of an error
fn read_or_eof(segment: &Segment, buf: &mut [u8], offset: u64) -> Result<bool> {
    match segment.read_exact_at(buf, offset) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}
