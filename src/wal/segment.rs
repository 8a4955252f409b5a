//! Segment file implementation.

use super::segment_path;
use crate::error::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Numeric identity of a segment; strictly increasing within a directory
pub type SegmentId = u32;

/// One append-only file of the log.
///
/// Writes go through positional I/O at `write_offset`, never through the
/// file cursor, so positional reads can run against the same handle.
pub struct Segment {
    /// Segment id, encoded in the file name
    id: SegmentId,
    /// Path to the segment file
    path: PathBuf,
    /// Underlying file handle
    file: File,
    /// Append cursor (current logical size)
    write_offset: u64,
    /// Opened for read/write (only the active segment is)
    writable: bool,
    /// fsync after every append
    sync_writes: bool,
}

impl Segment {
    /// Open a segment for appending, creating the file if needed.
    ///
    /// The append cursor starts at the current end of the file, so writes
    /// continue where a previous process stopped.
    pub fn open_active(dir: &Path, id: SegmentId, sync_writes: bool) -> Result<Self> {
        let path = segment_path(dir, id);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        let write_offset = file.metadata()?.len();

        Ok(Self {
            id,
            path,
            file,
            write_offset,
            writable: true,
            sync_writes,
        })
    }

    /// Open an existing segment read-only
    pub fn open_sealed(dir: &Path, id: SegmentId) -> Result<Self> {
        let path = segment_path(dir, id);
        let file = File::open(&path)?;
        let write_offset = file.metadata()?.len();

        Ok(Self {
            id,
            path,
            file,
            write_offset,
            writable: false,
            sync_writes: false,
        })
    }

    /// Append bytes at the write cursor, returning the offset they start at
    pub fn append(&mut self, data: &[u8]) -> Result<u64> {
        if !self.writable {
            return Err(Error::invalid_state(format!(
                "segment {} is sealed",
                self.id
            )));
        }

        let offset = self.write_offset;
        write_all_at(&self.file, data, offset)?;

        if self.sync_writes {
            self.file.sync_data()?;
        }

        self.write_offset += data.len() as u64;
        Ok(offset)
    }

    /// Read `len` bytes starting at `offset`, independent of the write cursor
    pub fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        read_exact_at(&self.file, &mut buf, offset)?;
        Ok(buf)
    }

    /// Fill `buf` from `offset`. Fails with `UnexpectedEof` on a short read.
    pub fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        read_exact_at(&self.file, buf, offset)
    }

    /// Sync the segment to disk
    pub fn sync(&self) -> Result<()> {
        if self.writable {
            self.file.sync_all()?;
        }
        Ok(())
    }

    /// Stop accepting appends. The handle stays open for reads.
    pub fn seal(&mut self) -> Result<()> {
        self.sync()?;
        self.writable = false;
        Ok(())
    }

    /// Close the segment, syncing it first if it was writable
    pub fn close(self) -> Result<()> {
        self.sync()
    }

    /// Get the segment id
    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// Get the path to the segment file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the current size (the append cursor)
    pub fn size(&self) -> u64 {
        self.write_offset
    }
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_write(buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "failed to write whole buffer",
                ))
            }
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => break,
            Ok(n) => {
                let rest = buf;
                buf = &mut rest[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    if buf.is_empty() {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "failed to fill whole buffer",
        ))
    }
}
