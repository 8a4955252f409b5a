//! # caskdb - A Log-Structured Key-Value Storage Engine
//!
//! caskdb is an embedded, single-directory key-value store following the
//! Bitcask design: every write is appended to a log of segment files, and an
//! in-memory index maps each live key to the location of its latest record.
//!
//! ## Architecture
//!
//! The storage engine consists of several key components:
//!
//! - **Record**: Binary format of one PUT or DELETE, with a CRC32 checksum
//! - **WAL**: Segmented append-only log with rotation and replay
//! - **Index**: Key directory rebuilt from the log on every open
//! - **Compaction**: Background merge that drops overwritten and deleted records
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use caskdb::{DB, Options};
//!
//! # fn main() -> Result<(), caskdb::Error> {
//! // Open or create a database
//! let options = Options::default();
//! let db = DB::open("./data", options)?;
//!
//! // Write operations
//! db.put(b"key1", b"value1")?;
//! db.put(b"key2", b"value2")?;
//!
//! // Read operations
//! let value = db.get(b"key1")?;
//! println!("Found: {:?}", value);
//!
//! // Delete operations
//! db.delete(b"key1")?;
//!
//! // Reclaim space now instead of waiting for the timer
//! let stats = db.merge()?;
//! println!("Merged {} segment(s)", stats.segments_merged);
//!
//! db.close()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Module declarations
pub mod compaction;
pub mod config;
pub mod error;
pub mod index;
pub mod record;
pub mod wal;

// Re-exports
pub use compaction::MergeStats;
pub use config::Options;
pub use error::{Error, Result};

use compaction::MergeWorker;
use index::{Index, IndexEntry};
use parking_lot::{Mutex, RwLock};
use record::{now_millis, Record, RecordType};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use wal::Wal;

/// The main database handle.
///
/// This is the primary interface for interacting with the storage engine.
/// It supports point operations: put, get and delete, plus on-demand merge.
///
/// # Thread Safety
///
/// `DB` is designed to be thread-safe and can be safely shared across threads
/// using `Arc<DB>`. Reads share one lock; writes, rotation and every record a
/// merge rewrites take it exclusively.
pub struct DB {
    /// State shared with the merge worker
    shared: Arc<Shared>,

    /// Background merge thread, `None` once closed
    worker: Mutex<Option<MergeWorker>>,
}

struct Shared {
    /// Database directory path
    path: PathBuf,

    /// Configuration options
    options: Options,

    /// Index and log under the engine's single reader/writer lock
    state: RwLock<State>,
}

/// Everything the engine lock guards
pub(crate) struct State {
    /// Live keys
    pub(crate) index: Index,

    /// The log, `None` once closed
    pub(crate) wal: Option<Wal>,

    /// Timestamp of the newest record, so timestamps never go backwards
    pub(crate) last_timestamp: u64,
}

impl State {
    /// Open the log in `dir` and rebuild the index from it
    pub(crate) fn open(dir: &Path, options: &Options) -> Result<Self> {
        let mut wal = Wal::open(dir, options)?;
        let (index, stats) = Index::rebuild(&wal)?;

        // Appends behind an incomplete envelope would never be replayed, so the
        // active segment is sealed as is and a new one takes the writes
        for &(segment_id, offset) in &stats.torn_tails {
            log::warn!(
                "Segment {} ends with an incomplete entry at offset {}, kept on disk",
                segment_id,
                offset
            );
            if segment_id == wal.active_segment_id() {
                let next = wal.rotate()?;
                log::warn!("Continuing in segment {}", next);
            }
        }

        log::info!(
            "Recovered {} live key(s) from {} segment(s) ({} record(s) replayed)",
            index.len(),
            wal.segment_count(),
            stats.records
        );

        Ok(Self {
            index,
            wal: Some(wal),
            last_timestamp: stats.last_timestamp,
        })
    }

    pub(crate) fn closed() -> Error {
        Error::invalid_state("database is closed")
    }

    pub(crate) fn wal(&self) -> Result<&Wal> {
        self.wal.as_ref().ok_or_else(Self::closed)
    }

    pub(crate) fn wal_mut(&mut self) -> Result<&mut Wal> {
        self.wal.as_mut().ok_or_else(Self::closed)
    }

    /// Wall-clock time, but never earlier than the previous record
    fn next_timestamp(&mut self) -> u64 {
        self.last_timestamp = now_millis().max(self.last_timestamp);
        self.last_timestamp
    }

    pub(crate) fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let wal = self.wal()?;
        let entry = self.index.get(key).ok_or(Error::KeyNotFound)?;

        let record = Record::decode(&wal.read(entry.position())?)?;
        record.verify()?;
        if record.checksum != entry.checksum {
            return Err(Error::ChecksumMismatch {
                expected: entry.checksum,
                actual: record.checksum,
            });
        }

        Ok(record.value)
    }

    pub(crate) fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        Record::check_sizes(key, value)?;
        self.wal()?;

        let timestamp = self.next_timestamp();
        let record = Record::with_timestamp(
            RecordType::Put,
            key.to_vec(),
            value.to_vec(),
            timestamp,
        );
        let pos = self.wal_mut()?.write(&record.encode())?;

        let entry = IndexEntry::new(pos, &record);
        self.index.insert(record.key, entry);
        Ok(())
    }

    pub(crate) fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.wal()?;
        if !self.index.contains_key(key) {
            return Err(Error::KeyNotFound);
        }

        let timestamp = self.next_timestamp();
        let record = Record::with_timestamp(
            RecordType::Delete,
            key.to_vec(),
            Vec::new(),
            timestamp,
        );
        self.wal_mut()?.write(&record.encode())?;

        self.index.remove(key);
        Ok(())
    }

    /// Close the log. Closing twice is a no-op.
    pub(crate) fn close(&mut self) -> Result<()> {
        self.index = Index::new();
        match self.wal.take() {
            Some(wal) => wal.close(),
            None => Ok(()),
        }
    }
}

impl DB {
    /// Opens a database at the specified path with the given options.
    ///
    /// If the database does not exist, it will be created. If it exists, the
    /// index is rebuilt by replaying every segment, and an incomplete entry at
    /// the end of the active segment (left by a crash mid-write) is cut off.
    ///
    /// # Arguments
    ///
    /// * `path` - The filesystem path where the database will be stored
    /// * `options` - Configuration options for the database
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The options are invalid
    /// - The directory is missing and `create_if_missing` is false
    /// - The directory exists and `error_if_exists` is true
    /// - A segment cannot be opened, or replay finds a checksum mismatch
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use caskdb::{DB, Options};
    ///
    /// # fn main() -> Result<(), caskdb::Error> {
    /// let options = Options::default();
    /// let db = DB::open("./my_database", options)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn open<P: AsRef<Path>>(path: P, options: Options) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // Validate options
        options.validate()?;

        // Create directory if not exists
        if !path.exists() {
            if options.create_if_missing {
                std::fs::create_dir_all(&path)?;
            } else {
                return Err(Error::invalid_argument(format!(
                    "Database directory does not exist: {:?}",
                    path
                )));
            }
        } else if options.error_if_exists {
            return Err(Error::invalid_state(format!(
                "Database already exists: {:?}",
                path
            )));
        }

        let state = State::open(&path, &options)?;
        let shared = Arc::new(Shared {
            path,
            options,
            state: RwLock::new(state),
        });

        let interval = shared.options.merge_interval;
        let worker = {
            let shared = Arc::clone(&shared);
            MergeWorker::spawn(interval, move || {
                compaction::run_merge(&shared.path, &shared.state)
            })?
        };

        log::info!("Database opened at {:?}", shared.path);

        Ok(DB {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Inserts a key-value pair into the database.
    ///
    /// If the key already exists, its value will be overwritten.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty key, and an error if the append
    /// fails due to I/O errors.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use caskdb::{DB, Options};
    /// # fn main() -> Result<(), caskdb::Error> {
    /// # let db = DB::open("./data", Options::default())?;
    /// db.put(b"key", b"value")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.shared.state.write().put(key, value)
    }

    /// Retrieves the value of a key.
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` if the key has no live value, and
    /// `ChecksumMismatch` if the stored record is damaged.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use caskdb::{DB, Error, Options};
    /// # fn main() -> Result<(), caskdb::Error> {
    /// # let db = DB::open("./data", Options::default())?;
    /// match db.get(b"key") {
    ///     Ok(value) => println!("Found: {:?}", value),
    ///     Err(Error::KeyNotFound) => println!("Not found"),
    ///     Err(e) => return Err(e),
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.shared.state.read().get(key)
    }

    /// Deletes a key from the database.
    ///
    /// This appends a tombstone record and drops the key from the index.
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` if the key has no live value.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.shared.state.write().delete(key)
    }

    /// Runs a merge cycle now and waits for it.
    ///
    /// The cycle runs on the background worker, so it never overlaps with a
    /// timer-triggered one.
    pub fn merge(&self) -> Result<MergeStats> {
        let worker = self.worker.lock();
        match worker.as_ref() {
            Some(worker) => worker.merge(),
            None => Err(State::closed()),
        }
    }

    /// Returns true if the key has a live value
    pub fn contains_key(&self, key: &[u8]) -> Result<bool> {
        let state = self.shared.state.read();
        state.wal()?;
        Ok(state.index.contains_key(key))
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.shared.state.read().index.len()
    }

    /// Returns true if there are no live keys
    pub fn is_empty(&self) -> bool {
        self.shared.state.read().index.is_empty()
    }

    /// Number of segment files, active segment included
    pub fn segment_count(&self) -> Result<usize> {
        Ok(self.shared.state.read().wal()?.segment_count())
    }

    /// Syncs the active segment to disk.
    pub fn sync(&self) -> Result<()> {
        self.shared.state.read().wal()?.sync()
    }

    /// Returns the database directory
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Returns the options the database was opened with
    pub fn options(&self) -> &Options {
        &self.shared.options
    }

    /// Closes the database.
    ///
    /// Stops the merge worker (after any cycle in flight), then syncs and
    /// closes every segment. Further calls are no-ops; every other operation
    /// fails with `InvalidState` afterwards.
    pub fn close(&self) -> Result<()> {
        let worker = self.worker.lock().take();
        let Some(worker) = worker else {
            return Ok(());
        };

        let stopped = worker.shutdown();
        let closed = self.shared.state.write().close();
        stopped.and(closed)?;

        log::info!("Database closed successfully");
        Ok(())
    }
}

impl Drop for DB {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::error!("Error closing database during drop: {}", e);
        }
    }
}
