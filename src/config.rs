//! Configuration options for the caskdb storage engine.

use std::time::Duration;

/// Default rotation threshold for the active segment: 1MB.
pub const DEFAULT_MAX_SEGMENT_SIZE: u64 = 1024 * 1024;

/// Default period of the background merge timer.
pub const DEFAULT_MERGE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Configuration options for opening a database.
///
/// The directory itself is passed to [`DB::open`](crate::DB::open) separately.
#[derive(Debug, Clone)]
pub struct Options {
    /// Create the database directory if it doesn't exist.
    /// Default: true
    pub create_if_missing: bool,

    /// Error if the database directory already exists.
    /// Default: false
    pub error_if_exists: bool,

    /// Size limit of a segment file (in bytes). An append that would push the
    /// active segment past this limit rotates to a fresh segment first.
    /// Default: 1MB
    pub max_segment_size: u64,

    /// fsync the active segment after every append.
    /// Default: false
    pub sync_writes: bool,

    /// Period of the background merge timer. `Duration::ZERO` disables the
    /// timer; merges then only run through [`DB::merge`](crate::DB::merge).
    /// Default: 1 hour
    pub merge_interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            error_if_exists: false,
            max_segment_size: DEFAULT_MAX_SEGMENT_SIZE,
            sync_writes: false,
            merge_interval: DEFAULT_MERGE_INTERVAL,
        }
    }
}

impl Options {
    /// Creates a new Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the database if it doesn't exist.
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether opening an existing database is an error.
    pub fn error_if_exists(mut self, value: bool) -> Self {
        self.error_if_exists = value;
        self
    }

    /// Sets the segment size limit.
    pub fn max_segment_size(mut self, size: u64) -> Self {
        self.max_segment_size = size;
        self
    }

    /// Enables or disables fsync after every append.
    pub fn sync_writes(mut self, value: bool) -> Self {
        self.sync_writes = value;
        self
    }

    /// Sets the background merge period (`Duration::ZERO` disables it).
    pub fn merge_interval(mut self, interval: Duration) -> Self {
        self.merge_interval = interval;
        self
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_segment_size == 0 {
            return Err(crate::Error::invalid_argument(
                "max_segment_size must be > 0",
            ));
        }
        Ok(())
    }
}
