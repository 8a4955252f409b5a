//! Error types for the caskdb storage engine.

use std::io;
use thiserror::Error;

/// The result type used throughout caskdb.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for caskdb operations.
#[derive(Debug, Error)]
pub enum Error {
    /// An I/O error occurred. Propagated verbatim from the failing file operation.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The requested key has no live entry in the index.
    #[error("Key not found")]
    KeyNotFound,

    /// A stored checksum disagrees with the one recomputed from the data.
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// The checksum stored alongside the data.
        expected: u32,
        /// The checksum recomputed from the bytes that were read.
        actual: u32,
    },

    /// Structural damage that is not a checksum failure (bad lengths, unknown flags).
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// An invalid argument was provided.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The engine is in a state that does not allow the operation.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl Error {
    /// Creates a new corruption error.
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// Creates a new invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Creates a new invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }
}
