//! Error types for the SepKV storage engine.

use std::io;

/// The result type used throughout SepKV.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for SepKV operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The caller supplied an empty key.
    #[error("Key cannot be empty")]
    EmptyKey,

    /// The requested key was not found.
    ///
    /// Lower layers return this on a read miss; `DB::get` turns it into `Ok(None)`.
    #[error("Key not found")]
    KeyNotFound,

    /// A record, block or table failed checksum verification.
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// The checksum stored on disk.
        expected: u32,
        /// The checksum computed over the bytes read.
        actual: u32,
    },

    /// Data corruption other than a checksum failure was detected.
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// An invalid argument was provided.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The database has been closed.
    #[error("Database is closed")]
    Closed,

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
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

    /// Returns true for a read miss.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::KeyNotFound)
    }

    /// Returns true when the error means "stop trusting the bytes from here on".
    ///
    /// Log replay uses this to tell a torn tail apart from a real I/O failure.
    pub fn is_torn_record(&self) -> bool {
        match self {
            Error::ChecksumMismatch { .. } | Error::Corruption(_) => true,
            Error::Io(e) => e.kind() == io::ErrorKind::UnexpectedEof,
            _ => false,
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
