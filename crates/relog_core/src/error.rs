//! Error types for the log engine.

use std::io;
use thiserror::Error;

/// Result type for log operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in log operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] relog_storage::StorageError),

    /// Event codec error.
    #[error("codec error: {0}")]
    Codec(#[from] relog_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A segment holds data the log cannot interpret.
    ///
    /// Carries enough context to locate the damage: file, byte offset, and
    /// what was found there.
    #[error("log corruption in {file} at offset {offset}: {message}")]
    Corruption {
        /// Segment file name.
        file: String,
        /// Byte offset of the bad record.
        offset: u64,
        /// Description of what was found.
        message: String,
    },

    /// Stored and computed record checksums disagree.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Checksum stored in the record.
        expected: u64,
        /// Checksum computed over the payload.
        actual: u64,
    },

    /// Invalid segment header or version.
    #[error("invalid segment format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// The log is open read-only and a mutation was requested.
    #[error("log is read-only")]
    ReadOnly,

    /// Caller defect: double-loaned cursor, write through a read-only
    /// segment handle, interior-range delete.
    #[error("misuse: {message}")]
    Misuse {
        /// Description of the defect.
        message: String,
    },

    /// The log has been released; no further operations are accepted.
    #[error("log is closed")]
    LogClosed,
}

impl CoreError {
    /// Creates a corruption error.
    pub fn corruption(file: impl Into<String>, offset: u64, message: impl Into<String>) -> Self {
        Self::Corruption {
            file: file.into(),
            offset,
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates a misuse error.
    pub fn misuse(message: impl Into<String>) -> Self {
        Self::Misuse {
            message: message.into(),
        }
    }
}
