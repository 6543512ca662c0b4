//! Error types for durable stores.

use std::path::PathBuf;

use serde_json::Error as SerdeError;
use thiserror::Error;

/// Errors emitted by journals and documents.
#[derive(Debug, Error)]
pub enum JournalError {
    /// Underlying I/O failure while reading or writing store files.
    #[error("i/o error: {source}")]
    Io {
        /// Source [`std::io::Error`].
        #[from]
        source: std::io::Error,
    },
    /// Serialization or deserialization error.
    #[error("serialization error: {source}")]
    Serialization {
        /// Source [`serde_json::Error`].
        #[from]
        source: SerdeError,
    },
    /// A record in the middle of a journal could not be decoded.
    #[error("corrupt journal {} at line {line}: {source}", path.display())]
    Corrupt {
        /// Journal file.
        path: PathBuf,
        /// One-based line number of the offending record.
        line: usize,
        /// Decoding error.
        source: SerdeError,
    },
    /// The backing store refused the write.
    #[error("store unavailable: {reason}")]
    Unavailable {
        /// Human-readable reason describing the failure.
        reason: String,
    },
}

impl JournalError {
    /// Helper to construct unavailability errors from string-like values.
    #[must_use]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }
}

/// Result type alias for store operations.
pub type JournalResult<T> = Result<T, JournalError>;
