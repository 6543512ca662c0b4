//! Shared error definitions for toolgate primitives.

use thiserror::Error;

/// Result alias used throughout the runtime.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while constructing primitive types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The provided identity failed validation.
    #[error("invalid identity `{id}`: {reason}")]
    InvalidIdentity {
        /// The offending identity string.
        id: String,
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// Scope identifier failed validation.
    #[error("invalid scope `{id}`: {reason}")]
    InvalidScope {
        /// The offending scope string.
        id: String,
        /// Human-readable reason for rejection.
        reason: String,
    },
}
