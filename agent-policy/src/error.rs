//! Errors surfaced by the permission layer.

use agent_journal::JournalError;
use agent_primitives::ScopeId;
use thiserror::Error;

/// Errors surfaced by grant stores and limiters.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// Scope is not present in the scope registry.
    #[error("unknown scope: {scope}")]
    UnknownScope {
        /// Scope that was requested.
        scope: ScopeId,
    },
    /// Limiter or store configuration error.
    #[error("invalid policy configuration: {0}")]
    InvalidConfig(&'static str),
    /// The audit log could not be read or appended to.
    #[error("audit log failure: {0}")]
    Journal(#[from] JournalError),
}

/// Result alias for policy operations.
pub type PolicyResult<T> = Result<T, PolicyError>;
