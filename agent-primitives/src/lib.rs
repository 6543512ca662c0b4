//! Core shared types for the toolgate governance runtime.

#![warn(missing_docs, clippy::pedantic)]

mod error;
mod ids;
mod scope;

/// Error type and result alias shared across the workspace.
pub use error::{Error, Result};
/// Principal on whose behalf tools are granted and invoked.
pub use ids::Identity;
/// Permission scope identifiers.
pub use scope::{ScopeId, TOOL_SCOPE_PREFIX};
