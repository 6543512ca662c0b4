//! Permission state for tool governance.
//!
//! Grants are never stored directly: the [`GrantStore`] derives them from an
//! append-only audit log which it replays on start. Scopes must be known to
//! the [`ScopeRegistry`] before they can be granted, and the [`RateLimiter`]
//! provides per-identity admission control independent of both.

#![warn(missing_docs, clippy::pedantic)]

pub mod audit;
mod error;
pub mod grants;
pub mod ratelimit;
pub mod scopes;

pub use audit::{AuditAction, AuditEntry};
pub use error::{PolicyError, PolicyResult};
pub use grants::{DependencySource, GrantMap, GrantStore, NoDependencies, replay};
pub use ratelimit::{RateLimitConfig, RateLimiter};
pub use scopes::{BUILTIN_SCOPES, ScopeRegistry};
