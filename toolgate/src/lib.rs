//! Toolgate facade.
//!
//! Bundles the runtime crates behind feature flags. Most users only need
//! [`governor::Governance`], which opens the catalog, grants, and review
//! channel from a [`config::GovernanceConfig`].

#![warn(missing_docs, clippy::pedantic)]

/// Identity and scope identifiers.
pub use agent_primitives as primitives;

/// Append-only journals and atomic JSON documents (enabled by `journal` feature).
#[cfg(feature = "journal")]
pub use agent_journal as journal;

/// Scopes, audit-backed grants, and rate limiting (enabled by `policy` feature).
#[cfg(feature = "policy")]
pub use agent_policy as policy;

/// Tool registry and the script sandbox (enabled by `tools` feature).
#[cfg(feature = "tools")]
pub use agent_tools as tools;

/// Configuration loading (enabled by `config` feature).
#[cfg(feature = "config")]
pub use agent_config as config;

/// Tracing subscriber setup (enabled by `telemetry` feature).
#[cfg(feature = "telemetry")]
pub use agent_telemetry as telemetry;

/// Reviewed tool lifecycle and scoped agents (enabled by `governor` feature).
#[cfg(feature = "governor")]
pub use agent_governor as governor;
