//! Configuration management for toolgate deployments.
//!
//! [`schema`] defines the TOML layout with defaults for every field and
//! [`loader`] resolves the file location and applies environment overrides.

#![warn(missing_docs, clippy::pedantic)]

mod error;
pub mod loader;
pub mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{CONFIG_ENV, DATA_DIR_ENV, LOG_ENV, load, load_from_str};
pub use schema::{
    GovernanceConfig, RateLimitSettings, ReviewSettings, SandboxSettings, ScopeSettings,
    StorageSettings, TelemetrySettings,
};
