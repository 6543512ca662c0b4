//! Strongly typed configuration schema.
//!
//! Every section and field has a default, so an empty file (or no file at
//! all) yields a working configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use agent_primitives::ScopeId;
use serde::{Deserialize, Serialize};

use crate::{ConfigError, ConfigResult};

/// Root configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GovernanceConfig {
    /// Where durable state lives.
    pub storage: StorageSettings,
    /// Per-identity admission control for tool runs.
    pub rate_limit: RateLimitSettings,
    /// Limits applied to scripted tools.
    pub sandbox: SandboxSettings,
    /// Static scopes known at start-up.
    pub scopes: ScopeSettings,
    /// Human review behaviour.
    pub review: ReviewSettings,
    /// Logging output.
    pub telemetry: TelemetrySettings,
}

impl GovernanceConfig {
    /// Checks value ranges that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> ConfigResult<()> {
        for (field, name) in [
            ("storage.tools_file", &self.storage.tools_file),
            ("storage.audit_file", &self.storage.audit_file),
            ("storage.rejections_file", &self.storage.rejections_file),
        ] {
            if name.trim().is_empty() {
                return Err(ConfigError::invalid(format!("{field} cannot be empty")));
            }
        }
        if self.rate_limit.max_requests == 0 {
            return Err(ConfigError::invalid(
                "rate_limit.max_requests must be greater than zero",
            ));
        }
        if self.rate_limit.window_secs == 0 {
            return Err(ConfigError::invalid(
                "rate_limit.window_secs must be greater than zero",
            ));
        }
        if self.sandbox.max_call_depth == 0 || self.sandbox.max_steps == 0 {
            return Err(ConfigError::invalid(
                "sandbox limits must be greater than zero",
            ));
        }
        if self.review.timeout_secs == Some(0) {
            return Err(ConfigError::invalid(
                "review.timeout_secs must be greater than zero when set",
            ));
        }
        self.scopes.builtin_scopes().map(|_| ())
    }
}

/// Locations of the catalog and logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageSettings {
    /// Directory holding every file below.
    pub data_dir: PathBuf,
    /// Tool catalog document.
    pub tools_file: String,
    /// Grant/revoke audit log.
    pub audit_file: String,
    /// Declined proposal log.
    pub rejections_file: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            tools_file: "tools.json".to_owned(),
            audit_file: "audit.jsonl".to_owned(),
            rejections_file: "rejections.jsonl".to_owned(),
        }
    }
}

impl StorageSettings {
    /// Full path of the tool catalog.
    #[must_use]
    pub fn tools_path(&self) -> PathBuf {
        self.resolve(&self.tools_file)
    }

    /// Full path of the audit log.
    #[must_use]
    pub fn audit_path(&self) -> PathBuf {
        self.resolve(&self.audit_file)
    }

    /// Full path of the rejection log.
    #[must_use]
    pub fn rejections_path(&self) -> PathBuf {
        self.resolve(&self.rejections_file)
    }

    fn resolve(&self, file: &str) -> PathBuf {
        let file = Path::new(file);
        if file.is_absolute() {
            file.to_path_buf()
        } else {
            self.data_dir.join(file)
        }
    }
}

/// Sliding-window limits for tool runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitSettings {
    /// Whether runs are limited at all.
    pub enabled: bool,
    /// Runs admitted per window.
    pub max_requests: usize,
    /// Window length in seconds.
    pub window_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: 5,
            window_secs: 60,
        }
    }
}

impl RateLimitSettings {
    /// Window as a [`Duration`].
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Evaluation limits for scripted tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxSettings {
    /// Maximum nested calls per invocation.
    pub max_call_depth: usize,
    /// Maximum evaluation steps per invocation.
    pub max_steps: u64,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            max_call_depth: 64,
            max_steps: 100_000,
        }
    }
}

/// Static scopes registered at start-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScopeSettings {
    /// Scope identifiers that exist independently of any tool.
    pub builtin: Vec<String>,
}

impl Default for ScopeSettings {
    fn default() -> Self {
        Self {
            builtin: ["filesystem.read", "dialog.read", "dialog.write"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
        }
    }
}

impl ScopeSettings {
    /// Parses the configured scope identifiers.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for the first malformed identifier.
    pub fn builtin_scopes(&self) -> ConfigResult<Vec<ScopeId>> {
        self.builtin
            .iter()
            .map(|scope| {
                ScopeId::new(scope.as_str())
                    .map_err(|err| ConfigError::invalid(format!("scopes.builtin: {err}")))
            })
            .collect()
    }
}

/// Human review behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReviewSettings {
    /// Seconds to wait for a decision before treating the request as
    /// declined. Waits indefinitely when unset.
    pub timeout_secs: Option<u64>,
}

impl ReviewSettings {
    /// Timeout as a [`Duration`].
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Logging output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetrySettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Emit ANSI colours.
    pub ansi: bool,
    /// Include event targets in output.
    pub with_target: bool,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            filter: "info".to_owned(),
            ansi: true,
            with_target: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = GovernanceConfig::default();
        config.validate().unwrap();
        assert_eq!(config.rate_limit.max_requests, 5);
        assert_eq!(config.scopes.builtin_scopes().unwrap().len(), 3);
        assert_eq!(config.storage.audit_path(), PathBuf::from("./audit.jsonl"));
    }

    #[test]
    fn zero_limits_are_rejected() {
        let mut config = GovernanceConfig::default();
        config.rate_limit.window_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));

        let mut config = GovernanceConfig::default();
        config.review.timeout_secs = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_builtin_scope_is_rejected() {
        let mut config = GovernanceConfig::default();
        config.scopes.builtin.push("bad scope".to_owned());
        assert!(config.validate().is_err());
    }

    #[test]
    fn absolute_file_names_ignore_data_dir() {
        let storage = StorageSettings {
            data_dir: PathBuf::from("/var/lib/toolgate"),
            tools_file: "/etc/toolgate/tools.json".to_owned(),
            ..StorageSettings::default()
        };
        assert_eq!(storage.tools_path(), PathBuf::from("/etc/toolgate/tools.json"));
        assert_eq!(
            storage.audit_path(),
            PathBuf::from("/var/lib/toolgate/audit.jsonl")
        );
    }
}
