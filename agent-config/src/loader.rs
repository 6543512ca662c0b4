//! Configuration loader.
//!
//! Resolution order: explicit path, then `TOOLGATE_CONFIG`, then built-in
//! defaults. Environment overrides are applied last, followed by validation.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::schema::GovernanceConfig;
use crate::{ConfigError, ConfigResult};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "TOOLGATE_CONFIG";
/// Environment variable overriding `storage.data_dir`.
pub const DATA_DIR_ENV: &str = "TOOLGATE_DATA_DIR";
/// Environment variable overriding `telemetry.filter`.
pub const LOG_ENV: &str = "TOOLGATE_LOG";

/// Loads configuration from `path`, or from `TOOLGATE_CONFIG` when no path
/// is given, falling back to defaults when neither is set.
///
/// # Errors
///
/// Returns [`ConfigError`] if the file cannot be read or parsed, or if the
/// resulting configuration fails validation.
pub fn load(path: Option<&Path>) -> ConfigResult<GovernanceConfig> {
    load_with_env(path, |key| std::env::var(key).ok())
}

/// Parses configuration from a TOML string without consulting the
/// environment.
///
/// # Errors
///
/// Returns [`ConfigError`] on parse or validation failure.
pub fn load_from_str(contents: &str) -> ConfigResult<GovernanceConfig> {
    let config = parse(contents, "<inline>")?;
    config.validate()?;
    Ok(config)
}

fn load_with_env<F>(path: Option<&Path>, env: F) -> ConfigResult<GovernanceConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let path = path
        .map(Path::to_path_buf)
        .or_else(|| env(CONFIG_ENV).filter(|value| !value.is_empty()).map(PathBuf::from));

    let mut config = match &path {
        Some(path) => {
            let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            info!(path = %path.display(), "loaded configuration file");
            parse(&contents, &path.display().to_string())?
        }
        None => {
            debug!("no configuration file given, using defaults");
            GovernanceConfig::default()
        }
    };

    apply_overrides(&mut config, &env);
    config.validate()?;
    Ok(config)
}

fn parse(contents: &str, origin: &str) -> ConfigResult<GovernanceConfig> {
    toml::from_str(contents).map_err(|source| ConfigError::Parse {
        origin: origin.to_owned(),
        source,
    })
}

fn apply_overrides<F>(config: &mut GovernanceConfig, env: &F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(dir) = env(DATA_DIR_ENV).filter(|value| !value.is_empty()) {
        debug!(data_dir = %dir, "data directory overridden from environment");
        config.storage.data_dir = PathBuf::from(dir);
    }
    if let Some(filter) = env(LOG_ENV).filter(|value| !value.is_empty()) {
        config.telemetry.filter = filter;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use uuid::Uuid;

    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config = load_from_str(
            "[rate_limit]\nmax_requests = 10\n\n[review]\ntimeout_secs = 30\n",
        )
        .unwrap();
        assert_eq!(config.rate_limit.max_requests, 10);
        assert_eq!(config.rate_limit.window_secs, 60);
        assert_eq!(config.review.timeout_secs, Some(30));
        assert_eq!(config.storage.tools_file, "tools.json");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = load_from_str("[storage]\ndatadir = \"x\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn invalid_values_fail_validation() {
        let err = load_from_str("[sandbox]\nmax_steps = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn environment_selects_file_and_overrides_values() {
        let path = std::env::temp_dir().join(format!("toolgate-config-{}.toml", Uuid::new_v4()));
        std::fs::write(&path, "[telemetry]\nfilter = \"warn\"\n").unwrap();
        let path_str = path.display().to_string();

        let env = env_of(&[
            (CONFIG_ENV, path_str.as_str()),
            (DATA_DIR_ENV, "/srv/toolgate"),
        ]);
        let config = load_with_env(None, env).unwrap();
        assert_eq!(config.telemetry.filter, "warn");
        assert_eq!(config.storage.data_dir, PathBuf::from("/srv/toolgate"));

        let env = env_of(&[(CONFIG_ENV, path_str.as_str()), (LOG_ENV, "debug")]);
        let config = load_with_env(None, env).unwrap();
        assert_eq!(config.telemetry.filter, "debug");

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let path = std::env::temp_dir().join(format!("toolgate-missing-{}.toml", Uuid::new_v4()));
        let err = load_with_env(Some(&path), env_of(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn no_file_yields_defaults() {
        let config = load_with_env(None, env_of(&[])).unwrap();
        assert_eq!(config, GovernanceConfig::default());
    }
}
