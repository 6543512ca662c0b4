//! Structured tracing helpers.

use agent_config::TelemetrySettings;
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Errors raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The filter directive could not be parsed.
    #[error("invalid log filter `{directive}`: {reason}")]
    InvalidFilter {
        /// Directive as supplied.
        directive: String,
        /// Parser message.
        reason: String,
    },
    /// A global subscriber was already installed.
    #[error("failed to install tracing subscriber: {reason}")]
    Install {
        /// Underlying message.
        reason: String,
    },
}

/// Builds the event filter: `RUST_LOG` when set, otherwise the configured
/// directive.
///
/// # Errors
///
/// Returns [`TelemetryError::InvalidFilter`] when the directive is malformed.
pub fn filter(settings: &TelemetrySettings) -> Result<EnvFilter, TelemetryError> {
    let directive = std::env::var(EnvFilter::DEFAULT_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| settings.filter.clone());
    parse_filter(&directive)
}

fn parse_filter(directive: &str) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(directive).map_err(|err| TelemetryError::InvalidFilter {
        directive: directive.to_owned(),
        reason: err.to_string(),
    })
}

/// Installs a global fmt subscriber writing to stderr.
///
/// # Errors
///
/// Returns [`TelemetryError`] when the filter is invalid or a subscriber is
/// already installed.
pub fn init(settings: &TelemetrySettings) -> Result<(), TelemetryError> {
    let filter = filter(settings)?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(settings.with_target)
        .with_level(true)
        .with_ansi(settings.ansi)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| TelemetryError::Install {
            reason: err.to_string(),
        })?;
    debug!(filter = %settings.filter, "tracing initialised");
    Ok(())
}
