use agent_config::ConfigError;
use agent_journal::JournalError;
use agent_policy::PolicyError;
use agent_primitives::{Identity, ScopeId};
use agent_tools::{SyntaxError, ToolError};
use thiserror::Error;

/// Errors surfaced by tool governance and permission-scoped agents.
#[derive(Debug, Error)]
pub enum GovernanceError {
    /// Scope is not registered, or is not even a well-formed identifier.
    #[error("unknown scope: {scope}")]
    UnknownScope {
        /// Scope as supplied by the caller.
        scope: String,
    },
    /// No live tool is registered under the name.
    #[error("unknown skill: {name}")]
    UnknownSkill {
        /// Requested tool name.
        name: String,
    },
    /// The identity lacks a scope required to run the tool.
    #[error("scope '{scope}' not granted to {identity}")]
    PermissionDenied {
        /// Caller identity.
        identity: Identity,
        /// Missing scope.
        scope: ScopeId,
    },
    /// Proposed or stored source failed validation.
    #[error("{name} has a syntax error: {source}")]
    SyntaxInvalid {
        /// Tool name.
        name: String,
        /// Validation failure.
        #[source]
        source: SyntaxError,
    },
    /// The tool, or the requested version of it, does not exist.
    #[error("{subject} not found")]
    NotFound {
        /// What was looked up.
        subject: String,
    },
    /// Rollback requested for a tool without earlier versions.
    #[error("{name} has no previous versions")]
    NoHistory {
        /// Tool name.
        name: String,
    },
    /// The identity exceeded its run budget.
    #[error("rate limit exceeded for {identity}")]
    RateLimited {
        /// Caller identity.
        identity: Identity,
    },
    /// The tool itself failed; passed through unchanged.
    #[error(transparent)]
    Tool(#[from] ToolError),
    /// A durable store could not be read or written.
    #[error("persistence failure: {0}")]
    Persistence(#[from] JournalError),
    /// Configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// An identifier failed validation.
    #[error(transparent)]
    Identifier(#[from] agent_primitives::Error),
}

impl GovernanceError {
    pub(crate) fn tool_not_found(name: &str) -> Self {
        Self::NotFound {
            subject: format!("tool `{name}`"),
        }
    }

    pub(crate) fn syntax(name: &str, source: SyntaxError) -> Self {
        Self::SyntaxInvalid {
            name: name.to_owned(),
            source,
        }
    }
}

impl From<PolicyError> for GovernanceError {
    fn from(err: PolicyError) -> Self {
        match err {
            PolicyError::UnknownScope { scope } => Self::UnknownScope {
                scope: scope.to_string(),
            },
            PolicyError::InvalidConfig(reason) => Self::Config(ConfigError::Invalid {
                reason: reason.to_owned(),
            }),
            PolicyError::Journal(source) => Self::Persistence(source),
        }
    }
}

/// Result alias for governance operations.
pub type GovernanceResult<T> = Result<T, GovernanceError>;
