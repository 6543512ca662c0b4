//! Permission scope identifiers.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const MAX_SCOPE_LEN: usize = 96;

/// Prefix shared by every scope that gates a registered tool.
pub const TOOL_SCOPE_PREFIX: &str = "tool.";

/// Globally unique name of a permission unit, e.g. `filesystem.read` or
/// `tool.read_file`.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ScopeId(String);

impl ScopeId {
    /// Creates a new scope identifier after validating its format.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidScope`] if the supplied identifier is empty,
    /// too long, or contains unsupported characters.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        validate_scope(&id)?;
        Ok(Self(id))
    }

    /// Returns the scope gating the tool with the supplied name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidScope`] if the tool name does not yield a valid
    /// scope identifier.
    pub fn for_tool(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::InvalidScope {
                id: TOOL_SCOPE_PREFIX.into(),
                reason: "tool name cannot be empty".into(),
            });
        }
        Self::new(format!("{TOOL_SCOPE_PREFIX}{name}"))
    }

    /// Returns the tool name when this scope gates a tool.
    #[must_use]
    pub fn tool_name(&self) -> Option<&str> {
        self.0
            .strip_prefix(TOOL_SCOPE_PREFIX)
            .filter(|name| !name.is_empty())
    }

    /// Returns the scope identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ScopeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ScopeId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for ScopeId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ScopeId> for String {
    fn from(value: ScopeId) -> Self {
        value.0
    }
}

fn validate_scope(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::InvalidScope {
            id: String::new(),
            reason: "scope cannot be empty".into(),
        });
    }

    if id.len() > MAX_SCOPE_LEN {
        return Err(Error::InvalidScope {
            id: id.into(),
            reason: format!("scope length must be <= {MAX_SCOPE_LEN}"),
        });
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(Error::InvalidScope {
            id: id.into(),
            reason: "scope must contain ascii alphanumeric, dash, underscore, or dot".into(),
        });
    }

    Ok(())
}
