//! Identity types.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

const MAX_IDENTITY_LEN: usize = 128;

/// Principal on whose behalf scopes are granted and tools are run.
///
/// Identities are opaque to the runtime: a chat user id, a service account or
/// a fixed name such as `cli_agent` are all valid.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    /// Creates an identity after validating its format.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIdentity`] if the identity is empty, too long,
    /// or contains whitespace or control characters.
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::InvalidIdentity {
                id,
                reason: "identity cannot be empty".into(),
            });
        }
        if id.len() > MAX_IDENTITY_LEN {
            return Err(Error::InvalidIdentity {
                id,
                reason: format!("identity length must be <= {MAX_IDENTITY_LEN}"),
            });
        }
        if id.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(Error::InvalidIdentity {
                id,
                reason: "identity cannot contain whitespace or control characters".into(),
            });
        }
        Ok(Self(id))
    }

    /// Returns the identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Identity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Identity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Identity {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Identity> for String {
    fn from(value: Identity) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_identity() {
        let id = Identity::new("discord-1234").expect("identity");
        let parsed = id.to_string().parse::<Identity>().expect("parse");
        assert_eq!(id, parsed);
    }

    #[test]
    fn rejects_blank_and_spaced_identities() {
        assert!(Identity::new("").is_err());
        assert!(Identity::new("cli agent").is_err());
        assert!(Identity::new("x".repeat(MAX_IDENTITY_LEN + 1)).is_err());
    }

    #[test]
    fn deserialization_validates() {
        let err = serde_json::from_str::<Identity>("\"a b\"");
        assert!(err.is_err());

        let id: Identity = serde_json::from_str("\"cli_agent\"").unwrap();
        assert_eq!(id.as_str(), "cli_agent");
    }
}
