//! Audit log entries.

use agent_primitives::{Identity, ScopeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of permission change recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Scope was granted to the identity.
    Grant,
    /// Scope was revoked from the identity.
    Revoke,
}

/// Single append-only record of a permission change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Whether the scope was granted or revoked.
    pub action: AuditAction,
    /// Identity whose permissions changed.
    pub identity: Identity,
    /// Scope that changed.
    pub scope: ScopeId,
    /// Time the change was recorded.
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialises_with_lowercase_action() {
        let entry = AuditEntry {
            action: AuditAction::Revoke,
            identity: Identity::new("cli_agent").unwrap(),
            scope: ScopeId::new("tool.echo").unwrap(),
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["action"], "revoke");
        assert_eq!(value["identity"], "cli_agent");
        assert_eq!(value["scope"], "tool.echo");
        assert!(value["timestamp"].is_string());
    }
}
