//! Permission-scoped handle bound to a single identity.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use agent_policy::{AuditEntry, GrantStore, RateLimiter};
use agent_primitives::{Identity, ScopeId};
use agent_tools::ToolRegistry;
use serde_json::Value;
use tracing::{debug, warn};

use crate::governor::{ProposalOutcome, ToolGovernor};
use crate::{GovernanceError, GovernanceResult};

/// Runs tools on behalf of one identity, checking its scopes on every call.
#[derive(Clone)]
pub struct Agent {
    identity: Identity,
    grants: Arc<GrantStore>,
    registry: Arc<ToolRegistry>,
    governor: Arc<ToolGovernor>,
    limiter: Option<Arc<RateLimiter>>,
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("identity", &self.identity)
            .field("rate_limited", &self.limiter.is_some())
            .finish_non_exhaustive()
    }
}

impl Agent {
    /// Creates an agent for `identity`.
    #[must_use]
    pub fn new(
        identity: Identity,
        grants: Arc<GrantStore>,
        registry: Arc<ToolRegistry>,
        governor: Arc<ToolGovernor>,
    ) -> Self {
        Self {
            identity,
            grants,
            registry,
            governor,
            limiter: None,
        }
    }

    /// Applies `limiter` to [`Agent::run`].
    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Identity this agent acts for.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Grants `scope`, and for tool scopes every scope of the tools it calls.
    /// Returns the scopes that were not already held.
    ///
    /// # Errors
    ///
    /// Returns [`GovernanceError::UnknownScope`] if the scope is malformed or
    /// not registered, or a persistence failure.
    pub async fn grant(&self, scope: &str) -> GovernanceResult<Vec<ScopeId>> {
        let scope = parse_scope(scope)?;
        Ok(self.grants.grant(&self.identity, &scope).await?)
    }

    /// Revokes `scope`. Scopes granted alongside it are kept.
    ///
    /// # Errors
    ///
    /// Returns [`GovernanceError::UnknownScope`] if the scope is malformed, or
    /// a persistence failure.
    pub async fn revoke(&self, scope: &str) -> GovernanceResult<()> {
        let scope = parse_scope(scope)?;
        Ok(self.grants.revoke(&self.identity, &scope).await?)
    }

    /// Returns whether the identity holds `scope`.
    #[must_use]
    pub fn has(&self, scope: &str) -> bool {
        ScopeId::new(scope).is_ok_and(|scope| self.grants.has(&self.identity, &scope))
    }

    /// Scopes currently held, sorted.
    #[must_use]
    pub fn grants(&self) -> BTreeSet<ScopeId> {
        self.grants.scopes_of(&self.identity)
    }

    /// Grant and revoke history for this identity.
    #[must_use]
    pub fn history(&self) -> Vec<AuditEntry> {
        self.grants.history(Some(&self.identity))
    }

    /// Runs the tool `name` with `args`.
    ///
    /// Checks, in order: the rate limit, that the tool exists, that the
    /// identity holds `tool.<name>`, then every additional scope the tool
    /// declares.
    ///
    /// # Errors
    ///
    /// Returns [`GovernanceError::RateLimited`],
    /// [`GovernanceError::UnknownSkill`], [`GovernanceError::PermissionDenied`]
    /// or the tool's own failure.
    pub async fn run(&self, name: &str, args: Value) -> GovernanceResult<Value> {
        if let Some(limiter) = &self.limiter {
            if !limiter.allow(&self.identity) {
                warn!(identity = %self.identity, tool = name, "run rate limited");
                return Err(GovernanceError::RateLimited {
                    identity: self.identity.clone(),
                });
            }
        }

        let handle = self
            .registry
            .get(name)
            .ok_or_else(|| GovernanceError::UnknownSkill {
                name: name.to_owned(),
            })?;

        let metadata = handle.metadata();
        for scope in std::iter::once(metadata.scope()).chain(metadata.required_scopes()) {
            if !self.grants.has(&self.identity, scope) {
                warn!(identity = %self.identity, tool = name, %scope, "run denied");
                return Err(GovernanceError::PermissionDenied {
                    identity: self.identity.clone(),
                    scope: scope.clone(),
                });
            }
        }

        debug!(identity = %self.identity, tool = name, "running tool");
        Ok(handle.invoke(args).await?)
    }

    /// Proposes a tool as this identity.
    ///
    /// # Errors
    ///
    /// See [`ToolGovernor::propose`].
    pub async fn propose(
        &self,
        name: &str,
        code: &str,
        description: &str,
    ) -> GovernanceResult<ProposalOutcome> {
        self.governor
            .propose(name, code, description, Some(&self.identity))
            .await
    }
}

fn parse_scope(scope: &str) -> GovernanceResult<ScopeId> {
    ScopeId::new(scope).map_err(|_| GovernanceError::UnknownScope {
        scope: scope.to_owned(),
    })
}
