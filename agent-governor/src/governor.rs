//! Reviewed lifecycle of catalog tools: propose, roll back, remove, reload.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use agent_policy::{GrantStore, ScopeRegistry};
use agent_primitives::{Identity, ScopeId};
use agent_tools::{
    SyntaxError, ToolCompiler, ToolError, ToolMetadata, ToolOrigin, ToolRegistry,
};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::approval::{ReviewDecision, ReviewSubject, Reviewer};
use crate::catalog::{ToolCatalog, ToolRecord};
use crate::deps::CatalogDependencies;
use crate::rejection::{Rejection, RejectionLog};
use crate::{GovernanceError, GovernanceResult};

/// Result of a proposal that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposalOutcome {
    /// The tool is live.
    Approved {
        /// Tool name.
        name: String,
        /// Version number of the approved source.
        version: usize,
        /// Scopes newly granted to the proposer.
        granted: Vec<ScopeId>,
    },
    /// A reviewer declined; the rejection was recorded.
    Rejected {
        /// Tool name.
        name: String,
        /// Reviewer-supplied reason.
        reason: Option<String>,
    },
}

impl ProposalOutcome {
    /// Returns whether the tool was approved.
    #[must_use]
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved { .. })
    }
}

impl fmt::Display for ProposalOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Approved { name, version, .. } => write!(f, "{name} approved (v{version})"),
            Self::Rejected { name, reason } => match reason {
                Some(reason) if !reason.is_empty() => write!(f, "{name} rejected: {reason}"),
                _ => write!(f, "{name} rejected"),
            },
        }
    }
}

/// Result of a rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackOutcome {
    /// Tool name.
    pub name: String,
    /// Version number whose source was restored.
    pub restored: usize,
    /// Version number the restored source now carries.
    pub current: usize,
}

impl fmt::Display for RollbackOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rolled back to v{} (now v{})",
            self.name, self.restored, self.current
        )
    }
}

/// Result of a removal request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalOutcome {
    /// The tool is gone.
    Removed {
        /// Tool name.
        name: String,
        /// Identities whose grant of the tool scope was revoked.
        revoked: Vec<Identity>,
    },
    /// A reviewer kept the tool because other tools call it.
    Cancelled {
        /// Tool name.
        name: String,
        /// Tools that call it.
        dependents: Vec<String>,
    },
}

impl fmt::Display for RemovalOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Removed { name, .. } => write!(f, "{name} removed"),
            Self::Cancelled { name, .. } => write!(f, "removal of {name} cancelled"),
        }
    }
}

/// Catalog listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSummary {
    /// Tool name.
    pub name: String,
    /// Current description.
    pub description: String,
    /// Current version number.
    pub version: usize,
    /// Original proposer.
    pub created_by: Option<Identity>,
    /// First approval time.
    pub created_at: Option<DateTime<Utc>>,
    /// Whether a callable is currently published under the name.
    pub live: bool,
}

/// What [`ToolGovernor::materialize_all`] did.
#[derive(Debug, Default)]
pub struct MaterializeReport {
    /// Tools compiled and published, sorted.
    pub loaded: Vec<String>,
    /// Tools left unpublished because their source no longer compiles.
    pub skipped: Vec<(String, SyntaxError)>,
    /// Previously published catalog tools withdrawn by this pass.
    pub withdrawn: Vec<String>,
    /// Scopes newly granted to the requested identity.
    pub granted: Vec<ScopeId>,
}

/// Coordinates the catalog, the live registry, scopes, grants, and review.
///
/// Source is validated before any reviewer sees it and every durable write
/// happens before the live registry changes.
pub struct ToolGovernor {
    catalog: Arc<ToolCatalog>,
    rejections: RejectionLog,
    grants: Arc<GrantStore>,
    registry: Arc<ToolRegistry>,
    compiler: Arc<dyn ToolCompiler>,
    dependencies: Arc<CatalogDependencies>,
    reviewer: Arc<dyn Reviewer>,
}

impl fmt::Debug for ToolGovernor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolGovernor")
            .field("catalog", &self.catalog)
            .field("rejections", &self.rejections)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl ToolGovernor {
    /// Wires a governor from its parts.
    ///
    /// `dependencies` should read the same `catalog`, and `grants` should use
    /// it as its dependency source so that tool grants follow calls.
    #[must_use]
    pub fn new(
        catalog: Arc<ToolCatalog>,
        rejections: RejectionLog,
        grants: Arc<GrantStore>,
        registry: Arc<ToolRegistry>,
        compiler: Arc<dyn ToolCompiler>,
        dependencies: Arc<CatalogDependencies>,
        reviewer: Arc<dyn Reviewer>,
    ) -> Self {
        Self {
            catalog,
            rejections,
            grants,
            registry,
            compiler,
            dependencies,
            reviewer,
        }
    }

    /// Returns the tool catalog.
    #[must_use]
    pub fn catalog(&self) -> &Arc<ToolCatalog> {
        &self.catalog
    }

    fn scopes(&self) -> &Arc<ScopeRegistry> {
        self.grants.scopes()
    }

    /// Submits tool source for review.
    ///
    /// Invalid source is refused before a reviewer is asked. A declined
    /// proposal is recorded in the rejection log. An approved one is written
    /// to the catalog, published, given its `tool.<name>` scope, and that
    /// scope (with its transitive dependencies) is granted to `proposer`.
    ///
    /// Names of builtin tools cannot be proposed. If an approved tool cannot
    /// be published or granted to `proposer`, the catalog, registry and
    /// scopes are put back as they were before the proposal.
    ///
    /// # Errors
    ///
    /// Returns [`GovernanceError::SyntaxInvalid`] for invalid source,
    /// [`GovernanceError::Tool`] when `name` belongs to a builtin tool, or a
    /// persistence failure.
    pub async fn propose(
        &self,
        name: &str,
        code: &str,
        description: &str,
        proposer: Option<&Identity>,
    ) -> GovernanceResult<ProposalOutcome> {
        self.compiler
            .check(name, code)
            .map_err(|source| GovernanceError::syntax(name, source))?;

        let live = self.registry.get(name);
        if live
            .as_ref()
            .is_some_and(|handle| handle.metadata().origin() == ToolOrigin::Builtin)
        {
            warn!(tool = name, "proposal refused: name belongs to a builtin tool");
            return Err(ToolError::DuplicateTool {
                name: name.to_owned(),
            }
            .into());
        }

        let overwrite = live.is_some() || self.catalog.contains(name);
        let subject = ReviewSubject::Proposal {
            name: name.to_owned(),
            description: description.to_owned(),
            code: code.to_owned(),
            overwrite,
            proposer: proposer.cloned(),
        };

        if let ReviewDecision::Reject { reason } = self.reviewer.review(subject).await {
            self.rejections
                .record(Rejection {
                    name: name.to_owned(),
                    description: description.to_owned(),
                    code: code.to_owned(),
                    reason: reason.clone(),
                    timestamp: Utc::now(),
                })
                .await?;
            warn!(tool = name, reason = reason.as_deref().unwrap_or(""), "proposal rejected");
            return Ok(ProposalOutcome::Rejected {
                name: name.to_owned(),
                reason,
            });
        }

        let previous = self.catalog.get(name);
        let scope_known = self.scopes().contains(&ScopeId::for_tool(name)?);
        let version = self.catalog.install(name, code, description, proposer).await?;

        let granted = match self.activate(name, code, description, proposer).await {
            Ok(granted) => granted,
            Err(err) => {
                warn!(tool = name, error = %err, "approved tool could not be activated, undoing");
                self.undo_install(name, previous, scope_known).await;
                return Err(err);
            }
        };
        info!(tool = name, version, overwrite, "proposal approved");

        Ok(ProposalOutcome::Approved {
            name: name.to_owned(),
            version,
            granted,
        })
    }

    /// Restores an earlier version of `name` (the most recent one when
    /// `version` is `None`) and republishes it. No review is involved.
    ///
    /// # Errors
    ///
    /// Returns [`GovernanceError::NotFound`], [`GovernanceError::NoHistory`],
    /// [`GovernanceError::SyntaxInvalid`] if the stored source no longer
    /// compiles, or a persistence failure.
    pub async fn rollback(
        &self,
        name: &str,
        version: Option<usize>,
    ) -> GovernanceResult<RollbackOutcome> {
        let compiler = &self.compiler;
        let restored = self
            .catalog
            .rollback(name, version, |candidate| {
                compiler
                    .check(name, &candidate.code)
                    .map(|_| ())
                    .map_err(|source| GovernanceError::syntax(name, source))
            })
            .await?;

        self.publish(name, &restored.record.code, &restored.record.description)?;
        let outcome = RollbackOutcome {
            name: name.to_owned(),
            restored: restored.restored,
            current: restored.record.current_version(),
        };
        info!(tool = name, restored = outcome.restored, current = outcome.current, "tool rolled back");
        Ok(outcome)
    }

    /// Removes `name` from the catalog and the live registry, revoking its
    /// scope from every holder. When other catalog tools call it, a reviewer
    /// must confirm first.
    ///
    /// # Errors
    ///
    /// Returns [`GovernanceError::NotFound`] for an unknown tool, or a
    /// persistence failure.
    pub async fn remove(&self, name: &str) -> GovernanceResult<RemovalOutcome> {
        if !self.catalog.contains(name) {
            return Err(GovernanceError::tool_not_found(name));
        }

        let dependents = self.dependencies.dependents_of(name);
        if !dependents.is_empty() {
            let subject = ReviewSubject::Removal {
                name: name.to_owned(),
                dependents: dependents.clone(),
            };
            if !self.reviewer.review(subject).await.is_approved() {
                info!(tool = name, ?dependents, "removal cancelled");
                return Ok(RemovalOutcome::Cancelled {
                    name: name.to_owned(),
                    dependents,
                });
            }
        }

        self.catalog.remove(name).await?;
        let scope = ScopeId::for_tool(name)?;
        let revoked = self.grants.retire_scope(&scope).await?;
        self.scopes().retire(&scope);
        self.registry.unregister(name);
        self.compiler.forget(name);
        info!(tool = name, revoked = revoked.len(), "tool removed");

        Ok(RemovalOutcome::Removed {
            name: name.to_owned(),
            revoked,
        })
    }

    /// Reloads the catalog from disk and rebuilds every catalog tool in a
    /// fresh namespace. Tools that fail to compile are skipped with a warning
    /// and withdrawn if they were live. When `grant_to` is given, every
    /// loaded tool scope it does not already hold is granted to it.
    ///
    /// # Errors
    ///
    /// Returns a persistence failure from reading the catalog or writing
    /// grants.
    pub async fn materialize_all(
        &self,
        grant_to: Option<&Identity>,
    ) -> GovernanceResult<MaterializeReport> {
        self.catalog.reload().await?;
        let entries = self.catalog.snapshot();
        self.compiler.reset();

        let mut report = MaterializeReport::default();
        let mut scopes = Vec::new();
        for (name, record) in &entries {
            match self.publish(name, &record.code, &record.description) {
                Ok(scope) => {
                    report.loaded.push(name.clone());
                    scopes.push(scope);
                }
                Err(GovernanceError::SyntaxInvalid { source, .. }) => {
                    warn!(tool = %name, %source, "catalog tool no longer compiles, skipping");
                    report.skipped.push((name.clone(), source));
                }
                Err(other) => return Err(other),
            }
        }

        let loaded: BTreeSet<&str> = report.loaded.iter().map(String::as_str).collect();
        report.withdrawn = self.registry.retain(|metadata| {
            metadata.origin() == ToolOrigin::Builtin || loaded.contains(metadata.name())
        });
        for name in &report.withdrawn {
            if let Ok(scope) = ScopeId::for_tool(name) {
                self.scopes().retire(&scope);
            }
        }

        if let Some(identity) = grant_to {
            for scope in &scopes {
                if !self.grants.has(identity, scope) {
                    report.granted.extend(self.grants.grant(identity, scope).await?);
                }
            }
        }

        info!(
            loaded = report.loaded.len(),
            skipped = report.skipped.len(),
            withdrawn = report.withdrawn.len(),
            "catalog tools materialized"
        );
        Ok(report)
    }

    /// Lists catalog tools in name order.
    #[must_use]
    pub fn list_tools(&self) -> Vec<ToolSummary> {
        self.catalog.with_entries(|entries| {
            entries
                .iter()
                .map(|(name, record)| ToolSummary {
                    name: name.clone(),
                    description: record.description.clone(),
                    version: record.current_version(),
                    created_by: record.created_by.clone(),
                    created_at: record.created_at,
                    live: self.registry.contains(name),
                })
                .collect()
        })
    }

    /// Returns the one-hop dependency map between catalog tools. Tools
    /// without dependencies are omitted.
    #[must_use]
    pub fn dependencies(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.dependencies.map()
    }

    /// Returns the catalog tools `name` calls directly.
    ///
    /// # Errors
    ///
    /// Returns [`GovernanceError::NotFound`] for an unknown tool.
    pub fn dependencies_of(&self, name: &str) -> GovernanceResult<BTreeSet<String>> {
        if !self.catalog.contains(name) {
            return Err(GovernanceError::tool_not_found(name));
        }
        Ok(self.dependencies.map().remove(name).unwrap_or_default())
    }

    /// Returns catalog tools that call `name` directly.
    #[must_use]
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.dependencies.dependents_of(name)
    }

    /// Returns recorded rejections, optionally only those for `name`.
    #[must_use]
    pub fn past_rejections(&self, name: Option<&str>) -> Vec<Rejection> {
        self.rejections.past(name)
    }

    async fn activate(
        &self,
        name: &str,
        code: &str,
        description: &str,
        proposer: Option<&Identity>,
    ) -> GovernanceResult<Vec<ScopeId>> {
        let scope = self.publish(name, code, description)?;
        match proposer {
            Some(identity) => Ok(self.grants.grant(identity, &scope).await?),
            None => Ok(Vec::new()),
        }
    }

    /// Returns `name` to its state before an install: the previous catalog
    /// entry and live tool, or neither.
    async fn undo_install(&self, name: &str, previous: Option<ToolRecord>, scope_known: bool) {
        let republish = previous
            .as_ref()
            .map(|record| (record.code.clone(), record.description.clone()));
        if let Err(err) = self.catalog.restore(name, previous).await {
            warn!(tool = name, error = %err, "failed to restore catalog entry");
        }

        match republish {
            Some((code, description)) => {
                if let Err(err) = self.publish(name, &code, &description) {
                    warn!(tool = name, error = %err, "failed to republish previous version");
                    self.registry.unregister(name);
                }
            }
            None => {
                self.registry.unregister(name);
                self.compiler.forget(name);
                let added = ScopeId::for_tool(name).ok().filter(|_| !scope_known);
                if let Some(scope) = added {
                    self.scopes().retire(&scope);
                }
            }
        }
    }

    fn publish(&self, name: &str, code: &str, description: &str) -> GovernanceResult<ScopeId> {
        let callable = self
            .compiler
            .materialize(name, code)
            .map_err(|source| GovernanceError::syntax(name, source))?;
        let metadata = ToolMetadata::new(name)?
            .with_description(description)
            .with_origin(ToolOrigin::Catalog);
        let scope = metadata.scope().clone();

        self.registry.publish(metadata, callable);
        self.scopes().register(scope.clone());
        Ok(scope)
    }
}
