//! Wiring of every governance component from configuration.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

use agent_config::{ConfigError, GovernanceConfig};
use agent_journal::{FileJournal, Journal};
use agent_policy::{AuditEntry, GrantStore, RateLimitConfig, RateLimiter, ScopeRegistry};
use agent_primitives::Identity;
use agent_tools::{
    DependencyAnalyzer, SandboxLimits, ScriptAnalyzer, ScriptCompiler, Tool, ToolCompiler,
    ToolMetadata, ToolOrigin, ToolRegistry,
};
use tracing::info;

use crate::agent::Agent;
use crate::approval::Reviewer;
use crate::catalog::ToolCatalog;
use crate::deps::CatalogDependencies;
use crate::governor::{MaterializeReport, ToolGovernor};
use crate::rejection::RejectionLog;
use crate::GovernanceResult;

/// A running governance stack.
///
/// Opening it loads the catalog, replays the audit log, and publishes every
/// catalog tool; agents created from it share that state.
pub struct Governance {
    config: GovernanceConfig,
    grants: Arc<GrantStore>,
    registry: Arc<ToolRegistry>,
    governor: Arc<ToolGovernor>,
    limiter: Option<Arc<RateLimiter>>,
}

impl fmt::Debug for Governance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Governance")
            .field("data_dir", &self.config.storage.data_dir)
            .field("governor", &self.governor)
            .finish_non_exhaustive()
    }
}

impl Governance {
    /// Opens persisted state under `config.storage` and publishes the
    /// catalog. Decisions are requested from `reviewer`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::GovernanceError::Config`] for an invalid
    /// configuration, or a persistence failure if any store cannot be read.
    pub async fn open(
        config: GovernanceConfig,
        reviewer: Arc<dyn Reviewer>,
    ) -> GovernanceResult<Self> {
        config.validate()?;
        let storage = &config.storage;

        let scopes = Arc::new(ScopeRegistry::with_scopes(config.scopes.builtin_scopes()?));
        let catalog = Arc::new(ToolCatalog::open(storage.tools_path()).await?);
        let audit: Arc<dyn Journal<AuditEntry>> =
            Arc::new(FileJournal::open(storage.audit_path()).await?);
        let rejections =
            RejectionLog::open(Arc::new(FileJournal::open(storage.rejections_path()).await?))
                .await?;

        let analyzer: Arc<dyn DependencyAnalyzer> = Arc::new(ScriptAnalyzer);
        let dependencies = Arc::new(CatalogDependencies::new(Arc::clone(&catalog), analyzer));
        let grants = Arc::new(
            GrantStore::open(scopes, audit)
                .await?
                .with_dependencies(dependencies.clone()),
        );

        let registry = Arc::new(ToolRegistry::new());
        let compiler: Arc<dyn ToolCompiler> = Arc::new(ScriptCompiler::new(SandboxLimits {
            max_call_depth: config.sandbox.max_call_depth,
            max_steps: config.sandbox.max_steps,
        }));
        let governor = Arc::new(ToolGovernor::new(
            catalog,
            rejections,
            Arc::clone(&grants),
            Arc::clone(&registry),
            compiler,
            dependencies,
            reviewer,
        ));
        let report = governor.materialize_all(None).await?;

        let limiter = if config.rate_limit.enabled {
            let max_requests = NonZeroUsize::new(config.rate_limit.max_requests).ok_or_else(|| {
                ConfigError::Invalid {
                    reason: "rate_limit.max_requests must be greater than zero".to_owned(),
                }
            })?;
            let limits = RateLimitConfig::new(max_requests, config.rate_limit.window())?;
            Some(Arc::new(RateLimiter::new(limits)))
        } else {
            None
        };

        info!(
            data_dir = %storage.data_dir.display(),
            tools = report.loaded.len(),
            skipped = report.skipped.len(),
            rate_limited = limiter.is_some(),
            "governance opened"
        );

        Ok(Self {
            config,
            grants,
            registry,
            governor,
            limiter,
        })
    }

    /// Returns an agent acting for `identity`.
    #[must_use]
    pub fn agent(&self, identity: Identity) -> Agent {
        let agent = Agent::new(
            identity,
            Arc::clone(&self.grants),
            Arc::clone(&self.registry),
            Arc::clone(&self.governor),
        );
        match &self.limiter {
            Some(limiter) => agent.with_rate_limiter(Arc::clone(limiter)),
            None => agent,
        }
    }

    /// Registers a natively implemented tool. Its `tool.<name>` scope and
    /// every scope it requires become grantable.
    ///
    /// # Errors
    ///
    /// Returns [`crate::GovernanceError::Tool`] if a tool of that name is
    /// already registered.
    pub fn install_builtin<T>(&self, metadata: ToolMetadata, tool: T) -> GovernanceResult<()>
    where
        T: Tool + 'static,
    {
        let metadata = metadata.with_origin(ToolOrigin::Builtin);
        let name = metadata.name().to_owned();
        let mut scopes = vec![metadata.scope().clone()];
        scopes.extend(metadata.required_scopes().iter().cloned());

        self.registry.register_tool(metadata, tool)?;
        for scope in scopes {
            self.scope_registry().register(scope);
        }
        info!(tool = %name, "builtin tool installed");
        Ok(())
    }

    /// Re-reads the catalog and rebuilds every catalog tool, optionally
    /// granting all of them to `grant_to`.
    ///
    /// # Errors
    ///
    /// See [`ToolGovernor::materialize_all`].
    pub async fn reload(&self, grant_to: Option<&Identity>) -> GovernanceResult<MaterializeReport> {
        self.governor.materialize_all(grant_to).await
    }

    /// Configuration the stack was opened with.
    #[must_use]
    pub fn config(&self) -> &GovernanceConfig {
        &self.config
    }

    /// Tool lifecycle operations.
    #[must_use]
    pub fn governor(&self) -> &Arc<ToolGovernor> {
        &self.governor
    }

    /// Grant state shared by every agent.
    #[must_use]
    pub fn grants(&self) -> &Arc<GrantStore> {
        &self.grants
    }

    /// Known scopes.
    #[must_use]
    pub fn scope_registry(&self) -> &Arc<ScopeRegistry> {
        self.grants.scopes()
    }

    /// Live tools.
    #[must_use]
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Withdraws every live tool. Persisted state is unaffected.
    pub fn shutdown(&self) {
        let withdrawn = self.registry.retain(|_| false);
        info!(tools = withdrawn.len(), "governance shut down");
    }
}
