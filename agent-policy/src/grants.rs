//! Grant store derived from the audit log.
//!
//! Every change is appended to the log before the in-memory view is touched,
//! and a single writer lock serialises mutations so that memory and the
//! durable record never diverge. Granting a `tool.<name>` scope also grants
//! the scopes of the tools it calls, depth-first, as supplied by a
//! [`DependencySource`].

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use agent_journal::Journal;
use agent_primitives::{Identity, ScopeId};
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::audit::{AuditAction, AuditEntry};
use crate::scopes::ScopeRegistry;
use crate::{PolicyError, PolicyResult};

/// Effective grants keyed by identity.
pub type GrantMap = HashMap<Identity, BTreeSet<ScopeId>>;

/// Supplies the direct tool dependencies used for transitive grants.
pub trait DependencySource: Send + Sync {
    /// Returns the names of tools directly called by `tool`.
    fn dependencies(&self, tool: &str) -> BTreeSet<String>;
}

/// Dependency source that reports no dependencies.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDependencies;

impl DependencySource for NoDependencies {
    fn dependencies(&self, _tool: &str) -> BTreeSet<String> {
        BTreeSet::new()
    }
}

/// Folds audit entries into the effective grant map.
///
/// Entries are applied in order; a revoke of a scope that is not held leaves
/// the identity unchanged.
#[must_use]
pub fn replay<'a, I>(entries: I) -> GrantMap
where
    I: IntoIterator<Item = &'a AuditEntry>,
{
    let mut grants = GrantMap::new();
    for entry in entries {
        apply(&mut grants, entry);
    }
    grants
}

fn apply(grants: &mut GrantMap, entry: &AuditEntry) {
    let held = grants.entry(entry.identity.clone()).or_default();
    match entry.action {
        AuditAction::Grant => {
            held.insert(entry.scope.clone());
        }
        AuditAction::Revoke => {
            held.remove(&entry.scope);
        }
    }
}

#[derive(Debug, Default)]
struct GrantState {
    audit: Vec<AuditEntry>,
    grants: GrantMap,
}

impl GrantState {
    fn holds(&self, identity: &Identity, scope: &ScopeId) -> bool {
        self.grants
            .get(identity)
            .is_some_and(|held| held.contains(scope))
    }

    fn record(&mut self, entry: AuditEntry) {
        apply(&mut self.grants, &entry);
        self.audit.push(entry);
    }
}

/// Durable, audit-log-backed record of which identity holds which scope.
pub struct GrantStore {
    scopes: Arc<ScopeRegistry>,
    log: Arc<dyn Journal<AuditEntry>>,
    dependencies: Arc<dyn DependencySource>,
    state: RwLock<GrantState>,
    writer: Mutex<()>,
}

impl fmt::Debug for GrantStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read();
        f.debug_struct("GrantStore")
            .field("entries", &state.audit.len())
            .field("identities", &state.grants.len())
            .finish_non_exhaustive()
    }
}

impl GrantStore {
    /// Opens the store by replaying every entry in the audit log.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Journal`] if the log cannot be read.
    pub async fn open(
        scopes: Arc<ScopeRegistry>,
        log: Arc<dyn Journal<AuditEntry>>,
    ) -> PolicyResult<Self> {
        let audit = log.read_all().await?;
        let grants = replay(&audit);
        info!(
            entries = audit.len(),
            identities = grants.len(),
            "audit log replayed"
        );

        Ok(Self {
            scopes,
            log,
            dependencies: Arc::new(NoDependencies),
            state: RwLock::new(GrantState { audit, grants }),
            writer: Mutex::new(()),
        })
    }

    /// Sets the dependency source consulted for transitive tool grants.
    #[must_use]
    pub fn with_dependencies(mut self, dependencies: Arc<dyn DependencySource>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Returns the scope registry backing this store.
    #[must_use]
    pub fn scopes(&self) -> &Arc<ScopeRegistry> {
        &self.scopes
    }

    /// Grants a scope to an identity, plus the scopes of every tool it
    /// transitively depends on that the identity does not already hold.
    ///
    /// Re-granting a held scope is recorded again and still completes any
    /// missing dependency scopes. Returns the scopes recorded, root first.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::UnknownScope`] when the scope is not registered
    /// and [`PolicyError::Journal`] when the entries could not be made
    /// durable; nothing is granted in that case.
    pub async fn grant(&self, identity: &Identity, scope: &ScopeId) -> PolicyResult<Vec<ScopeId>> {
        if !self.scopes.contains(scope) {
            warn!(%identity, %scope, "grant refused for unknown scope");
            return Err(PolicyError::UnknownScope {
                scope: scope.clone(),
            });
        }

        let _writer = self.writer.lock().await;
        let plan = {
            let state = self.read();
            self.plan(&state, identity, scope)
        };

        let entries = self.entries(plan.iter().map(|next| (identity, next)), AuditAction::Grant);
        self.commit(entries).await?;

        info!(%identity, %scope, transitive = plan.len() - 1, "scope granted");
        Ok(plan)
    }

    /// Revokes a scope from an identity.
    ///
    /// Revocation never cascades to dependency scopes and is recorded even
    /// when the scope is not held or no longer registered.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Journal`] when the entry could not be made
    /// durable; the in-memory view is then unchanged.
    pub async fn revoke(&self, identity: &Identity, scope: &ScopeId) -> PolicyResult<()> {
        let _writer = self.writer.lock().await;
        let entries = self.entries([(identity, scope)], AuditAction::Revoke);
        self.commit(entries).await?;
        info!(%identity, %scope, "scope revoked");
        Ok(())
    }

    /// Revokes a scope from every identity currently holding it, returning
    /// the affected identities in sorted order.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Journal`] when the revoke entries could not be
    /// made durable; every holder keeps the scope in that case.
    pub async fn retire_scope(&self, scope: &ScopeId) -> PolicyResult<Vec<Identity>> {
        let _writer = self.writer.lock().await;
        let mut holders: Vec<Identity> = {
            let state = self.read();
            state
                .grants
                .iter()
                .filter(|(_, held)| held.contains(scope))
                .map(|(identity, _)| identity.clone())
                .collect()
        };
        holders.sort();

        let entries = self.entries(
            holders.iter().map(|identity| (identity, scope)),
            AuditAction::Revoke,
        );
        self.commit(entries).await?;
        if !holders.is_empty() {
            info!(%scope, holders = holders.len(), "scope revoked from all holders");
        }
        Ok(holders)
    }

    /// Returns `true` when the identity currently holds the scope.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn has(&self, identity: &Identity, scope: &ScopeId) -> bool {
        self.read().holds(identity, scope)
    }

    /// Returns every scope the identity currently holds.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn scopes_of(&self, identity: &Identity) -> BTreeSet<ScopeId> {
        self.read()
            .grants
            .get(identity)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the audit history, optionally restricted to one identity.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn history(&self, identity: Option<&Identity>) -> Vec<AuditEntry> {
        let state = self.read();
        state
            .audit
            .iter()
            .filter(|entry| identity.is_none_or(|id| &entry.identity == id))
            .cloned()
            .collect()
    }

    /// Returns a snapshot of the effective grant map.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn snapshot(&self) -> GrantMap {
        self.read().grants.clone()
    }

    fn plan(&self, state: &GrantState, identity: &Identity, root: &ScopeId) -> Vec<ScopeId> {
        let mut plan = vec![root.clone()];
        let mut planned = BTreeSet::from([root.clone()]);
        self.plan_dependencies(state, identity, root, &mut plan, &mut planned);
        plan
    }

    fn plan_dependencies(
        &self,
        state: &GrantState,
        identity: &Identity,
        scope: &ScopeId,
        plan: &mut Vec<ScopeId>,
        planned: &mut BTreeSet<ScopeId>,
    ) {
        let Some(tool) = scope.tool_name() else {
            return;
        };

        for dependency in self.dependencies.dependencies(tool) {
            let Ok(next) = ScopeId::for_tool(&dependency) else {
                continue;
            };
            if planned.contains(&next)
                || !self.scopes.contains(&next)
                || state.holds(identity, &next)
            {
                continue;
            }
            debug!(%identity, from = %scope, scope = %next, "planning transitive grant");
            planned.insert(next.clone());
            plan.push(next.clone());
            self.plan_dependencies(state, identity, &next, plan, planned);
        }
    }

    /// Builds audit entries sharing one timestamp, never earlier than the
    /// last recorded entry.
    fn entries<'a, I>(&self, pairs: I, action: AuditAction) -> Vec<AuditEntry>
    where
        I: IntoIterator<Item = (&'a Identity, &'a ScopeId)>,
    {
        let now = Utc::now();
        let timestamp = self
            .read()
            .audit
            .last()
            .map_or(now, |last| last.timestamp.max(now));
        pairs
            .into_iter()
            .map(|(identity, scope)| AuditEntry {
                action,
                identity: identity.clone(),
                scope: scope.clone(),
                timestamp,
            })
            .collect()
    }

    async fn commit(&self, entries: Vec<AuditEntry>) -> PolicyResult<()> {
        self.log.append_all(&entries).await?;
        let mut state = self.write();
        for entry in entries {
            state.record(entry);
        }
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, GrantState> {
        self.state.read().expect("grant state poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, GrantState> {
        self.state.write().expect("grant state poisoned")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};

    use agent_journal::{FileJournal, JournalError, JournalResult};
    use async_trait::async_trait;
    use uuid::Uuid;

    use super::*;

    fn temp_log() -> PathBuf {
        std::env::temp_dir().join(format!("toolgate-audit-{}.jsonl", Uuid::new_v4()))
    }

    fn id(value: &str) -> Identity {
        Identity::new(value).unwrap()
    }

    fn scope(value: &str) -> ScopeId {
        ScopeId::new(value).unwrap()
    }

    fn registry(extra: &[&str]) -> Arc<ScopeRegistry> {
        let registry = ScopeRegistry::builtin();
        for name in extra {
            registry.register(scope(name));
        }
        Arc::new(registry)
    }

    struct StaticDependencies(BTreeMap<String, BTreeSet<String>>);

    impl StaticDependencies {
        fn new(edges: &[(&str, &[&str])]) -> Self {
            Self(
                edges
                    .iter()
                    .map(|(tool, deps)| {
                        (
                            (*tool).to_owned(),
                            deps.iter().map(|dep| (*dep).to_owned()).collect(),
                        )
                    })
                    .collect(),
            )
        }
    }

    impl DependencySource for StaticDependencies {
        fn dependencies(&self, tool: &str) -> BTreeSet<String> {
            self.0.get(tool).cloned().unwrap_or_default()
        }
    }

    struct FlakyJournal {
        inner: FileJournal<AuditEntry>,
        failing: AtomicBool,
    }

    #[async_trait]
    impl Journal<AuditEntry> for FlakyJournal {
        async fn append_all(&self, records: &[AuditEntry]) -> JournalResult<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(JournalError::unavailable("disk detached"));
            }
            self.inner.append_all(records).await
        }

        async fn read_all(&self) -> JournalResult<Vec<AuditEntry>> {
            self.inner.read_all().await
        }
    }

    async fn open_store(path: &PathBuf, scopes: Arc<ScopeRegistry>) -> GrantStore {
        let log = FileJournal::open(path).await.unwrap();
        GrantStore::open(scopes, Arc::new(log)).await.unwrap()
    }

    #[tokio::test]
    async fn unknown_scope_fails_closed() {
        let path = temp_log();
        let store = open_store(&path, registry(&[])).await;

        let err = store
            .grant(&id("alice"), &scope("net.admin"))
            .await
            .unwrap_err();
        assert!(matches!(err, PolicyError::UnknownScope { .. }));
        assert!(!store.has(&id("alice"), &scope("net.admin")));
        assert!(store.history(None).is_empty());

        let _ = tokio::fs::remove_file(path).await;
    }

    #[tokio::test]
    async fn regrant_is_idempotent_but_recorded() {
        let path = temp_log();
        let store = open_store(&path, registry(&[])).await;
        let alice = id("alice");

        store.grant(&alice, &scope("dialog.read")).await.unwrap();
        store.grant(&alice, &scope("dialog.read")).await.unwrap();

        assert!(store.has(&alice, &scope("dialog.read")));
        assert_eq!(store.scopes_of(&alice).len(), 1);
        assert_eq!(store.history(Some(&alice)).len(), 2);

        let _ = tokio::fs::remove_file(path).await;
    }

    #[tokio::test]
    async fn reopened_store_replays_grants_and_revokes() {
        let path = temp_log();
        let scopes = registry(&[]);
        {
            let store = open_store(&path, Arc::clone(&scopes)).await;
            store.grant(&id("alice"), &scope("dialog.read")).await.unwrap();
            store.grant(&id("alice"), &scope("dialog.write")).await.unwrap();
            store.revoke(&id("alice"), &scope("dialog.read")).await.unwrap();
        }

        let store = open_store(&path, scopes).await;
        assert!(!store.has(&id("alice"), &scope("dialog.read")));
        assert!(store.has(&id("alice"), &scope("dialog.write")));
        assert_eq!(store.snapshot(), replay(&store.history(None)));

        let history = store.history(None);
        assert_eq!(history.len(), 3);
        assert!(history.windows(2).all(|pair| pair[0].timestamp <= pair[1].timestamp));

        let _ = tokio::fs::remove_file(path).await;
    }

    #[tokio::test]
    async fn tool_grant_follows_dependencies_through_cycles() {
        let path = temp_log();
        let scopes = registry(&["tool.a", "tool.b", "tool.c"]);
        let deps = StaticDependencies::new(&[
            ("a", &["b", "ghost"]),
            ("b", &["c"]),
            ("c", &["a"]),
        ]);
        let store = open_store(&path, scopes)
            .await
            .with_dependencies(Arc::new(deps));
        let bob = id("bob");

        let granted = store.grant(&bob, &scope("tool.a")).await.unwrap();
        assert_eq!(
            granted,
            vec![scope("tool.a"), scope("tool.b"), scope("tool.c")]
        );
        assert!(!store.has(&bob, &scope("tool.ghost")));

        let again = store.grant(&bob, &scope("tool.a")).await.unwrap();
        assert_eq!(again, vec![scope("tool.a")]);

        let _ = tokio::fs::remove_file(path).await;
    }

    #[tokio::test]
    async fn regrant_completes_missing_dependencies() {
        let path = temp_log();
        let scopes = registry(&["tool.a", "tool.b"]);
        let deps = StaticDependencies::new(&[("a", &["b"])]);
        let store = open_store(&path, scopes)
            .await
            .with_dependencies(Arc::new(deps));
        let bob = id("bob");

        store.grant(&bob, &scope("tool.a")).await.unwrap();
        store.revoke(&bob, &scope("tool.b")).await.unwrap();
        assert!(store.has(&bob, &scope("tool.a")));
        assert!(!store.has(&bob, &scope("tool.b")));

        let granted = store.grant(&bob, &scope("tool.a")).await.unwrap();
        assert_eq!(granted, vec![scope("tool.a"), scope("tool.b")]);

        let _ = tokio::fs::remove_file(path).await;
    }

    #[tokio::test]
    async fn revoke_does_not_cascade() {
        let path = temp_log();
        let scopes = registry(&["tool.a", "tool.b"]);
        let deps = StaticDependencies::new(&[("a", &["b"])]);
        let store = open_store(&path, scopes)
            .await
            .with_dependencies(Arc::new(deps));
        let bob = id("bob");

        store.grant(&bob, &scope("tool.a")).await.unwrap();
        store.revoke(&bob, &scope("tool.a")).await.unwrap();

        assert!(!store.has(&bob, &scope("tool.a")));
        assert!(store.has(&bob, &scope("tool.b")));

        let _ = tokio::fs::remove_file(path).await;
    }

    #[tokio::test]
    async fn failed_append_leaves_state_untouched() {
        let path = temp_log();
        let journal = Arc::new(FlakyJournal {
            inner: FileJournal::open(&path).await.unwrap(),
            failing: AtomicBool::new(false),
        });
        let store = GrantStore::open(registry(&[]), journal.clone())
            .await
            .unwrap();
        let alice = id("alice");

        store.grant(&alice, &scope("dialog.read")).await.unwrap();
        journal.failing.store(true, Ordering::SeqCst);

        let err = store
            .grant(&alice, &scope("dialog.write"))
            .await
            .unwrap_err();
        assert!(matches!(err, PolicyError::Journal(_)));
        assert!(!store.has(&alice, &scope("dialog.write")));

        let err = store
            .revoke(&alice, &scope("dialog.read"))
            .await
            .unwrap_err();
        assert!(matches!(err, PolicyError::Journal(_)));
        assert!(store.has(&alice, &scope("dialog.read")));
        assert_eq!(store.history(None).len(), 1);

        let _ = tokio::fs::remove_file(path).await;
    }

    #[tokio::test]
    async fn failed_transitive_grant_grants_nothing() {
        let path = temp_log();
        let journal = Arc::new(FlakyJournal {
            inner: FileJournal::open(&path).await.unwrap(),
            failing: AtomicBool::new(true),
        });
        let deps = StaticDependencies::new(&[("a", &["b"])]);
        let store = GrantStore::open(registry(&["tool.a", "tool.b"]), journal.clone())
            .await
            .unwrap()
            .with_dependencies(Arc::new(deps));
        let bob = id("bob");

        let err = store.grant(&bob, &scope("tool.a")).await.unwrap_err();
        assert!(matches!(err, PolicyError::Journal(_)));
        assert!(!store.has(&bob, &scope("tool.a")));
        assert!(!store.has(&bob, &scope("tool.b")));
        assert!(store.history(None).is_empty());
        assert!(journal.read_all().await.unwrap().is_empty());

        journal.failing.store(false, Ordering::SeqCst);
        let granted = store.grant(&bob, &scope("tool.a")).await.unwrap();
        assert_eq!(granted, vec![scope("tool.a"), scope("tool.b")]);
        assert_eq!(journal.read_all().await.unwrap().len(), 2);

        let _ = tokio::fs::remove_file(path).await;
    }

    #[tokio::test]
    async fn retire_scope_revokes_every_holder() {
        let path = temp_log();
        let store = open_store(&path, registry(&["tool.echo"])).await;

        store.grant(&id("carol"), &scope("tool.echo")).await.unwrap();
        store.grant(&id("alice"), &scope("tool.echo")).await.unwrap();
        store.grant(&id("alice"), &scope("dialog.read")).await.unwrap();

        let holders = store.retire_scope(&scope("tool.echo")).await.unwrap();
        assert_eq!(holders, vec![id("alice"), id("carol")]);
        assert!(!store.has(&id("alice"), &scope("tool.echo")));
        assert!(store.has(&id("alice"), &scope("dialog.read")));
        assert_eq!(store.history(Some(&id("carol"))).len(), 2);

        let _ = tokio::fs::remove_file(path).await;
    }
}
