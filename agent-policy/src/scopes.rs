//! Registry of currently known permission scopes.

use std::collections::BTreeSet;
use std::sync::RwLock;

use agent_primitives::ScopeId;
use tracing::debug;

/// Static scopes known to every deployment, independent of registered tools.
pub const BUILTIN_SCOPES: &[&str] = &["filesystem.read", "dialog.read", "dialog.write"];

/// Set of scopes that may currently be granted.
#[derive(Debug, Default)]
pub struct ScopeRegistry {
    inner: RwLock<BTreeSet<ScopeId>>,
}

impl ScopeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry seeded with the supplied scopes.
    #[must_use]
    pub fn with_scopes<I>(scopes: I) -> Self
    where
        I: IntoIterator<Item = ScopeId>,
    {
        Self {
            inner: RwLock::new(scopes.into_iter().collect()),
        }
    }

    /// Creates a registry seeded with [`BUILTIN_SCOPES`].
    #[must_use]
    pub fn builtin() -> Self {
        Self::with_scopes(
            BUILTIN_SCOPES
                .iter()
                .filter_map(|scope| ScopeId::new(*scope).ok()),
        )
    }

    /// Adds a scope, returning `true` if it was not already known.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn register(&self, scope: ScopeId) -> bool {
        let mut inner = self.inner.write().expect("scope registry poisoned");
        let added = inner.insert(scope.clone());
        if added {
            debug!(%scope, "scope registered");
        }
        added
    }

    /// Removes a scope, returning `true` if it was known.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn retire(&self, scope: &ScopeId) -> bool {
        let mut inner = self.inner.write().expect("scope registry poisoned");
        let removed = inner.remove(scope);
        if removed {
            debug!(%scope, "scope retired");
        }
        removed
    }

    /// Returns `true` when the scope may be granted.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn contains(&self, scope: &ScopeId) -> bool {
        self.inner
            .read()
            .expect("scope registry poisoned")
            .contains(scope)
    }

    /// Lists every known scope in sorted order.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn list(&self) -> Vec<ScopeId> {
        self.inner
            .read()
            .expect("scope registry poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// Returns the number of known scopes.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().expect("scope registry poisoned").len()
    }

    /// Returns `true` when no scopes are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_contains_static_scopes() {
        let registry = ScopeRegistry::builtin();
        assert_eq!(registry.len(), BUILTIN_SCOPES.len());
        assert!(registry.contains(&ScopeId::new("filesystem.read").unwrap()));
    }

    #[test]
    fn register_and_retire_are_idempotent() {
        let registry = ScopeRegistry::new();
        let scope = ScopeId::for_tool("echo").unwrap();

        assert!(registry.register(scope.clone()));
        assert!(!registry.register(scope.clone()));
        assert_eq!(registry.list(), vec![scope.clone()]);

        assert!(registry.retire(&scope));
        assert!(!registry.retire(&scope));
        assert!(registry.is_empty());
    }
}
