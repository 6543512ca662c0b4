//! Call graph between catalog tools.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use agent_policy::DependencySource;
use agent_tools::{DependencyAnalyzer, dependency_map};
use tracing::warn;

use crate::catalog::ToolCatalog;

/// Derives tool dependencies from current catalog sources on every query.
pub struct CatalogDependencies {
    catalog: Arc<ToolCatalog>,
    analyzer: Arc<dyn DependencyAnalyzer>,
}

impl fmt::Debug for CatalogDependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogDependencies")
            .field("catalog", &self.catalog)
            .finish_non_exhaustive()
    }
}

impl CatalogDependencies {
    /// Creates a source reading `catalog` through `analyzer`.
    #[must_use]
    pub fn new(catalog: Arc<ToolCatalog>, analyzer: Arc<dyn DependencyAnalyzer>) -> Self {
        Self { catalog, analyzer }
    }

    /// Full dependency map. Tools without dependencies are omitted.
    #[must_use]
    pub fn map(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.catalog.with_entries(|entries| {
            dependency_map(
                self.analyzer.as_ref(),
                entries
                    .iter()
                    .map(|(name, record)| (name.as_str(), record.code.as_str())),
            )
        })
    }

    /// Catalog tools whose source calls `name`, sorted.
    #[must_use]
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.map()
            .into_iter()
            .filter(|(_, deps)| deps.contains(name))
            .map(|(tool, _)| tool)
            .collect()
    }
}

impl DependencySource for CatalogDependencies {
    fn dependencies(&self, tool: &str) -> BTreeSet<String> {
        self.catalog.with_entries(|entries| {
            let Some(record) = entries.get(tool) else {
                return BTreeSet::new();
            };
            match self.analyzer.direct_calls(&record.code) {
                Ok(calls) => calls
                    .into_iter()
                    .filter(|call| call != tool && entries.contains_key(call))
                    .collect(),
                Err(err) => {
                    warn!(tool, %err, "catalog source no longer parses, ignoring its dependencies");
                    BTreeSet::new()
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use agent_tools::ScriptAnalyzer;
    use uuid::Uuid;

    use super::*;

    #[tokio::test]
    async fn dependencies_track_catalog_contents() {
        let path = std::env::temp_dir().join(format!("toolgate-deps-{}.json", Uuid::new_v4()));
        let catalog = Arc::new(ToolCatalog::open(&path).await.unwrap());
        let deps = CatalogDependencies::new(Arc::clone(&catalog), Arc::new(ScriptAnalyzer));

        catalog
            .install("quad", "fn quad(x: i64) -> i64 { double(double(x)) }", "", None)
            .await
            .unwrap();
        assert!(deps.dependencies("quad").is_empty());

        catalog
            .install("double", "fn double(x: i64) -> i64 { x * 2 }", "", None)
            .await
            .unwrap();
        assert_eq!(deps.dependencies("quad"), BTreeSet::from(["double".to_owned()]));
        assert_eq!(deps.dependents_of("double"), vec!["quad".to_owned()]);
        assert!(deps.dependents_of("quad").is_empty());
        assert!(deps.dependencies("missing").is_empty());
        let _ = tokio::fs::remove_file(path).await;
    }
}
