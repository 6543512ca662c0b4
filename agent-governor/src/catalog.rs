//! Durable catalog of approved tool sources and their version history.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{RwLock, RwLockReadGuard};

use agent_journal::{JournalResult, JsonDocument};
use agent_primitives::Identity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{GovernanceError, GovernanceResult};

/// Superseded source of a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolVersion {
    /// Source text.
    pub code: String,
    /// Description at the time.
    pub description: String,
    /// When this source was superseded.
    pub timestamp: DateTime<Utc>,
}

/// Catalog entry for one approved tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolRecord {
    /// Current source text.
    pub code: String,
    /// Current description.
    #[serde(default)]
    pub description: String,
    /// Identity that first proposed the tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<Identity>,
    /// When the tool was first approved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Earlier sources, oldest first.
    #[serde(default)]
    pub versions: Vec<ToolVersion>,
}

impl ToolRecord {
    /// Version number of the current source; the first approval is `1`.
    #[must_use]
    pub fn current_version(&self) -> usize {
        self.versions.len() + 1
    }

    fn supersede(&mut self, code: String, description: String, at: DateTime<Utc>) {
        let previous = ToolVersion {
            code: std::mem::replace(&mut self.code, code),
            description: std::mem::replace(&mut self.description, description),
            timestamp: at,
        };
        self.versions.push(previous);
    }
}

/// Every catalog entry keyed by tool name.
pub type CatalogEntries = BTreeMap<String, ToolRecord>;

/// Outcome of restoring an earlier version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Restored {
    /// Version number that was restored.
    pub restored: usize,
    /// Entry after the rollback.
    pub record: ToolRecord,
}

/// Tool catalog persisted as a single JSON document.
///
/// Every mutation writes the full document before the in-memory copy changes,
/// so a failed write leaves both untouched.
pub struct ToolCatalog {
    document: JsonDocument<CatalogEntries>,
    entries: RwLock<CatalogEntries>,
    writer: Mutex<()>,
}

impl fmt::Debug for ToolCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolCatalog")
            .field("path", &self.document.path())
            .field("tools", &self.read().len())
            .finish_non_exhaustive()
    }
}

impl ToolCatalog {
    /// Loads the catalog at `path`; a missing file is an empty catalog.
    ///
    /// # Errors
    ///
    /// Returns [`GovernanceError::Persistence`] if the file exists but cannot
    /// be read or parsed.
    pub async fn open(path: impl Into<PathBuf>) -> GovernanceResult<Self> {
        let document = JsonDocument::new(path);
        let entries: CatalogEntries = document.load().await?;
        info!(path = %document.path().display(), tools = entries.len(), "tool catalog loaded");

        Ok(Self {
            document,
            entries: RwLock::new(entries),
            writer: Mutex::new(()),
        })
    }

    /// Re-reads the document from disk, replacing the in-memory copy.
    ///
    /// # Errors
    ///
    /// Returns [`GovernanceError::Persistence`] on read or parse failure; the
    /// in-memory copy is kept in that case.
    pub async fn reload(&self) -> GovernanceResult<usize> {
        let _writer = self.writer.lock().await;
        let entries = self.document.load().await?;
        let count = entries.len();
        *self.entries.write().expect("tool catalog poisoned") = entries;
        debug!(tools = count, "tool catalog reloaded");
        Ok(count)
    }

    /// Returns a copy of the entry for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<ToolRecord> {
        self.read().get(name).cloned()
    }

    /// Returns whether an entry exists for `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Returns catalog tool names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// Returns a copy of every entry.
    #[must_use]
    pub fn snapshot(&self) -> CatalogEntries {
        self.read().clone()
    }

    /// Runs `f` against the current entries without copying them.
    pub fn with_entries<R>(&self, f: impl FnOnce(&CatalogEntries) -> R) -> R {
        f(&self.read())
    }

    /// Installs `code` as the current source of `name`, moving any existing
    /// source into the version history. Returns the new version number.
    ///
    /// Creation metadata is recorded on first install and kept on overwrite.
    ///
    /// # Errors
    ///
    /// Returns [`GovernanceError::Persistence`] if the catalog cannot be
    /// written.
    pub async fn install(
        &self,
        name: &str,
        code: &str,
        description: &str,
        proposer: Option<&Identity>,
    ) -> GovernanceResult<usize> {
        let _writer = self.writer.lock().await;
        let now = Utc::now();
        let mut next = self.snapshot();

        let version = match next.get_mut(name) {
            Some(record) => {
                record.supersede(code.to_owned(), description.to_owned(), now);
                record.current_version()
            }
            None => {
                next.insert(
                    name.to_owned(),
                    ToolRecord {
                        code: code.to_owned(),
                        description: description.to_owned(),
                        created_by: proposer.cloned(),
                        created_at: Some(now),
                        versions: Vec::new(),
                    },
                );
                1
            }
        };

        self.commit(next).await?;
        debug!(tool = name, version, "catalog entry installed");
        Ok(version)
    }

    /// Restores version `version` of `name` (the most recent earlier version
    /// when `None`). The source being replaced is appended to the history, so
    /// rollback never discards anything.
    ///
    /// `validate` sees the version about to be restored and can veto the
    /// rollback before anything is written.
    ///
    /// # Errors
    ///
    /// Returns [`GovernanceError::NotFound`] for an unknown tool or version,
    /// [`GovernanceError::NoHistory`] when there is nothing to restore,
    /// whatever `validate` returns, or a persistence failure.
    pub async fn rollback<F>(
        &self,
        name: &str,
        version: Option<usize>,
        validate: F,
    ) -> GovernanceResult<Restored>
    where
        F: FnOnce(&ToolVersion) -> GovernanceResult<()>,
    {
        let _writer = self.writer.lock().await;
        let mut next = self.snapshot();
        let record = next
            .get_mut(name)
            .ok_or_else(|| GovernanceError::tool_not_found(name))?;
        if record.versions.is_empty() {
            return Err(GovernanceError::NoHistory {
                name: name.to_owned(),
            });
        }

        let target = version.unwrap_or(record.versions.len());
        let restored = target
            .checked_sub(1)
            .and_then(|index| record.versions.get(index))
            .cloned()
            .ok_or_else(|| GovernanceError::NotFound {
                subject: format!("version {target} of tool `{name}`"),
            })?;
        validate(&restored)?;

        record.supersede(restored.code, restored.description, Utc::now());
        let record = record.clone();
        self.commit(next).await?;
        debug!(tool = name, restored = target, current = record.current_version(), "catalog entry rolled back");

        Ok(Restored {
            restored: target,
            record,
        })
    }

    /// Deletes the entry for `name`, returning it.
    ///
    /// # Errors
    ///
    /// Returns [`GovernanceError::NotFound`] if absent, or a persistence
    /// failure.
    pub async fn remove(&self, name: &str) -> GovernanceResult<ToolRecord> {
        let _writer = self.writer.lock().await;
        let mut next = self.snapshot();
        let record = next
            .remove(name)
            .ok_or_else(|| GovernanceError::tool_not_found(name))?;

        self.commit(next).await?;
        debug!(tool = name, "catalog entry removed");
        Ok(record)
    }

    /// Puts back `previous` as the entry for `name`, or deletes the entry
    /// when there was none. Used to undo an install whose follow-up failed.
    ///
    /// # Errors
    ///
    /// Returns a persistence failure.
    pub async fn restore(&self, name: &str, previous: Option<ToolRecord>) -> GovernanceResult<()> {
        let _writer = self.writer.lock().await;
        let mut next = self.snapshot();
        match previous {
            Some(record) => next.insert(name.to_owned(), record),
            None => next.remove(name),
        };
        self.commit(next).await?;
        debug!(tool = name, "catalog entry restored");
        Ok(())
    }

    async fn commit(&self, next: CatalogEntries) -> JournalResult<()> {
        self.document.store(&next).await?;
        *self.entries.write().expect("tool catalog poisoned") = next;
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, CatalogEntries> {
        self.entries.read().expect("tool catalog poisoned")
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn catalog_path() -> PathBuf {
        std::env::temp_dir().join(format!("toolgate-catalog-{}.json", Uuid::new_v4()))
    }

    #[tokio::test]
    async fn overwrite_keeps_history_and_creation_metadata() {
        let path = catalog_path();
        let alice = Identity::new("alice").unwrap();
        let bob = Identity::new("bob").unwrap();
        let catalog = ToolCatalog::open(&path).await.unwrap();

        assert_eq!(catalog.install("greet", "v1", "first", Some(&alice)).await.unwrap(), 1);
        assert_eq!(catalog.install("greet", "v2", "second", Some(&bob)).await.unwrap(), 2);

        let record = catalog.get("greet").unwrap();
        assert_eq!(record.code, "v2");
        assert_eq!(record.created_by, Some(alice));
        assert_eq!(record.versions.len(), 1);
        assert_eq!(record.versions[0].code, "v1");
        assert_eq!(record.versions[0].description, "first");

        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(raw.contains("\"createdBy\": \"alice\""));
        assert!(raw.contains("\"createdAt\""));

        let reopened = ToolCatalog::open(&path).await.unwrap();
        assert_eq!(reopened.get("greet"), Some(record));
        let _ = tokio::fs::remove_file(path).await;
    }

    #[tokio::test]
    async fn rollback_appends_instead_of_truncating() {
        let path = catalog_path();
        let catalog = ToolCatalog::open(&path).await.unwrap();
        for code in ["v1", "v2", "v3"] {
            catalog.install("t", code, code, None).await.unwrap();
        }

        let restored = catalog.rollback("t", Some(1), |_| Ok(())).await.unwrap();
        assert_eq!(restored.restored, 1);
        assert_eq!(restored.record.code, "v1");
        assert_eq!(restored.record.current_version(), 4);

        let latest = catalog.rollback("t", None, |_| Ok(())).await.unwrap();
        assert_eq!(latest.restored, 3);
        assert_eq!(latest.record.code, "v3");
        let _ = tokio::fs::remove_file(path).await;
    }

    #[tokio::test]
    async fn rollback_errors_leave_catalog_unchanged() {
        let path = catalog_path();
        let catalog = ToolCatalog::open(&path).await.unwrap();
        catalog.install("t", "v1", "", None).await.unwrap();

        assert!(matches!(
            catalog.rollback("missing", None, |_| Ok(())).await,
            Err(GovernanceError::NotFound { .. })
        ));
        assert!(matches!(
            catalog.rollback("t", None, |_| Ok(())).await,
            Err(GovernanceError::NoHistory { .. })
        ));

        catalog.install("t", "v2", "", None).await.unwrap();
        for bad in [0, 2, 9] {
            assert!(matches!(
                catalog.rollback("t", Some(bad), |_| Ok(())).await,
                Err(GovernanceError::NotFound { .. })
            ));
        }
        let vetoed = catalog
            .rollback("t", Some(1), |_| {
                Err(GovernanceError::NoHistory { name: "t".into() })
            })
            .await;
        assert!(vetoed.is_err());
        assert_eq!(catalog.get("t").unwrap().code, "v2");
        assert_eq!(catalog.get("t").unwrap().current_version(), 2);
        let _ = tokio::fs::remove_file(path).await;
    }

    #[tokio::test]
    async fn remove_and_reload() {
        let path = catalog_path();
        let catalog = ToolCatalog::open(&path).await.unwrap();
        catalog.install("a", "fn a() {}", "", None).await.unwrap();
        catalog.install("b", "fn b() {}", "", None).await.unwrap();

        catalog.remove("a").await.unwrap();
        assert!(matches!(
            catalog.remove("a").await,
            Err(GovernanceError::NotFound { .. })
        ));
        assert_eq!(catalog.names(), vec!["b".to_owned()]);

        tokio::fs::write(&path, "{}").await.unwrap();
        assert_eq!(catalog.reload().await.unwrap(), 0);
        assert!(!catalog.contains("b"));
        let _ = tokio::fs::remove_file(path).await;
    }
}
