//! Append-only record of declined tool proposals.

use std::fmt;
use std::sync::{Arc, RwLock};

use agent_journal::{Journal, JournalResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

/// A proposal a reviewer declined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    /// Proposed tool name.
    pub name: String,
    /// Proposed description.
    pub description: String,
    /// Proposed source.
    pub code: String,
    /// Reviewer-supplied reason, if any.
    #[serde(default)]
    pub reason: Option<String>,
    /// When the proposal was declined.
    pub timestamp: DateTime<Utc>,
}

/// Journal-backed rejection log with an in-memory copy for queries.
pub struct RejectionLog {
    journal: Arc<dyn Journal<Rejection>>,
    entries: RwLock<Vec<Rejection>>,
    writer: Mutex<()>,
}

impl fmt::Debug for RejectionLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RejectionLog")
            .field("entries", &self.entries.read().expect("rejection log poisoned").len())
            .finish_non_exhaustive()
    }
}

impl RejectionLog {
    /// Loads every recorded rejection from `journal`.
    ///
    /// # Errors
    ///
    /// Returns journal read failures.
    pub async fn open(journal: Arc<dyn Journal<Rejection>>) -> JournalResult<Self> {
        let entries = journal.read_all().await?;
        debug!(entries = entries.len(), "rejection log loaded");
        Ok(Self {
            journal,
            entries: RwLock::new(entries),
            writer: Mutex::new(()),
        })
    }

    /// Appends `rejection`.
    ///
    /// # Errors
    ///
    /// Returns journal write failures; nothing is recorded in that case.
    pub async fn record(&self, rejection: Rejection) -> JournalResult<()> {
        let _writer = self.writer.lock().await;
        self.journal.append(&rejection).await?;
        self.entries
            .write()
            .expect("rejection log poisoned")
            .push(rejection);
        Ok(())
    }

    /// Returns rejections in recording order, optionally only those for
    /// `name`.
    #[must_use]
    pub fn past(&self, name: Option<&str>) -> Vec<Rejection> {
        self.entries
            .read()
            .expect("rejection log poisoned")
            .iter()
            .filter(|rejection| name.is_none_or(|name| rejection.name == name))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use agent_journal::FileJournal;
    use uuid::Uuid;

    use super::*;

    fn rejection(name: &str, reason: Option<&str>) -> Rejection {
        Rejection {
            name: name.to_owned(),
            description: String::new(),
            code: format!("fn {name}() {{}}"),
            reason: reason.map(str::to_owned),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn rejections_survive_reopen_and_filter_by_name() {
        let path = std::env::temp_dir().join(format!("toolgate-rejections-{}.jsonl", Uuid::new_v4()));
        let log = RejectionLog::open(Arc::new(FileJournal::open(&path).await.unwrap()))
            .await
            .unwrap();
        log.record(rejection("a", Some("unsafe"))).await.unwrap();
        log.record(rejection("b", None)).await.unwrap();
        log.record(rejection("a", None)).await.unwrap();

        let reopened = RejectionLog::open(Arc::new(FileJournal::open(&path).await.unwrap()))
            .await
            .unwrap();
        assert_eq!(reopened.past(None).len(), 3);
        let for_a = reopened.past(Some("a"));
        assert_eq!(for_a.len(), 2);
        assert_eq!(for_a[0].reason.as_deref(), Some("unsafe"));
        assert!(reopened.past(Some("zzz")).is_empty());
        let _ = tokio::fs::remove_file(path).await;
    }
}
