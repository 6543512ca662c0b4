//! Append-only journals of newline-delimited JSON records.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{JournalError, JournalResult};

/// Trait implemented by durable append-only journals.
///
/// `append` must not return `Ok` before the record is durable: callers update
/// their in-memory view only after a successful append.
#[async_trait]
pub trait Journal<T>: Send + Sync
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Appends a record to the journal.
    async fn append(&self, record: &T) -> JournalResult<()> {
        self.append_all(std::slice::from_ref(record)).await
    }

    /// Appends `records` as one unit: either all of them become durable or
    /// none do.
    async fn append_all(&self, records: &[T]) -> JournalResult<()>;

    /// Returns every record, ordered oldest to newest.
    async fn read_all(&self) -> JournalResult<Vec<T>>;
}

/// File-backed journal writing newline-delimited JSON entries.
pub struct FileJournal<T> {
    path: PathBuf,
    file: Mutex<Tail>,
    _record: PhantomData<fn() -> T>,
}

/// Open handle plus the length of the acknowledged prefix.
struct Tail {
    file: tokio::fs::File,
    committed: u64,
}

impl<T> std::fmt::Debug for FileJournal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileJournal")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl<T> FileJournal<T> {
    /// Opens (or creates) a journal file at the provided path.
    ///
    /// A trailing record cut short by a crash mid-append is truncated away so
    /// that later appends start on a fresh line.
    ///
    /// # Errors
    ///
    /// Propagates I/O errors encountered while preparing the file.
    pub async fn open(path: impl Into<PathBuf>) -> JournalResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)
            .await?;

        repair_tail(&path, &file).await?;
        let committed = file.metadata().await?.len();

        Ok(Self {
            path,
            file: Mutex::new(Tail { file, committed }),
            _record: PhantomData,
        })
    }

    /// Returns the underlying path of the journal file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn repair_tail(path: &Path, file: &tokio::fs::File) -> JournalResult<()> {
    let data = fs::read(path).await?;
    if data.is_empty() || data.ends_with(b"\n") {
        return Ok(());
    }

    let keep = data
        .iter()
        .rposition(|byte| *byte == b'\n')
        .map_or(0, |idx| idx + 1);
    let fragment = &data[keep..];

    if serde_json::from_slice::<serde_json::Value>(fragment).is_ok() {
        // Complete record that only lacks its terminator.
        let mut handle = file.try_clone().await?;
        handle.write_all(b"\n").await?;
        handle.sync_data().await?;
        return Ok(());
    }

    warn!(
        path = %path.display(),
        dropped_bytes = fragment.len(),
        "truncating torn journal record"
    );
    file.set_len(keep as u64).await?;
    file.sync_data().await?;
    Ok(())
}

async fn write_durably(file: &mut tokio::fs::File, bytes: &[u8]) -> std::io::Result<()> {
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_data().await
}

impl Tail {
    /// Truncates bytes past the acknowledged prefix, left behind by an
    /// append that failed midway.
    async fn discard_unacknowledged(&mut self, path: &Path) -> std::io::Result<()> {
        let len = self.file.metadata().await?.len();
        if len > self.committed {
            warn!(
                path = %path.display(),
                dropped_bytes = len - self.committed,
                "dropping unacknowledged journal bytes"
            );
            self.file.set_len(self.committed).await?;
            self.file.sync_data().await?;
        } else {
            self.committed = len;
        }
        Ok(())
    }
}

#[async_trait]
impl<T> Journal<T> for FileJournal<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn append_all(&self, records: &[T]) -> JournalResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut batch = Vec::new();
        for record in records {
            serde_json::to_writer(&mut batch, record)?;
            batch.push(b'\n');
        }

        let mut tail = self.file.lock().await;
        tail.discard_unacknowledged(&self.path).await?;
        if let Err(err) = write_durably(&mut tail.file, &batch).await {
            // A partial line must not become the prefix of the next record.
            if let Err(reset) = tail.file.set_len(tail.committed).await {
                warn!(path = %self.path.display(), error = %reset, "failed to drop partial journal append");
            }
            return Err(err.into());
        }
        tail.committed += batch.len() as u64;
        Ok(())
    }

    async fn read_all(&self) -> JournalResult<Vec<T>> {
        let _guard = self.file.lock().await;
        let data = fs::read(&self.path).await?;

        let mut records = Vec::new();
        for (idx, chunk) in data.split(|byte| *byte == b'\n').enumerate() {
            if chunk.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let record = serde_json::from_slice(chunk).map_err(|source| JournalError::Corrupt {
                path: self.path.clone(),
                line: idx + 1,
                source,
            })?;
            records.push(record);
        }

        debug!(path = %self.path.display(), records = records.len(), "journal read");
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use uuid::Uuid;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Entry {
        seq: u32,
        note: String,
    }

    fn entry(seq: u32, note: &str) -> Entry {
        Entry {
            seq,
            note: note.into(),
        }
    }

    fn temp_path() -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("toolgate-journal-{}.jsonl", Uuid::new_v4()));
        path
    }

    #[tokio::test]
    async fn appended_records_survive_reopen() {
        let path = temp_path();
        let journal = FileJournal::<Entry>::open(&path).await.unwrap();
        for (seq, note) in [(1, "one"), (2, "two"), (3, "three")] {
            journal.append(&entry(seq, note)).await.unwrap();
        }
        drop(journal);

        let reopened = FileJournal::<Entry>::open(&path).await.unwrap();
        let records = reopened.read_all().await.unwrap();
        assert_eq!(records, vec![entry(1, "one"), entry(2, "two"), entry(3, "three")]);

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn torn_tail_is_truncated_on_open() {
        let path = temp_path();
        std::fs::write(&path, "{\"seq\":1,\"note\":\"ok\"}\n{\"seq\":2,\"no").unwrap();

        let journal = FileJournal::<Entry>::open(&path).await.unwrap();
        assert_eq!(journal.read_all().await.unwrap(), vec![entry(1, "ok")]);

        journal.append(&entry(3, "after")).await.unwrap();
        assert_eq!(
            journal.read_all().await.unwrap(),
            vec![entry(1, "ok"), entry(3, "after")]
        );

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn unterminated_complete_record_is_kept() {
        let path = temp_path();
        std::fs::write(&path, "{\"seq\":1,\"note\":\"ok\"}").unwrap();

        let journal = FileJournal::<Entry>::open(&path).await.unwrap();
        journal.append(&entry(2, "next")).await.unwrap();
        assert_eq!(
            journal.read_all().await.unwrap(),
            vec![entry(1, "ok"), entry(2, "next")]
        );

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn batches_are_written_together() {
        let path = temp_path();
        let journal = FileJournal::<Entry>::open(&path).await.unwrap();
        journal
            .append_all(&[entry(1, "a"), entry(2, "b")])
            .await
            .unwrap();
        journal.append_all(&[]).await.unwrap();
        journal.append(&entry(3, "c")).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().count(), 3);
        assert_eq!(
            journal.read_all().await.unwrap(),
            vec![entry(1, "a"), entry(2, "b"), entry(3, "c")]
        );

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn fragment_of_failed_append_is_dropped_before_next_record() {
        use std::io::Write;

        let path = temp_path();
        let journal = FileJournal::<Entry>::open(&path).await.unwrap();
        journal.append(&entry(1, "ok")).await.unwrap();

        // Bytes of an append that never completed.
        let mut raw = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        raw.write_all(b"{\"seq\":2,\"no").unwrap();
        drop(raw);

        journal.append(&entry(3, "after")).await.unwrap();
        drop(journal);

        let reopened = FileJournal::<Entry>::open(&path).await.unwrap();
        assert_eq!(
            reopened.read_all().await.unwrap(),
            vec![entry(1, "ok"), entry(3, "after")]
        );

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn corrupt_interior_line_is_reported() {
        let path = temp_path();
        std::fs::write(&path, "{\"seq\":1,\"note\":\"ok\"}\nnot json\n{\"seq\":2,\"note\":\"x\"}\n")
            .unwrap();

        let journal = FileJournal::<Entry>::open(&path).await.unwrap();
        let err = journal.read_all().await.expect_err("corrupt line");
        assert!(matches!(err, JournalError::Corrupt { line: 2, .. }));

        let _ = std::fs::remove_file(path);
    }
}
