//! [`TransmissionStore`] implementations.
//!
//! - [`InMemoryTransmissionStore`]: process-local, used when no store path
//!   is configured and in tests.
//! - [`JsonLinesTransmissionStore`]: durable append-only file. Every insert
//!   or update appends one JSON line holding the full entry; opening the
//!   file replays it and the last line per entry wins.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use codeco::{StoreError, TransmissionId, TransmissionLogEntry, TransmissionStore};
use parking_lot::RwLock;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Entries {
    by_id: HashMap<TransmissionId, TransmissionLogEntry>,
    order: Vec<TransmissionId>,
}

impl Entries {
    fn insert(&mut self, entry: &TransmissionLogEntry) -> Result<(), StoreError> {
        if self.by_id.contains_key(&entry.id) {
            return Err(StoreError::Duplicate(entry.id));
        }
        self.order.push(entry.id);
        self.by_id.insert(entry.id, entry.clone());
        Ok(())
    }

    fn update(&mut self, entry: &TransmissionLogEntry) -> Result<(), StoreError> {
        match self.by_id.get_mut(&entry.id) {
            Some(slot) => {
                *slot = entry.clone();
                Ok(())
            }
            None => Err(StoreError::Missing(entry.id)),
        }
    }

    // Replay keeps the first-seen position and the latest snapshot.
    fn upsert(&mut self, entry: TransmissionLogEntry) {
        if !self.by_id.contains_key(&entry.id) {
            self.order.push(entry.id);
        }
        self.by_id.insert(entry.id, entry);
    }

    fn list(&self) -> Vec<TransmissionLogEntry> {
        self.order
            .iter()
            .filter_map(|id| self.by_id.get(id).cloned())
            .collect()
    }
}

/// Process-local transmission store.
#[derive(Debug, Default)]
pub struct InMemoryTransmissionStore {
    entries: RwLock<Entries>,
}

impl InMemoryTransmissionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransmissionStore for InMemoryTransmissionStore {
    async fn insert(&self, entry: &TransmissionLogEntry) -> Result<(), StoreError> {
        self.entries.write().insert(entry)
    }

    async fn update(&self, entry: &TransmissionLogEntry) -> Result<(), StoreError> {
        self.entries.write().update(entry)
    }

    async fn get(&self, id: TransmissionId) -> Result<Option<TransmissionLogEntry>, StoreError> {
        Ok(self.entries.read().by_id.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<TransmissionLogEntry>, StoreError> {
        Ok(self.entries.read().list())
    }
}

// ---------------------------------------------------------------------------
// JSON lines
// ---------------------------------------------------------------------------

/// Fix-up applied to the file tail before appending.
#[derive(Debug, Clone, Copy)]
enum Repair {
    None,
    /// Drop an incomplete final record starting at this byte offset.
    TruncateTo(u64),
    /// The final record is complete but lacks its newline.
    Terminate,
}

/// Durable append-only transmission store backed by a JSON-lines file.
///
/// Reads are served from memory. Writes hold the file lock while appending
/// so lines never interleave.
#[derive(Debug)]
pub struct JsonLinesTransmissionStore {
    path: PathBuf,
    file: Mutex<File>,
    entries: RwLock<Entries>,
}

impl JsonLinesTransmissionStore {
    /// Opens (or creates) the store at `path` and replays its contents.
    ///
    /// A malformed final line is what an interrupted append leaves behind: it
    /// is discarded with a warning and cut from the file, so later appends
    /// start on a clean line. A malformed line anywhere else is reported as
    /// [`StoreError::Corrupt`].
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut entries = Entries::default();
        let mut replayed = 0usize;
        let mut repair = Repair::None;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let lines: Vec<&str> = content.split_inclusive('\n').collect();
                let last = lines.len();
                let mut offset = 0u64;
                for (index, raw) in lines.into_iter().enumerate() {
                    let start = offset;
                    offset += raw.len() as u64;
                    let line = raw.trim_end_matches(['\n', '\r']);
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<TransmissionLogEntry>(line) {
                        Ok(entry) => {
                            entries.upsert(entry);
                            replayed += 1;
                            if index + 1 == last && !raw.ends_with('\n') {
                                repair = Repair::Terminate;
                            }
                        }
                        Err(e) if index + 1 == last => {
                            warn!(
                                path = %path.display(),
                                line = index + 1,
                                error = %e,
                                "Discarding truncated final record in transmission store"
                            );
                            repair = Repair::TruncateTo(start);
                        }
                        Err(e) => {
                            return Err(StoreError::Corrupt {
                                line: index + 1,
                                reason: e.to_string(),
                            })
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        // New records must start on a fresh line.
        match repair {
            Repair::None => {}
            Repair::TruncateTo(len) => {
                file.set_len(len).await?;
                file.sync_data().await?;
            }
            Repair::Terminate => {
                file.write_all(b"\n").await?;
                file.sync_data().await?;
            }
        }

        info!(
            path = %path.display(),
            records = replayed,
            entries = entries.order.len(),
            "Opened transmission store"
        );

        Ok(Self {
            path,
            file: Mutex::new(file),
            entries: RwLock::new(entries),
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, entry: &TransmissionLogEntry) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(entry).map_err(|e| StoreError::Serialize {
            id: entry.id,
            reason: e.to_string(),
        })?;
        line.push('\n');

        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        file.sync_data().await?;
        debug!(transmission_id = %entry.id, status = %entry.status, "Appended transmission record");
        Ok(())
    }
}

#[async_trait]
impl TransmissionStore for JsonLinesTransmissionStore {
    async fn insert(&self, entry: &TransmissionLogEntry) -> Result<(), StoreError> {
        if self.entries.read().by_id.contains_key(&entry.id) {
            return Err(StoreError::Duplicate(entry.id));
        }
        self.append(entry).await?;
        self.entries.write().upsert(entry.clone());
        Ok(())
    }

    async fn update(&self, entry: &TransmissionLogEntry) -> Result<(), StoreError> {
        if !self.entries.read().by_id.contains_key(&entry.id) {
            return Err(StoreError::Missing(entry.id));
        }
        self.append(entry).await?;
        self.entries.write().update(entry)
    }

    async fn get(&self, id: TransmissionId) -> Result<Option<TransmissionLogEntry>, StoreError> {
        Ok(self.entries.read().by_id.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<TransmissionLogEntry>, StoreError> {
        Ok(self.entries.read().list())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeco::{
        ContainerNumber, MessageReference, NewTransmission, OperationKind, PartnerCode, Timestamp,
        TransmissionStatus,
    };

    fn entry(number: &str) -> TransmissionLogEntry {
        TransmissionLogEntry::pending(
            NewTransmission {
                operation_id: None,
                operation: OperationKind::GateIn,
                booking_reference: None,
                container_numbers: vec![ContainerNumber::new(number).unwrap()],
                file_name: format!("CODECO_{number}.edi"),
                message_reference: MessageReference::new("COD1").unwrap(),
                partner_code: PartnerCode::new("MAEU").unwrap(),
                sandbox: false,
                payload: "UNA:+.? 'UNB+UNOA:2+A+B'".to_string(),
            },
            Timestamp::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_in_memory_keeps_creation_order() {
        let store = InMemoryTransmissionStore::new();
        let first = entry("MSKU1234567");
        let second = entry("TGHU7654321");
        store.insert(&first).await.unwrap();
        store.insert(&second).await.unwrap();

        let mut updated = first.clone();
        updated.mark_sent(Timestamp::now()).unwrap();
        store.update(&updated).await.unwrap();

        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, first.id);
        assert_eq!(all[0].status, TransmissionStatus::Sent);
        assert_eq!(all[1].id, second.id);
    }

    #[tokio::test]
    async fn test_in_memory_rejects_duplicate_and_missing() {
        let store = InMemoryTransmissionStore::new();
        let e = entry("MSKU1234567");

        assert!(matches!(store.update(&e).await, Err(StoreError::Missing(_))));
        store.insert(&e).await.unwrap();
        assert!(matches!(store.insert(&e).await, Err(StoreError::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_json_lines_replays_latest_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log").join("transmissions.jsonl");

        let e = entry("MSKU1234567");
        {
            let store = JsonLinesTransmissionStore::open(&path).await.unwrap();
            store.insert(&e).await.unwrap();
            let mut sent = e.clone();
            sent.mark_sent(Timestamp::now()).unwrap();
            store.update(&sent).await.unwrap();
            sent.mark_failed("timeout").unwrap();
            store.update(&sent).await.unwrap();
        }

        let reopened = JsonLinesTransmissionStore::open(&path).await.unwrap();
        let all = reopened.list().await.unwrap();

        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, TransmissionStatus::Failed);
        assert_eq!(all[0].error_message.as_deref(), Some("timeout"));

        let lines = std::fs::read_to_string(&path).unwrap();
        assert_eq!(lines.lines().count(), 3);
    }

    #[tokio::test]
    async fn test_json_lines_skips_truncated_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transmissions.jsonl");
        let e = entry("MSKU1234567");
        let mut content = serde_json::to_string(&e).unwrap();
        content.push('\n');
        content.push_str("{\"id\":\"trunc");
        std::fs::write(&path, content).unwrap();

        let store = JsonLinesTransmissionStore::open(&path).await.unwrap();

        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_json_lines_appends_cleanly_after_truncated_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transmissions.jsonl");
        let first = entry("MSKU1234567");
        let mut content = serde_json::to_string(&first).unwrap();
        content.push('\n');
        content.push_str("{\"id\":\"trunc");
        std::fs::write(&path, content).unwrap();

        let second = entry("TGHU7654321");
        let third = entry("CSQU3054383");
        {
            let store = JsonLinesTransmissionStore::open(&path).await.unwrap();
            store.insert(&second).await.unwrap();
            store.insert(&third).await.unwrap();
        }

        let reopened = JsonLinesTransmissionStore::open(&path).await.unwrap();
        let ids: Vec<_> = reopened.list().await.unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![first.id, second.id, third.id]);
        assert!(!std::fs::read_to_string(&path).unwrap().contains("trunc"));
    }

    #[tokio::test]
    async fn test_json_lines_terminates_unfinished_final_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transmissions.jsonl");
        let first = entry("MSKU1234567");
        std::fs::write(&path, serde_json::to_string(&first).unwrap()).unwrap();

        let second = entry("TGHU7654321");
        {
            let store = JsonLinesTransmissionStore::open(&path).await.unwrap();
            store.insert(&second).await.unwrap();
        }

        let reopened = JsonLinesTransmissionStore::open(&path).await.unwrap();
        assert_eq!(reopened.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_json_lines_rejects_corrupt_middle_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transmissions.jsonl");
        let e = entry("MSKU1234567");
        let content = format!("not json\n{}\n", serde_json::to_string(&e).unwrap());
        std::fs::write(&path, content).unwrap();

        let result = JsonLinesTransmissionStore::open(&path).await;

        assert!(matches!(result, Err(StoreError::Corrupt { line: 1, .. })));
    }
}
