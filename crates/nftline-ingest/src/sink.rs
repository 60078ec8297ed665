//! Storage collaborators
//!
//! Sinks absorb their own failures: the scheduler treats every upsert as
//! delivered and relies on last-write-wins idempotence when work is redone.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nftline_queue::Dataset;
use serde::{Deserialize, Serialize};

use crate::record::Record;

/// Idempotent record store keyed by record id
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Create or update; returns how many records changed storage
    async fn upsert(&self, dataset: Dataset, records: &[Record]) -> usize;

    /// Remove ids; absent ids are ignored
    async fn delete(&self, dataset: Dataset, ids: &[String]);

    /// Best-effort number of stored records
    async fn count(&self, dataset: Dataset) -> usize;
}

/// Whether `incoming` should replace a stored record last written at `stored`
fn supersedes(incoming: DateTime<Utc>, stored: Option<DateTime<Utc>>) -> bool {
    stored.map_or(true, |stored| incoming >= stored)
}

// =============================================================================
// MemorySink
// =============================================================================

/// In-memory last-write-wins store
#[derive(Default)]
pub struct MemorySink {
    tables: Mutex<HashMap<Dataset, HashMap<String, Record>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, dataset: Dataset, id: &str) -> Option<Record> {
        self.tables
            .lock()
            .expect("sink lock poisoned")
            .get(&dataset)
            .and_then(|t| t.get(id).cloned())
    }

    /// Sorted ids currently stored
    pub fn ids(&self, dataset: Dataset) -> Vec<String> {
        let tables = self.tables.lock().expect("sink lock poisoned");
        let mut ids: Vec<String> = tables
            .get(&dataset)
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn upsert(&self, dataset: Dataset, records: &[Record]) -> usize {
        let mut tables = self.tables.lock().expect("sink lock poisoned");
        let table = tables.entry(dataset).or_default();
        let mut changed = 0;
        for record in records {
            let stored = table.get(&record.id).map(|r| r.updated_at);
            if supersedes(record.updated_at, stored) {
                if table.get(&record.id) != Some(record) {
                    changed += 1;
                }
                table.insert(record.id.clone(), record.clone());
            }
        }
        changed
    }

    async fn delete(&self, dataset: Dataset, ids: &[String]) {
        let mut tables = self.tables.lock().expect("sink lock poisoned");
        if let Some(table) = tables.get_mut(&dataset) {
            for id in ids {
                table.remove(id);
            }
        }
    }

    async fn count(&self, dataset: Dataset) -> usize {
        self.tables
            .lock()
            .expect("sink lock poisoned")
            .get(&dataset)
            .map_or(0, HashMap::len)
    }
}

// =============================================================================
// JsonlSink
// =============================================================================

/// One line of a dataset log
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Entry {
    Upsert { record: Record },
    Delete { id: String },
}

type Index = HashMap<Dataset, HashMap<String, DateTime<Utc>>>;

/// Append-only JSON-lines store, one `{dataset}.jsonl` per dataset.
///
/// The id → `updated_at` index is rebuilt from the logs on open, so records
/// already stored at the same or a newer version are not written again.
#[derive(Clone)]
pub struct JsonlSink {
    inner: Arc<JsonlInner>,
}

struct JsonlInner {
    dir: PathBuf,
    index: Mutex<Index>,
}

impl JsonlSink {
    pub fn open(dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let mut index = Index::new();
        for &dataset in Dataset::all() {
            let path = log_path(&dir, dataset);
            trim_torn_tail(&path)?;
            let table = replay(&path)?;
            if !table.is_empty() {
                log::info!("{dataset}: {} stored records", table.len());
            }
            index.insert(dataset, table);
        }
        Ok(Self {
            inner: Arc::new(JsonlInner {
                dir,
                index: Mutex::new(index),
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// Append the entries `f` derives from the current index, then apply
    /// them to the index once they are on disk
    async fn append<F>(&self, dataset: Dataset, f: F) -> std::io::Result<usize>
    where
        F: FnOnce(&HashMap<String, DateTime<Utc>>) -> Vec<Entry> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut index = inner.index.lock().expect("sink lock poisoned");
            let table = index.entry(dataset).or_default();
            let entries = f(table);
            if entries.is_empty() {
                return Ok(0);
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path(&inner.dir, dataset))?;
            let mut writer = BufWriter::new(file);
            for entry in &entries {
                serde_json::to_writer(&mut writer, entry)?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
            for entry in &entries {
                match entry {
                    Entry::Upsert { record } => {
                        table.insert(record.id.clone(), record.updated_at);
                    }
                    Entry::Delete { id } => {
                        table.remove(id);
                    }
                }
            }
            Ok(entries.len())
        })
        .await
        .map_err(std::io::Error::other)?
    }
}

fn log_path(dir: &Path, dataset: Dataset) -> PathBuf {
    dir.join(format!("{dataset}.jsonl"))
}

/// Cut a partially written last line so later appends start on a fresh line
fn trim_torn_tail(path: &Path) -> std::io::Result<()> {
    let mut file = match OpenOptions::new().read(true).write(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(());
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(());
    }

    let mut bytes = Vec::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut bytes)?;
    let keep = bytes
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |pos| pos as u64 + 1);
    log::warn!(
        "{}: dropping {} bytes of torn trailing line",
        path.display(),
        len - keep
    );
    file.set_len(keep)?;
    file.sync_all()
}

/// Rebuild the live index from a dataset log; torn lines are skipped
fn replay(path: &Path) -> std::io::Result<HashMap<String, DateTime<Utc>>> {
    let mut table = HashMap::new();
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(table),
        Err(e) => return Err(e),
    };
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Entry>(&line) {
            Ok(Entry::Upsert { record }) => {
                table.insert(record.id, record.updated_at);
            }
            Ok(Entry::Delete { id }) => {
                table.remove(&id);
            }
            Err(e) => log::warn!("{}:{}: skipping unreadable line: {e}", path.display(), n + 1),
        }
    }
    Ok(table)
}

#[async_trait]
impl RecordSink for JsonlSink {
    async fn upsert(&self, dataset: Dataset, records: &[Record]) -> usize {
        let records = records.to_vec();
        let result = self
            .append(dataset, move |table| {
                let mut pending: HashMap<String, DateTime<Utc>> = HashMap::new();
                let mut entries = Vec::new();
                for record in records {
                    let stored = pending.get(&record.id).or_else(|| table.get(&record.id));
                    if stored.is_some_and(|&s| s >= record.updated_at) {
                        continue;
                    }
                    pending.insert(record.id.clone(), record.updated_at);
                    entries.push(Entry::Upsert { record });
                }
                entries
            })
            .await;
        match result {
            Ok(n) => n,
            Err(e) => {
                log::error!("{dataset}: upsert failed: {e}");
                0
            }
        }
    }

    async fn delete(&self, dataset: Dataset, ids: &[String]) {
        let ids = ids.to_vec();
        let result = self
            .append(dataset, move |table| {
                let mut seen = HashSet::new();
                ids.into_iter()
                    .filter(|id| table.contains_key(id) && seen.insert(id.clone()))
                    .map(|id| Entry::Delete { id })
                    .collect()
            })
            .await;
        if let Err(e) = result {
            log::error!("{dataset}: delete failed: {e}");
        }
    }

    async fn count(&self, dataset: Dataset) -> usize {
        self.inner
            .index
            .lock()
            .expect("sink lock poisoned")
            .get(&dataset)
            .map_or(0, HashMap::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{OrderRow, Row};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn record(id: &str, minute: u32, status: &str) -> Record {
        Record {
            id: id.to_string(),
            dataset: Dataset::Asks,
            updated_at: Utc.with_ymd_and_hms(2023, 1, 1, 0, minute, 0).unwrap(),
            row: Row::Order(OrderRow {
                status: Some(status.to_string()),
                ..Default::default()
            }),
        }
    }

    fn status(sink: &MemorySink, id: &str) -> Option<String> {
        match sink.get(Dataset::Asks, id)?.row {
            Row::Order(row) => row.status,
            Row::Sale(_) => None,
        }
    }

    #[tokio::test]
    async fn memory_upsert_is_idempotent() {
        let sink = MemorySink::new();
        let r = record("a", 0, "active");
        assert_eq!(sink.upsert(Dataset::Asks, &[r.clone()]).await, 1);
        assert_eq!(sink.upsert(Dataset::Asks, &[r.clone()]).await, 0);
        assert_eq!(sink.count(Dataset::Asks).await, 1);
        assert_eq!(sink.get(Dataset::Asks, "a"), Some(r));
    }

    #[tokio::test]
    async fn memory_newer_version_wins() {
        let sink = MemorySink::new();
        sink.upsert(Dataset::Asks, &[record("a", 5, "active")]).await;
        sink.upsert(Dataset::Asks, &[record("a", 1, "stale")]).await;
        assert_eq!(status(&sink, "a").as_deref(), Some("active"));
        sink.upsert(Dataset::Asks, &[record("a", 9, "filled")]).await;
        assert_eq!(status(&sink, "a").as_deref(), Some("filled"));
    }

    #[tokio::test]
    async fn memory_delete_ignores_absent() {
        let sink = MemorySink::new();
        sink.upsert(Dataset::Asks, &[record("a", 0, "active")]).await;
        sink.delete(Dataset::Asks, &["a".into(), "missing".into()]).await;
        sink.delete(Dataset::Bids, &["a".into()]).await;
        assert_eq!(sink.count(Dataset::Asks).await, 0);
    }

    #[tokio::test]
    async fn jsonl_skips_known_versions_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let sink = JsonlSink::open(dir.path()).unwrap();
            let written = sink
                .upsert(Dataset::Asks, &[record("a", 0, "active"), record("b", 0, "active")])
                .await;
            assert_eq!(written, 2);
        }
        let sink = JsonlSink::open(dir.path()).unwrap();
        assert_eq!(sink.count(Dataset::Asks).await, 2);
        assert_eq!(sink.upsert(Dataset::Asks, &[record("a", 0, "active")]).await, 0);
        assert_eq!(sink.upsert(Dataset::Asks, &[record("a", 3, "filled")]).await, 1);

        let log = std::fs::read_to_string(dir.path().join("asks.jsonl")).unwrap();
        assert_eq!(log.lines().count(), 3);
    }

    #[tokio::test]
    async fn jsonl_tombstones_replayed() {
        let dir = TempDir::new().unwrap();
        let sink = JsonlSink::open(dir.path()).unwrap();
        sink.upsert(Dataset::Asks, &[record("a", 0, "active"), record("b", 0, "active")])
            .await;
        sink.delete(Dataset::Asks, &["a".into(), "zzz".into()]).await;
        assert_eq!(sink.count(Dataset::Asks).await, 1);

        let reopened = JsonlSink::open(dir.path()).unwrap();
        assert_eq!(reopened.count(Dataset::Asks).await, 1);
    }

    #[test]
    fn replay_skips_torn_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("asks.jsonl");
        let line = serde_json::to_string(&Entry::Upsert {
            record: record("a", 0, "active"),
        })
        .unwrap();
        std::fs::write(&path, format!("{line}\n{{\"op\":\"ups")).unwrap();
        assert_eq!(replay(&path).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn append_after_torn_tail_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("asks.jsonl");
        let line = serde_json::to_string(&Entry::Upsert {
            record: record("a", 0, "active"),
        })
        .unwrap();
        std::fs::write(&path, format!("{line}\n{{\"op\":\"ups")).unwrap();

        let sink = JsonlSink::open(dir.path()).unwrap();
        assert_eq!(sink.count(Dataset::Asks).await, 1);
        assert_eq!(sink.upsert(Dataset::Asks, &[record("b", 0, "active")]).await, 1);
        assert_eq!(sink.count(Dataset::Asks).await, 2);

        let reopened = JsonlSink::open(dir.path()).unwrap();
        assert_eq!(reopened.count(Dataset::Asks).await, 2);
        let log = std::fs::read_to_string(&path).unwrap();
        assert_eq!(log.lines().count(), 2);
        assert!(log.ends_with('\n'));
    }

    #[test]
    fn torn_tail_without_any_newline_is_cleared() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bids.jsonl");
        std::fs::write(&path, "{\"op\":\"del").unwrap();
        trim_torn_tail(&path).unwrap();
        assert_eq!(std::fs::read(&path).unwrap().len(), 0);
        trim_torn_tail(&dir.path().join("missing.jsonl")).unwrap();
    }
}
