//! File-backed durable queue
//!
//! Directory layout:
//! ```text
//! {dir}/
//! ├── sales.queue.json        # pending blocks, head first
//! ├── sales.checkpoint.json   # last worker snapshot
//! └── asks.queue.json ...
//! ```
//! Every mutation rewrites the affected document to `*.tmp` and renames it
//! over the original, so a crash leaves either the old or the new list.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::block::{Block, Dataset};
use crate::checkpoint::Checkpoint;
use crate::error::QueueError;
use crate::queue::BlockQueue;

/// Durable queue stored as JSON documents in a directory.
#[derive(Clone)]
pub struct FileQueue {
    inner: Arc<Inner>,
}

struct Inner {
    dir: PathBuf,
    // Serializes read-modify-write cycles between concurrent callers
    lock: Mutex<()>,
}

impl FileQueue {
    /// Open (creating if needed) a queue directory
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, QueueError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        cleanup_tmp_files(&dir)?;
        log::debug!("queue directory: {}", dir.display());
        Ok(Self {
            inner: Arc::new(Inner {
                dir,
                lock: Mutex::new(()),
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// Run blocking file work off the async executor, holding the store lock
    async fn blocking<T, F>(&self, f: F) -> Result<T, QueueError>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> Result<T, QueueError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let _guard = inner
                .lock
                .lock()
                .map_err(|_| QueueError::Task("file queue lock poisoned".into()))?;
            f(&inner.dir)
        })
        .await
        .map_err(|e| QueueError::Task(e.to_string()))?
    }
}

fn queue_path(dir: &Path, dataset: Dataset) -> PathBuf {
    dir.join(format!("{dataset}.queue.json"))
}

fn checkpoint_path(dir: &Path, dataset: Dataset) -> PathBuf {
    dir.join(format!("{dataset}.checkpoint.json"))
}

/// Read a JSON document, `None` if it does not exist yet
fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, QueueError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| QueueError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

/// Write a JSON document via tmp + rename
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), QueueError> {
    let json = serde_json::to_vec_pretty(value).map_err(|source| QueueError::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_blocks(dir: &Path, dataset: Dataset) -> Result<Vec<Block>, QueueError> {
    Ok(read_json(&queue_path(dir, dataset))?.unwrap_or_default())
}

/// Remove `.tmp` files left by a crash mid-write
fn cleanup_tmp_files(dir: &Path) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "tmp") {
            log::warn!("Removing stale tmp file: {}", path.display());
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

#[async_trait]
impl BlockQueue for FileQueue {
    async fn push(&self, block: &Block) -> Result<(), QueueError> {
        let block = block.clone();
        self.blocking(move |dir| {
            let mut blocks = read_blocks(dir, block.dataset())?;
            let path = queue_path(dir, block.dataset());
            blocks.push(block);
            write_json(&path, &blocks)
        })
        .await
    }

    async fn pop(&self, dataset: Dataset) -> Result<Option<Block>, QueueError> {
        self.blocking(move |dir| {
            let mut blocks = read_blocks(dir, dataset)?;
            if blocks.is_empty() {
                return Ok(None);
            }
            let head = blocks.remove(0);
            write_json(&queue_path(dir, dataset), &blocks)?;
            Ok(Some(head))
        })
        .await
    }

    async fn all(&self, dataset: Dataset) -> Result<Vec<Block>, QueueError> {
        self.blocking(move |dir| read_blocks(dir, dataset)).await
    }

    async fn len(&self, dataset: Dataset) -> Result<usize, QueueError> {
        self.blocking(move |dir| Ok(read_blocks(dir, dataset)?.len()))
            .await
    }

    async fn store_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), QueueError> {
        let checkpoint = checkpoint.clone();
        self.blocking(move |dir| write_json(&checkpoint_path(dir, checkpoint.dataset), &checkpoint))
            .await
    }

    async fn checkpoint(&self, dataset: Dataset) -> Result<Option<Checkpoint>, QueueError> {
        self.blocking(move |dir| read_json(&checkpoint_path(dir, dataset)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{Phase, WorkerCheckpoint};
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn block(start: i64) -> Block {
        Block::new(
            Dataset::Asks,
            Utc.timestamp_opt(start, 0).unwrap(),
            Utc.timestamp_opt(start + 30, 0).unwrap(),
            "0xabc",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = TempDir::new().unwrap();
        let (a, b) = (block(0), block(30));
        {
            let q = FileQueue::open(dir.path()).unwrap();
            q.push(&a).await.unwrap();
            q.push(&b).await.unwrap();
        }
        let q = FileQueue::open(dir.path()).unwrap();
        assert_eq!(q.len(Dataset::Asks).await.unwrap(), 2);
        assert_eq!(q.pop(Dataset::Asks).await.unwrap(), Some(a));

        let q = FileQueue::open(dir.path()).unwrap();
        assert_eq!(q.all(Dataset::Asks).await.unwrap(), vec![b]);
    }

    #[tokio::test]
    async fn empty_when_no_file() {
        let dir = TempDir::new().unwrap();
        let q = FileQueue::open(dir.path()).unwrap();
        assert_eq!(q.pop(Dataset::Sales).await.unwrap(), None);
        assert_eq!(q.len(Dataset::Sales).await.unwrap(), 0);
        assert_eq!(q.checkpoint(Dataset::Sales).await.unwrap(), None);
    }

    #[tokio::test]
    async fn checkpoint_roundtrip() {
        let dir = TempDir::new().unwrap();
        let q = FileQueue::open(dir.path()).unwrap();
        let cp = Checkpoint::new(
            Dataset::Asks,
            vec![WorkerCheckpoint {
                worker: 1,
                block: block(0),
                phase: Phase::Draining,
                continuation: Some("c2".into()),
            }],
        );
        q.store_checkpoint(&cp).await.unwrap();
        let reopened = FileQueue::open(dir.path()).unwrap();
        assert_eq!(reopened.checkpoint(Dataset::Asks).await.unwrap(), Some(cp));
    }

    #[tokio::test]
    async fn corrupt_document_reported() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("sales.queue.json"), b"[{").unwrap();
        let q = FileQueue::open(dir.path()).unwrap();
        let err = q.pop(Dataset::Sales).await.unwrap_err();
        assert!(matches!(err, QueueError::Corrupt { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn open_removes_stale_tmp() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("sales.queue.json.tmp"), b"partial").unwrap();
        std::fs::write(dir.path().join("sales.queue.json"), b"[]").unwrap();
        FileQueue::open(dir.path()).unwrap();
        assert!(!dir.path().join("sales.queue.json.tmp").exists());
        assert!(dir.path().join("sales.queue.json").exists());
    }

    #[tokio::test]
    async fn concurrent_pushes_not_lost() {
        let dir = TempDir::new().unwrap();
        let q = FileQueue::open(dir.path()).unwrap();
        let mut handles = Vec::new();
        for i in 0..16 {
            let q = q.clone();
            handles.push(tokio::spawn(async move { q.push(&block(i * 30)).await }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(q.len(Dataset::Asks).await.unwrap(), 16);
    }
}
