//! Queue contract and the retrying façade the scheduler talks to

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use nftline_core::retry_forever;

use crate::block::{Block, Dataset};
use crate::checkpoint::{Checkpoint, WorkerCheckpoint};
use crate::error::QueueError;

/// Crash-surviving FIFO of pending blocks plus a checkpoint slot, per dataset.
///
/// Every call is a single atomic operation on the backing store; callers
/// never need multi-step transactions because a popped block belongs to
/// exactly one worker.
#[async_trait]
pub trait BlockQueue: Send + Sync {
    /// Append to the tail of the block's dataset list
    async fn push(&self, block: &Block) -> Result<(), QueueError>;

    /// Remove and return the head, `None` when empty
    async fn pop(&self, dataset: Dataset) -> Result<Option<Block>, QueueError>;

    /// Non-destructive read of the whole pending list
    async fn all(&self, dataset: Dataset) -> Result<Vec<Block>, QueueError>;

    async fn len(&self, dataset: Dataset) -> Result<usize, QueueError>;

    /// Replace the dataset's checkpoint wholesale
    async fn store_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), QueueError>;

    async fn checkpoint(&self, dataset: Dataset) -> Result<Option<Checkpoint>, QueueError>;
}

/// Scheduler-facing queue: transport failures are retried here, never surfaced.
///
/// Only errors that cannot improve with time (corrupt documents) reach the
/// caller.
#[derive(Clone)]
pub struct DurableQueue {
    store: Arc<dyn BlockQueue>,
    backups: Arc<Mutex<HashMap<Dataset, Checkpoint>>>,
}

impl DurableQueue {
    pub fn new(store: Arc<dyn BlockQueue>) -> Self {
        Self {
            store,
            backups: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn insert_block(&self, block: &Block) -> Result<(), QueueError> {
        retry_forever("queue push", || self.store.push(block)).await?;
        log::debug!("queued {block}");
        Ok(())
    }

    pub async fn get_block(&self, dataset: Dataset) -> Result<Option<Block>, QueueError> {
        retry_forever("queue pop", || self.store.pop(dataset)).await
    }

    /// Observability only
    pub async fn get_all_blocks(&self, dataset: Dataset) -> Result<Vec<Block>, QueueError> {
        retry_forever("queue read", || self.store.all(dataset)).await
    }

    /// Observability only
    pub async fn get_queue_length(&self, dataset: Dataset) -> Result<usize, QueueError> {
        retry_forever("queue length", || self.store.len(dataset)).await
    }

    /// Overwrite the checkpoint for `dataset` with the given worker progress
    pub async fn backup(
        &self,
        dataset: Dataset,
        workers: Vec<WorkerCheckpoint>,
    ) -> Result<(), QueueError> {
        let checkpoint = Checkpoint::new(dataset, workers);
        retry_forever("checkpoint write", || self.store.store_checkpoint(&checkpoint)).await?;
        self.backups
            .lock()
            .expect("backup cache poisoned")
            .insert(dataset, checkpoint);
        Ok(())
    }

    /// Read every dataset's checkpoint into memory; returns how many were found
    pub async fn load_backup(&self) -> Result<usize, QueueError> {
        let mut loaded = HashMap::new();
        for &dataset in Dataset::all() {
            if let Some(cp) = retry_forever("checkpoint read", || self.store.checkpoint(dataset)).await? {
                loaded.insert(dataset, cp);
            }
        }
        let count = loaded.len();
        *self.backups.lock().expect("backup cache poisoned") = loaded;
        Ok(count)
    }

    /// Checkpoint cached by the last [`load_backup`](Self::load_backup) or [`backup`](Self::backup)
    pub fn get_backup(&self, dataset: Dataset) -> Option<Checkpoint> {
        self.backups
            .lock()
            .expect("backup cache poisoned")
            .get(&dataset)
            .cloned()
    }
}
