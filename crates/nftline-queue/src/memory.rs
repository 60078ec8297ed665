//! In-process queue for tests and single-shot runs

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::block::{Block, Dataset};
use crate::checkpoint::Checkpoint;
use crate::error::QueueError;
use crate::queue::BlockQueue;

/// Queue held entirely in memory; nothing survives the process.
#[derive(Default)]
pub struct MemoryQueue {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    blocks: HashMap<Dataset, VecDeque<Block>>,
    checkpoints: HashMap<Dataset, Checkpoint>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> Result<T, QueueError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| QueueError::Task("memory queue lock poisoned".into()))?;
        Ok(f(&mut guard))
    }
}

#[async_trait]
impl BlockQueue for MemoryQueue {
    async fn push(&self, block: &Block) -> Result<(), QueueError> {
        self.with(|inner| {
            inner
                .blocks
                .entry(block.dataset())
                .or_default()
                .push_back(block.clone())
        })
    }

    async fn pop(&self, dataset: Dataset) -> Result<Option<Block>, QueueError> {
        self.with(|inner| inner.blocks.get_mut(&dataset).and_then(VecDeque::pop_front))
    }

    async fn all(&self, dataset: Dataset) -> Result<Vec<Block>, QueueError> {
        self.with(|inner| {
            inner
                .blocks
                .get(&dataset)
                .map(|q| q.iter().cloned().collect())
                .unwrap_or_default()
        })
    }

    async fn len(&self, dataset: Dataset) -> Result<usize, QueueError> {
        self.with(|inner| inner.blocks.get(&dataset).map_or(0, VecDeque::len))
    }

    async fn store_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), QueueError> {
        self.with(|inner| {
            inner
                .checkpoints
                .insert(checkpoint.dataset, checkpoint.clone());
        })
    }

    async fn checkpoint(&self, dataset: Dataset) -> Result<Option<Checkpoint>, QueueError> {
        self.with(|inner| inner.checkpoints.get(&dataset).cloned())
    }
}
