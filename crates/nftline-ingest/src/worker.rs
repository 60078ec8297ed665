//! Block worker: partition, then drain
//!
//! ```text
//! idle ─► partitioning ─┬─► draining ─► idle (Released)
//!            ▲   │      │
//!            └───┘      └─► idle (Released, frontier policy = release)
//!         split: right half → enqueue_sibling, keep left half
//! ```
//!
//! Partitioning probes the block from both ends at once and bisects it while
//! the probes say it is too dense to drain. Draining walks the remaining
//! interval with the continuation cursor, storing every page before asking
//! for the next one. Failed requests never end the block; they are retried
//! with the status-specific delay from [`RetryPolicy`].

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use nftline_core::{RetryPolicy, is_shutdown_requested};
use nftline_queue::{Block, Dataset, Phase, WorkerCheckpoint};
use serde_json::Value;

use crate::api::{Fetch, Page, Query, SortDirection};
use crate::clock::Clock;
use crate::density::{DensityPolicy, ProbeSummary};

/// Which phase sequence a worker runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    Backfiller,
    /// Placeholder for tracking new records; never handed blocks
    Upkeeper,
}

impl WorkerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Backfiller => "backfiller",
            Self::Upkeeper => "upkeeper",
        }
    }
}

impl std::fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do when a probe shows the block already reaches today (UTC)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrontierPolicy {
    /// Stop bisecting and drain the block before releasing it
    #[default]
    Drain,
    /// Release without draining; the tail is left to upkeep
    Release,
}

impl FrontierPolicy {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "drain" => Some(Self::Drain),
            "release" => Some(Self::Release),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Drain => "drain",
            Self::Release => "release",
        }
    }
}

/// Capabilities a worker needs from whoever runs it
#[async_trait]
pub trait WorkerPorts: Send + Sync {
    /// One page request; the outcome is judged by the worker
    async fn fetch_page(&self, dataset: Dataset, query: &Query) -> Fetch;

    /// Hand the split-off right half back for independent processing
    async fn enqueue_sibling(&self, worker: usize, sibling: Block);

    /// Persist one page of records; returns once storage accepted them
    async fn store_records(&self, dataset: Dataset, records: &[Value]);
}

/// How a call to [`Worker::process`] ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// Block fully handled; the worker is idle again
    Released(Block),
    /// Upkeeper placeholder: the block was not touched
    Parked(Block),
    /// Shutdown was requested mid-block; progress is in the checkpoint
    Interrupted(Block),
}

/// Live position of a worker, read by the checkpoint cycle
#[derive(Debug, Clone, Default)]
pub struct WorkerProgress(Arc<Mutex<Option<WorkerCheckpoint>>>);

impl WorkerProgress {
    pub(crate) fn set(
        &self,
        worker: usize,
        block: &Block,
        phase: Phase,
        continuation: Option<String>,
    ) {
        *self.0.lock().expect("worker progress poisoned") = Some(WorkerCheckpoint {
            worker,
            block: block.clone(),
            phase,
            continuation,
        });
    }

    fn clear(&self) {
        *self.0.lock().expect("worker progress poisoned") = None;
    }

    pub fn snapshot(&self) -> Option<WorkerCheckpoint> {
        self.0.lock().expect("worker progress poisoned").clone()
    }
}

/// One slot of the pool. Cheap to clone; clones share progress.
#[derive(Clone)]
pub struct Worker {
    id: usize,
    kind: WorkerKind,
    density: DensityPolicy,
    retry: RetryPolicy,
    frontier: FrontierPolicy,
    clock: Arc<dyn Clock>,
    progress: WorkerProgress,
}

impl Worker {
    pub fn new(
        id: usize,
        kind: WorkerKind,
        density: DensityPolicy,
        retry: RetryPolicy,
        frontier: FrontierPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            id,
            kind,
            density,
            retry,
            frontier,
            clock,
            progress: WorkerProgress::default(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn kind(&self) -> WorkerKind {
        self.kind
    }

    pub fn progress(&self) -> &WorkerProgress {
        &self.progress
    }

    /// Run one block to completion
    pub async fn process(&self, block: Block, ports: &dyn WorkerPorts) -> WorkerOutcome {
        match self.kind {
            WorkerKind::Upkeeper => {
                log::debug!("worker {}: upkeeper parked {}", self.id, block.id().short());
                WorkerOutcome::Parked(block)
            }
            WorkerKind::Backfiller => self.backfill(block, ports).await,
        }
    }

    /// Skip partitioning and continue draining from a checkpointed cursor
    pub async fn resume(
        &self,
        block: Block,
        continuation: String,
        ports: &dyn WorkerPorts,
    ) -> WorkerOutcome {
        log::info!("worker {}: resuming {block}", self.id);
        self.drain(block, Some(continuation), ports).await
    }

    async fn backfill(&self, mut block: Block, ports: &dyn WorkerPorts) -> WorkerOutcome {
        log::debug!("worker {}: partitioning {block}", self.id);
        self.progress.set(self.id, &block, Phase::Partitioning, None);

        loop {
            let asc = Query::for_block(&block, SortDirection::Asc);
            let desc = Query::for_block(&block, SortDirection::Desc);
            let (asc, desc) = tokio::join!(
                self.fetch(block.dataset(), &asc, ports),
                self.fetch(block.dataset(), &desc, ports)
            );
            let (Some(asc), Some(desc)) = (asc, desc) else {
                return WorkerOutcome::Interrupted(block);
            };

            let probe = ProbeSummary::from_pages(&block, &asc, &desc);
            if probe.is_empty() {
                break;
            }

            if let Some(newest) = probe.newest {
                if newest.date_naive() == self.clock.today() {
                    match self.frontier {
                        FrontierPolicy::Release => {
                            log::debug!(
                                "worker {}: {} reaches today, released undrained",
                                self.id,
                                block.id().short()
                            );
                            self.progress.clear();
                            return WorkerOutcome::Released(block);
                        }
                        FrontierPolicy::Drain => {
                            log::debug!("worker {}: {} reaches today", self.id, block.id().short());
                            break;
                        }
                    }
                }
            }

            if !self.density.is_dense(&probe) {
                break;
            }

            let Some((left, right)) = block.split_at_midpoint(self.density.min_split) else {
                log::debug!(
                    "worker {}: {} dense but below minimum split",
                    self.id,
                    block.id().short()
                );
                break;
            };
            log::debug!(
                "worker {}: split at {} (~{:.0} records)",
                self.id,
                right.start(),
                probe.projected()
            );
            ports.enqueue_sibling(self.id, right).await;
            block = left;
            self.progress.set(self.id, &block, Phase::Partitioning, None);
        }

        self.drain(block, None, ports).await
    }

    async fn drain(
        &self,
        block: Block,
        mut continuation: Option<String>,
        ports: &dyn WorkerPorts,
    ) -> WorkerOutcome {
        log::debug!("worker {}: draining {block}", self.id);
        loop {
            self.progress.set(self.id, &block, Phase::Draining, continuation.clone());
            let query =
                Query::for_block(&block, SortDirection::Asc).with_continuation(continuation.take());
            let Some(page) = self.fetch(block.dataset(), &query, ports).await else {
                return WorkerOutcome::Interrupted(block);
            };

            if !page.records.is_empty() {
                ports.store_records(block.dataset(), &page.records).await;
            }

            match page.continuation {
                Some(next) => continuation = Some(next),
                None => {
                    log::debug!("worker {}: drained {}", self.id, block.id().short());
                    self.progress.clear();
                    return WorkerOutcome::Released(block);
                }
            }
        }
    }

    /// Request until a page arrives; `None` once shutdown is requested
    async fn fetch(&self, dataset: Dataset, query: &Query, ports: &dyn WorkerPorts) -> Option<Page> {
        let mut failures = 0u64;
        loop {
            if is_shutdown_requested() {
                return None;
            }
            match ports.fetch_page(dataset, query).await {
                Fetch::Page(page) => return Some(page),
                Fetch::Interrupted => return None,
                Fetch::Failed { status } => {
                    failures += 1;
                    if failures == 1 || failures % 100 == 0 {
                        log::warn!(
                            "worker {}: HTTP {status} ({failures} consecutive failures), retrying",
                            self.id
                        );
                    }
                    self.retry.wait(status).await;
                }
            }
        }
    }
}
