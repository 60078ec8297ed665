//! Controller: owns the worker pool and mediates between queue and workers
//!
//! Workers run as tokio tasks and report back over a channel; the controller
//! is a single reactor that applies [`WorkerEvent`]s one at a time, so every
//! release or idle signal results in at most one assignment before the next
//! signal is looked at.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use indicatif::ProgressBar;
use nftline_core::{backoff_duration, fmt_num, is_shutdown_requested};
use nftline_queue::{Block, Dataset, DurableQueue, Phase, QueueError, WorkerCheckpoint};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

use crate::api::{Fetch, MarketApi, Page, Query, SortDirection};
use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::record::{Record, updated_at_of};
use crate::sink::RecordSink;
use crate::stats::IngestStats;
use crate::worker::{Worker, WorkerKind, WorkerOutcome, WorkerPorts};

/// How often the reactor checks for shutdown, follow-mode polls and steady state
const HOUSEKEEPING_TICK: Duration = Duration::from_millis(250);

/// Signals workers send to the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// `block` was split off and is already on the queue
    Split { worker: usize, block: Block },
    /// `worker` finished `block`
    Released { worker: usize, block: Block },
    /// `worker` has nothing to do
    Idle { worker: usize },
}

impl WorkerEvent {
    pub fn worker(&self) -> usize {
        match self {
            Self::Split { worker, .. } | Self::Released { worker, .. } | Self::Idle { worker } => {
                *worker
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Split { .. } => "split",
            Self::Released { .. } => "release",
            Self::Idle { .. } => "idle",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("{dataset} {sort} probe failed after {attempts} attempts (last HTTP {status})")]
    Probe {
        dataset: Dataset,
        sort: &'static str,
        attempts: u32,
        status: u16,
    },
    #[error("worker {worker} sent {signal} in a state that cannot produce it")]
    UnexpectedSignal { worker: usize, signal: &'static str },
    #[error("shutdown requested")]
    Interrupted,
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Why [`Controller::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// Queue empty and every backfiller idle
    CaughtUp,
    /// Shutdown signal; progress checkpointed
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SlotState {
    Idle,
    Busy(Block),
    /// Upkeeper placeholder
    Parked,
}

struct Slot {
    worker: Worker,
    state: SlotState,
    task: Option<JoinHandle<()>>,
}

/// What workers see of the controller
struct ControllerPort {
    api: Arc<dyn MarketApi>,
    queue: DurableQueue,
    sink: Arc<dyn RecordSink>,
    stats: Arc<IngestStats>,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

#[async_trait]
impl WorkerPorts for ControllerPort {
    async fn fetch_page(&self, dataset: Dataset, query: &Query) -> Fetch {
        let fetch = self.api.fetch(dataset, query).await;
        match &fetch {
            Fetch::Page(_) => self.stats.page(),
            Fetch::Failed { .. } => self.stats.failed_request(),
            Fetch::Interrupted => {}
        }
        fetch
    }

    async fn enqueue_sibling(&self, worker: usize, sibling: Block) {
        // Durable before the worker narrows its own block
        if let Err(e) = self.queue.insert_block(&sibling).await {
            log::error!("worker {worker}: failed to queue {sibling}: {e}");
        }
        if let Err(e) = self.events.send(WorkerEvent::Split {
            worker,
            block: sibling,
        }) {
            log::debug!("worker {worker}: split signal dropped: {e}");
        }
    }

    async fn store_records(&self, dataset: Dataset, records: &[Value]) {
        let parsed = Record::parse_page(dataset, records);
        let stored = self.sink.upsert(dataset, &parsed).await;
        self.stats.records(records.len(), stored);
    }
}

pub struct Controller {
    config: SchedulerConfig,
    queue: DurableQueue,
    api: Arc<dyn MarketApi>,
    port: Arc<ControllerPort>,
    stats: Arc<IngestStats>,
    slots: Vec<Slot>,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
    events_rx: mpsc::UnboundedReceiver<WorkerEvent>,
    inserts: JoinSet<()>,
    status: Option<ProgressBar>,
}

impl Controller {
    /// Build the pool: `workers` backfillers followed by `upkeepers` placeholders
    pub fn new(
        config: SchedulerConfig,
        queue: DurableQueue,
        api: Arc<dyn MarketApi>,
        sink: Arc<dyn RecordSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let stats = Arc::new(IngestStats::new());
        let port = Arc::new(ControllerPort {
            api: Arc::clone(&api),
            queue: queue.clone(),
            sink,
            stats: Arc::clone(&stats),
            events: events_tx.clone(),
        });

        let kinds = std::iter::repeat(WorkerKind::Backfiller)
            .take(config.workers)
            .chain(std::iter::repeat(WorkerKind::Upkeeper).take(config.upkeepers));
        let slots = kinds
            .enumerate()
            .map(|(id, kind)| Slot {
                worker: Worker::new(
                    id,
                    kind,
                    config.density,
                    config.retry,
                    config.frontier,
                    Arc::clone(&clock),
                ),
                state: match kind {
                    WorkerKind::Backfiller => SlotState::Idle,
                    WorkerKind::Upkeeper => SlotState::Parked,
                },
                task: None,
            })
            .collect();

        Self {
            config,
            queue,
            api,
            port,
            stats,
            slots,
            events_tx,
            events_rx,
            inserts: JoinSet::new(),
            status: None,
        }
    }

    pub fn dataset(&self) -> Dataset {
        self.config.dataset
    }

    pub fn stats(&self) -> &Arc<IngestStats> {
        &self.stats
    }

    pub fn queue(&self) -> &DurableQueue {
        &self.queue
    }

    /// Live status line refreshed on every housekeeping tick
    pub fn set_status(&mut self, bar: ProgressBar) {
        self.status = Some(bar);
    }

    /// Block currently owned by `worker`
    pub fn assignment(&self, worker: usize) -> Option<&Block> {
        match &self.slots.get(worker)?.state {
            SlotState::Busy(block) => Some(block),
            _ => None,
        }
    }

    pub fn busy_workers(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s.state, SlotState::Busy(_)))
            .count()
    }

    /// Progress of every worker currently inside a block
    pub fn worker_states(&self) -> Vec<WorkerCheckpoint> {
        self.slots
            .iter()
            .filter_map(|s| s.worker.progress().snapshot())
            .collect()
    }

    /// Restore or probe the first work, then announce every idle backfiller
    pub async fn launch(&mut self) -> Result<(), ControllerError> {
        let dataset = self.dataset();
        log::info!(
            "{dataset}: launching {} backfillers, {} upkeepers",
            self.config.workers,
            self.config.upkeepers
        );

        let restored = if self.config.use_backup {
            self.restore().await?
        } else {
            0
        };
        let pending = self.queue.get_queue_length(dataset).await?;

        if restored == 0 && pending == 0 {
            if let Some(block) = self.initial_block().await? {
                log::info!("{dataset}: initial block {block}");
                self.queue.insert_block(&block).await?;
            }
        } else {
            log::info!(
                "{dataset}: {} queued blocks, {restored} restored from checkpoint",
                fmt_num(pending as u64)
            );
        }

        for slot in &self.slots {
            if slot.state == SlotState::Idle {
                if let Err(e) = self.events_tx.send(WorkerEvent::Idle {
                    worker: slot.worker.id(),
                }) {
                    log::debug!("worker {}: idle signal dropped: {e}", slot.worker.id());
                }
            }
        }
        Ok(())
    }

    /// Re-own checkpointed work. Draining blocks with a cursor resume in
    /// place; everything else goes back on the queue.
    async fn restore(&mut self) -> Result<usize, ControllerError> {
        let dataset = self.dataset();
        let found = self.queue.load_backup().await?;
        log::debug!("loaded {found} checkpoints");
        let Some(checkpoint) = self.queue.get_backup(dataset) else {
            return Ok(0);
        };
        log::info!(
            "{dataset}: restoring {} workers from checkpoint taken {}",
            checkpoint.workers.len(),
            checkpoint.taken_at
        );

        let mut restored = 0;
        for entry in checkpoint.workers {
            if entry.block.dataset() != dataset {
                continue;
            }
            restored += 1;
            if entry.is_resumable() {
                if let Some(slot) = self.idle_backfiller() {
                    self.assign(slot, entry.block, entry.continuation);
                    continue;
                }
            }
            self.queue.insert_block(&entry.block).await?;
        }

        // Replace the restored snapshot so a crash now cannot restore it twice
        self.backup().await?;
        Ok(restored)
    }

    /// `[earliest, latest)` from one ascending and one descending probe page
    async fn initial_block(&mut self) -> Result<Option<Block>, ControllerError> {
        let dataset = self.dataset();
        let (asc, desc) = tokio::join!(
            self.probe(SortDirection::Asc),
            self.probe(SortDirection::Desc)
        );
        let (asc, desc) = (asc?, desc?);

        let start = asc.records.last().and_then(updated_at_of);
        let end = desc.records.last().and_then(updated_at_of);

        // The probe pages cover everything outside the block
        let mut records = asc.records;
        records.extend(desc.records);
        self.insert(records);

        let (Some(start), Some(end)) = (start, end) else {
            log::info!("{dataset}: no records upstream");
            return Ok(None);
        };
        match Block::new(dataset, start, ceil_second(end), self.config.contract().unwrap_or("")) {
            Ok(block) => Ok(Some(block)),
            Err(QueueError::InvalidInterval { .. }) => {
                log::info!("{dataset}: probe pages already cover every record");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn probe(&self, sort: SortDirection) -> Result<Page, ControllerError> {
        let dataset = self.dataset();
        let query = Query::probe(sort, self.config.contract());
        let attempts = self.config.probe_attempts;
        let mut status = 0;
        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(backoff_duration(attempt)).await;
            }
            match self.api.fetch(dataset, &query).await {
                Fetch::Page(page) => return Ok(page),
                Fetch::Failed { status: s } => {
                    log::warn!(
                        "{dataset}: {} probe attempt {}/{attempts} got HTTP {s}",
                        sort.as_str(),
                        attempt + 1
                    );
                    status = s;
                }
                Fetch::Interrupted => return Err(ControllerError::Interrupted),
            }
        }
        log::error!("{dataset}: giving up on {} probe", sort.as_str());
        Err(ControllerError::Probe {
            dataset,
            sort: sort.as_str(),
            attempts,
            status,
        })
    }

    /// Apply one worker signal
    pub async fn handle_event(&mut self, event: WorkerEvent) -> Result<(), ControllerError> {
        let worker = event.worker();
        let unexpected = || ControllerError::UnexpectedSignal {
            worker,
            signal: event.kind(),
        };
        let Some(slot) = self.slots.get_mut(worker) else {
            return Err(unexpected());
        };

        match &event {
            WorkerEvent::Split { block, .. } => {
                if !matches!(slot.state, SlotState::Busy(_)) {
                    return Err(unexpected());
                }
                log::debug!("worker {worker}: split off {block}");
                self.stats.split();
            }
            WorkerEvent::Released { block, .. } => {
                match &slot.state {
                    SlotState::Busy(owned) if owned.id() == block.id() => {}
                    _ => return Err(unexpected()),
                }
                slot.state = SlotState::Idle;
                slot.task = None;
                self.stats.released();
                log::debug!("worker {worker}: released {}", block.id().short());
            }
            WorkerEvent::Idle { .. } => {
                if slot.state != SlotState::Idle {
                    return Err(unexpected());
                }
            }
        }
        self.dispatch().await?;
        Ok(())
    }

    /// Hand the queue head to an idle backfiller; true if a block was assigned
    pub async fn dispatch(&mut self) -> Result<bool, ControllerError> {
        let Some(slot) = self.idle_backfiller() else {
            return Ok(false);
        };
        let Some(block) = self.queue.get_block(self.dataset()).await? else {
            return Ok(false);
        };
        self.assign(slot, block, None);
        Ok(true)
    }

    fn idle_backfiller(&self) -> Option<usize> {
        self.slots.iter().position(|s| s.state == SlotState::Idle)
    }

    fn assign(&mut self, slot: usize, block: Block, continuation: Option<String>) {
        let worker = self.slots[slot].worker.clone();
        let port = Arc::clone(&self.port);
        let events = self.events_tx.clone();
        log::debug!("worker {slot}: assigned {block}");
        self.slots[slot].state = SlotState::Busy(block.clone());
        // Visible to the next checkpoint before the task first runs
        if worker.kind() == WorkerKind::Backfiller {
            let phase = match continuation {
                Some(_) => Phase::Draining,
                None => Phase::Partitioning,
            };
            worker
                .progress()
                .set(worker.id(), &block, phase, continuation.clone());
        }

        let task = tokio::spawn(async move {
            let outcome = match continuation {
                Some(cursor) => worker.resume(block, cursor, &*port).await,
                None => worker.process(block, &*port).await,
            };
            match outcome {
                WorkerOutcome::Released(block) => {
                    if let Err(e) = events.send(WorkerEvent::Released {
                        worker: worker.id(),
                        block,
                    }) {
                        log::debug!("worker {}: release signal dropped: {e}", worker.id());
                    }
                }
                WorkerOutcome::Parked(block) => {
                    if let Err(e) = port.queue.insert_block(&block).await {
                        log::error!("worker {}: failed to requeue {block}: {e}", worker.id());
                    }
                }
                WorkerOutcome::Interrupted(block) => {
                    log::debug!("worker {}: stopped inside {}", worker.id(), block.id().short());
                }
            }
        });
        self.slots[slot].task = Some(task);
    }

    /// Store records without waiting for the sink
    pub fn insert(&mut self, records: Vec<Value>) {
        if records.is_empty() {
            return;
        }
        let port = Arc::clone(&self.port);
        let dataset = self.dataset();
        self.inserts
            .spawn(async move { port.store_records(dataset, &records).await });
    }

    /// Overwrite this dataset's checkpoint with current worker progress
    pub async fn backup(&self) -> Result<(), ControllerError> {
        let workers = self.worker_states();
        log::debug!("{}: checkpointing {} workers", self.dataset(), workers.len());
        self.queue.backup(self.dataset(), workers).await?;
        Ok(())
    }

    /// Receive the next worker signal (for callers driving the reactor by hand)
    pub async fn next_event(&mut self) -> Option<WorkerEvent> {
        self.events_rx.recv().await
    }

    /// React to workers until caught up or shut down
    pub async fn run(&mut self) -> Result<RunExit, ControllerError> {
        let mut backup = tokio::time::interval(self.config.backup_interval);
        backup.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        backup.tick().await;
        let mut housekeeping = tokio::time::interval(HOUSEKEEPING_TICK);
        housekeeping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last_poll = tokio::time::Instant::now();

        let exit = loop {
            tokio::select! {
                Some(event) = self.events_rx.recv() => self.handle_event(event).await?,
                _ = backup.tick() => self.backup().await?,
                _ = housekeeping.tick() => {
                    if is_shutdown_requested() {
                        self.stop().await?;
                        break RunExit::Interrupted;
                    }
                    self.refresh_status().await?;

                    match self.config.follow_poll {
                        Some(poll) => {
                            if last_poll.elapsed() >= poll {
                                last_poll = tokio::time::Instant::now();
                                while self.dispatch().await? {}
                            }
                        }
                        None => {
                            if self.is_caught_up().await? {
                                self.backup().await?;
                                break RunExit::CaughtUp;
                            }
                        }
                    }
                }
            }
        };

        while self.inserts.join_next().await.is_some() {}
        if exit == RunExit::CaughtUp {
            log::info!("{}: caught up", self.dataset());
        }
        Ok(exit)
    }

    async fn is_caught_up(&self) -> Result<bool, ControllerError> {
        if self.busy_workers() > 0 {
            return Ok(false);
        }
        Ok(self.queue.get_queue_length(self.dataset()).await? == 0)
    }

    async fn refresh_status(&self) -> Result<(), ControllerError> {
        let Some(bar) = &self.status else {
            return Ok(());
        };
        let queued = self.queue.get_queue_length(self.dataset()).await?;
        bar.set_message(format!(
            "queue {} | {}/{} busy | {}",
            fmt_num(queued as u64),
            self.busy_workers(),
            self.config.workers,
            self.stats.snapshot().status()
        ));
        Ok(())
    }

    /// Wait for every worker to reach an I/O boundary, then checkpoint
    async fn stop(&mut self) -> Result<(), ControllerError> {
        log::info!(
            "{}: shutdown requested, waiting for {} workers",
            self.dataset(),
            self.busy_workers()
        );
        for slot in &mut self.slots {
            if let Some(task) = slot.task.take() {
                if let Err(e) = task.await {
                    log::error!("worker {} task failed: {e}", slot.worker.id());
                }
            }
        }
        while let Ok(event) = self.events_rx.try_recv() {
            if let WorkerEvent::Released { worker, .. } = event {
                self.slots[worker].state = SlotState::Idle;
            }
        }
        self.backup().await
    }
}

/// Round up to the next whole second; whole seconds are unchanged
fn ceil_second(at: DateTime<Utc>) -> DateTime<Utc> {
    match at.duration_trunc(TimeDelta::seconds(1)) {
        Ok(floor) if floor == at => at,
        Ok(floor) => floor + TimeDelta::seconds(1),
        Err(_) => at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn ceil_second_rounds_up_fractions() {
        let whole = Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(ceil_second(whole), whole);
        let fraction = whole + TimeDelta::milliseconds(250);
        assert_eq!(ceil_second(fraction), whole + TimeDelta::seconds(1));
    }

    #[test]
    fn event_accessors() {
        let event = WorkerEvent::Idle { worker: 3 };
        assert_eq!(event.worker(), 3);
        assert_eq!(event.kind(), "idle");
    }
}
