//! Worker progress snapshots written on each backup cycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::block::{Block, Dataset};

/// Where a worker was in the partition/drain cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Partitioning,
    Draining,
}

/// Progress of one live worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCheckpoint {
    pub worker: usize,
    pub block: Block,
    pub phase: Phase,
    /// Cursor of the last page drained; only meaningful while draining
    pub continuation: Option<String>,
}

impl WorkerCheckpoint {
    /// Drain can pick up from the cursor instead of redoing the block
    pub fn is_resumable(&self) -> bool {
        self.phase == Phase::Draining && self.continuation.is_some()
    }
}

/// Per-dataset snapshot, replaced wholesale on every backup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub dataset: Dataset,
    pub taken_at: DateTime<Utc>,
    pub workers: Vec<WorkerCheckpoint>,
}

impl Checkpoint {
    pub fn new(dataset: Dataset, workers: Vec<WorkerCheckpoint>) -> Self {
        Self {
            dataset,
            taken_at: Utc::now(),
            workers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn block() -> Block {
        Block::new(
            Dataset::Sales,
            Utc.timestamp_opt(0, 0).unwrap(),
            Utc.timestamp_opt(3_600, 0).unwrap(),
            "",
        )
        .unwrap()
    }

    #[test]
    fn resumable_only_when_draining_with_cursor() {
        let mut cp = WorkerCheckpoint {
            worker: 0,
            block: block(),
            phase: Phase::Draining,
            continuation: Some("abc".into()),
        };
        assert!(cp.is_resumable());
        cp.continuation = None;
        assert!(!cp.is_resumable());
        cp.phase = Phase::Partitioning;
        cp.continuation = Some("abc".into());
        assert!(!cp.is_resumable());
    }

    #[test]
    fn phase_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&Phase::Partitioning).unwrap(),
            "\"partitioning\""
        );
    }
}
