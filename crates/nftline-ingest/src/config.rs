//! Scheduler settings

use std::time::Duration;

use chrono::TimeDelta;
use nftline_core::RetryPolicy;
use nftline_queue::Dataset;

use crate::density::DensityPolicy;
use crate::worker::FrontierPolicy;

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_PROBE_ATTEMPTS: u32 = 5;
pub const DEFAULT_BACKUP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("at least one backfilling worker is required")]
    NoWorkers,
    #[error("probe_attempts must be at least 1")]
    NoProbeAttempts,
    #[error("max_records_per_block must be positive")]
    ZeroDensityCap,
    #[error("min_split must be at least one second")]
    MinSplitTooSmall,
    #[error("backup interval must be positive")]
    ZeroBackupInterval,
    #[error("follow poll interval must be positive")]
    ZeroFollowPoll,
}

/// Everything the controller needs besides its collaborators
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub dataset: Dataset,
    /// Restrict every block to one contract
    pub contract: Option<String>,
    /// Backfilling workers
    pub workers: usize,
    /// Upkeeping workers (placeholders, never assigned blocks)
    pub upkeepers: usize,
    pub density: DensityPolicy,
    pub retry: RetryPolicy,
    pub frontier: FrontierPolicy,
    /// Tries per startup probe before giving up
    pub probe_attempts: u32,
    pub backup_interval: Duration,
    /// Restore worker progress from the last checkpoint at launch
    pub use_backup: bool,
    /// Keep running once caught up, polling the queue for re-seeded blocks
    pub follow_poll: Option<Duration>,
}

impl SchedulerConfig {
    pub fn new(dataset: Dataset) -> Self {
        Self {
            dataset,
            contract: None,
            workers: DEFAULT_WORKERS,
            upkeepers: 0,
            density: DensityPolicy::default(),
            retry: RetryPolicy::default(),
            frontier: FrontierPolicy::default(),
            probe_attempts: DEFAULT_PROBE_ATTEMPTS,
            backup_interval: DEFAULT_BACKUP_INTERVAL,
            use_backup: true,
            follow_poll: None,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.probe_attempts == 0 {
            return Err(ConfigError::NoProbeAttempts);
        }
        if self.density.max_records_per_block == 0 {
            return Err(ConfigError::ZeroDensityCap);
        }
        if self.density.min_split < TimeDelta::seconds(1) {
            return Err(ConfigError::MinSplitTooSmall);
        }
        if self.backup_interval.is_zero() {
            return Err(ConfigError::ZeroBackupInterval);
        }
        if self.follow_poll.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::ZeroFollowPoll);
        }
        Ok(())
    }

    /// Empty contract strings mean unfiltered
    pub fn contract(&self) -> Option<&str> {
        self.contract.as_deref().filter(|c| !c.is_empty())
    }
}
