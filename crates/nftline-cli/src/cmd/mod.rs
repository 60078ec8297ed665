//! Subcommands

pub mod run;
pub mod seed;
pub mod status;

use std::sync::Arc;

use anyhow::{Context, Result};
use nftline_queue::{DurableQueue, FileQueue};

use crate::config::Config;

/// Multi-threaded runtime for one subcommand
fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")
}

/// Durable queue in the configured (or overridden) directory
fn open_queue(config: &Config, dir: Option<&std::path::Path>) -> Result<DurableQueue> {
    let dir = dir.unwrap_or(&config.queue.dir);
    let store = FileQueue::open(dir)
        .with_context(|| format!("failed to open queue directory {}", dir.display()))?;
    Ok(DurableQueue::new(Arc::new(store)))
}
