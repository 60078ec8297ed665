//! One ingestion run from launch to steady state

use std::sync::Arc;

use anyhow::Context;
use nftline_core::SharedProgress;
use nftline_queue::{Dataset, DurableQueue};

use crate::api::MarketApi;
use crate::clock::SystemClock;
use crate::config::SchedulerConfig;
use crate::controller::{Controller, ControllerError, RunExit};
use crate::sink::RecordSink;
use crate::stats::StatsSnapshot;

/// What a run did
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub dataset: Dataset,
    pub exit: RunExit,
    pub stats: StatsSnapshot,
    /// Blocks still queued when the run ended
    pub queued: usize,
    /// Records in storage when the run ended
    pub stored: usize,
}

impl RunSummary {
    pub fn interrupted(&self) -> bool {
        self.exit == RunExit::Interrupted
    }
}

/// Launch a controller for `config.dataset` and react until caught up or
/// interrupted.
pub async fn run(
    config: SchedulerConfig,
    queue: DurableQueue,
    api: Arc<dyn MarketApi>,
    sink: Arc<dyn RecordSink>,
    progress: &SharedProgress,
) -> anyhow::Result<RunSummary> {
    config.validate().context("invalid scheduler configuration")?;
    let dataset = config.dataset;

    let mut controller = Controller::new(
        config,
        queue.clone(),
        api,
        Arc::clone(&sink),
        Arc::new(SystemClock),
    );
    let status = progress.status_line(dataset.as_str());
    controller.set_status(status.clone());

    let exit = match controller.launch().await {
        Ok(()) => controller
            .run()
            .await
            .with_context(|| format!("{dataset}: ingestion failed"))?,
        Err(ControllerError::Interrupted) => {
            controller.backup().await?;
            RunExit::Interrupted
        }
        Err(e) => return Err(e).with_context(|| format!("{dataset}: launch failed")),
    };
    status.finish_and_clear();

    let stats = controller.stats().snapshot();
    stats.log();
    if !progress.is_tty() {
        log::info!("{dataset}: {exit:?}");
    }

    Ok(RunSummary {
        dataset,
        exit,
        stats,
        queued: queue.get_queue_length(dataset).await?,
        stored: sink.count(dataset).await,
    })
}
