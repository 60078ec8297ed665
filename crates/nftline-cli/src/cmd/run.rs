//! `nftline run` - backfill one dataset

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use nftline_core::{SharedProgress, fmt_num, http_client, install_signal_handlers};
use nftline_ingest::{JsonlSink, ReservoirClient, RunSummary};
use nftline_queue::Dataset;

use crate::config::{Config, parse_dataset};

/// Conventional exit status after SIGINT
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Dataset to ingest (sales, asks, bids)
    #[arg(short, long, value_parser = parse_dataset)]
    pub dataset: Option<Dataset>,

    /// Only ingest records of this contract
    #[arg(long)]
    pub contract: Option<String>,

    /// Number of backfilling workers
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Ignore the last checkpoint
    #[arg(long)]
    pub no_backup: bool,

    /// Keep running after catching up, polling for seeded blocks every N seconds
    #[arg(long, value_name = "SECS")]
    pub follow: Option<u64>,

    /// Queue directory
    #[arg(long)]
    pub queue_dir: Option<PathBuf>,

    /// Output directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

pub fn run(args: RunArgs, config: &Config, progress: &SharedProgress) -> Result<ExitCode> {
    let dataset = match args.dataset {
        Some(dataset) => dataset,
        None => config.scheduler.dataset()?,
    };
    let mut scheduler = config.scheduler.to_scheduler(dataset)?;
    if let Some(contract) = args.contract {
        scheduler.contract = Some(contract);
    }
    if let Some(workers) = args.workers {
        scheduler.workers = workers;
    }
    if args.no_backup {
        scheduler.use_backup = false;
    }
    if let Some(secs) = args.follow {
        scheduler.follow_poll = Some(Duration::from_secs(secs));
    }
    let output_dir = args.output.unwrap_or_else(|| config.output.dir.clone());

    install_signal_handlers().context("failed to install signal handlers")?;

    let http = http_client(&config.api.http_settings()).context("failed to build HTTP client")?;
    let client = ReservoirClient::new(
        http,
        config.api.base_url()?,
        config.api.api_key.clone(),
        config.api.system_id.clone(),
    )
    .with_transport_pause(Duration::from_millis(config.scheduler.transport_retry_ms));
    if config.api.api_key.is_none() {
        log::warn!("No API key configured; requests will be heavily rate limited");
    }

    log::info!("Ingesting {dataset}");
    log::info!("  API: {}", client.base_url());
    log::info!("  Workers: {}", scheduler.workers);
    log::info!("  Output: {}", output_dir.display());

    let runtime = super::runtime()?;
    let summary = runtime.block_on(async {
        let queue = super::open_queue(config, args.queue_dir.as_deref())?;
        let sink = JsonlSink::open(&output_dir)
            .with_context(|| format!("failed to open output directory {}", output_dir.display()))?;
        nftline_ingest::run(scheduler, queue, Arc::new(client), Arc::new(sink), progress).await
    })?;

    print_summary(&summary);
    if summary.interrupted() {
        log::warn!("Interrupted; progress checkpointed, rerun to resume");
        return Ok(ExitCode::from(EXIT_INTERRUPTED));
    }
    Ok(ExitCode::SUCCESS)
}

fn print_summary(summary: &RunSummary) {
    eprintln!("\n{}", summary.stats.format_table());
    eprintln!(
        "{}: {} blocks queued, {} records stored",
        summary.dataset,
        fmt_num(summary.queued as u64),
        fmt_num(summary.stored as u64)
    );
}
