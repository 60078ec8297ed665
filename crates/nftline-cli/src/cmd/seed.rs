//! `nftline seed` - push an interval onto the durable queue
//!
//! A running `nftline run --follow` picks the block up on its next poll;
//! otherwise the next run drains it.

use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::Args;
use nftline_queue::{Block, Dataset};

use crate::config::{Config, parse_dataset};

#[derive(Args, Debug)]
pub struct SeedArgs {
    /// Dataset the block belongs to
    #[arg(short, long, value_parser = parse_dataset)]
    pub dataset: Option<Dataset>,

    /// Interval start, inclusive (RFC 3339 or YYYY-MM-DD)
    #[arg(long, value_parser = parse_time)]
    pub start: DateTime<Utc>,

    /// Interval end, exclusive (RFC 3339 or YYYY-MM-DD); defaults to now
    #[arg(long, value_parser = parse_time)]
    pub end: Option<DateTime<Utc>>,

    /// Only ingest records of this contract
    #[arg(long)]
    pub contract: Option<String>,

    /// Queue directory
    #[arg(long)]
    pub queue_dir: Option<PathBuf>,
}

pub fn run(args: SeedArgs, config: &Config) -> Result<()> {
    let dataset = match args.dataset {
        Some(dataset) => dataset,
        None => config.scheduler.dataset()?,
    };
    let contract = args
        .contract
        .or_else(|| config.scheduler.contract.clone())
        .unwrap_or_default();
    let block = Block::new(
        dataset,
        args.start,
        args.end.unwrap_or_else(Utc::now),
        contract,
    )?;

    super::runtime()?.block_on(async {
        let queue = super::open_queue(config, args.queue_dir.as_deref())?;
        queue.insert_block(&block).await?;
        let queued = queue.get_queue_length(dataset).await?;
        log::info!("Queued {block} ({queued} pending)");
        Ok::<_, anyhow::Error>(())
    })?;

    eprintln!("queued {block}");
    Ok(())
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(at) = DateTime::parse_from_rfc3339(s) {
        return Ok(at.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map(|day| day.and_time(NaiveTime::MIN).and_utc())
        .map_err(|e| format!("Invalid time {s:?} (RFC 3339 or YYYY-MM-DD): {e}"))
}
