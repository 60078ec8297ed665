//! `nftline status` - queue, checkpoint and storage overview

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use nftline_core::fmt_num;
use nftline_ingest::{JsonlSink, RecordSink};
use nftline_queue::{Dataset, Phase};

use crate::config::{Config, parse_dataset};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Only show this dataset
    #[arg(short, long, value_parser = parse_dataset)]
    pub dataset: Option<Dataset>,

    /// List every pending block
    #[arg(long)]
    pub blocks: bool,

    /// Queue directory
    #[arg(long)]
    pub queue_dir: Option<PathBuf>,

    /// Output directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

pub fn run(args: StatusArgs, config: &Config) -> Result<()> {
    let datasets: Vec<Dataset> = match args.dataset {
        Some(dataset) => vec![dataset],
        None => Dataset::all().to_vec(),
    };
    let output_dir = args.output.unwrap_or_else(|| config.output.dir.clone());

    super::runtime()?.block_on(async {
        let queue = super::open_queue(config, args.queue_dir.as_deref())?;
        queue.load_backup().await?;
        let sink = JsonlSink::open(&output_dir)
            .with_context(|| format!("failed to open output directory {}", output_dir.display()))?;

        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                Cell::new("Dataset").fg(Color::Cyan),
                Cell::new("Queued").fg(Color::Cyan),
                Cell::new("Next block").fg(Color::Cyan),
                Cell::new("Checkpoint").fg(Color::Cyan),
                Cell::new("Stored").fg(Color::Cyan),
            ]);

        let mut pending = Vec::new();
        for &dataset in &datasets {
            let blocks = queue.get_all_blocks(dataset).await?;
            let next = blocks
                .first()
                .map_or_else(|| "-".to_string(), ToString::to_string);
            let checkpoint = match queue.get_backup(dataset) {
                Some(cp) => {
                    let draining = cp
                        .workers
                        .iter()
                        .filter(|w| w.phase == Phase::Draining)
                        .count();
                    format!(
                        "{} ({} workers, {draining} draining)",
                        cp.taken_at.format("%Y-%m-%d %H:%M:%S"),
                        cp.workers.len()
                    )
                }
                None => "-".to_string(),
            };
            table.add_row(vec![
                Cell::new(dataset),
                Cell::new(fmt_num(blocks.len() as u64)),
                Cell::new(next),
                Cell::new(checkpoint),
                Cell::new(fmt_num(sink.count(dataset).await as u64)),
            ]);
            pending.extend(blocks);
        }
        eprintln!("\n{table}");

        if args.blocks && !pending.is_empty() {
            let mut list = Table::new();
            list.load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec![
                    Cell::new("Block").fg(Color::Cyan),
                    Cell::new("Dataset").fg(Color::Cyan),
                    Cell::new("Start").fg(Color::Cyan),
                    Cell::new("End").fg(Color::Cyan),
                    Cell::new("Contract").fg(Color::Cyan),
                ]);
            for block in &pending {
                list.add_row(vec![
                    Cell::new(block.id().short()),
                    Cell::new(block.dataset()),
                    Cell::new(block.start().to_rfc3339()),
                    Cell::new(block.end().to_rfc3339()),
                    Cell::new(block.contract().unwrap_or("-")),
                ]);
            }
            eprintln!("{list}");
        }
        Ok::<_, anyhow::Error>(())
    })
}
