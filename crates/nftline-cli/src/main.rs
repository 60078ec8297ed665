//! nftline - marketplace sale and order ingestion
//!
//! Backfills Reservoir sales, asks and bids into local JSON-lines storage,
//! keeping pending work in a durable queue so runs can be interrupted and
//! resumed.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod cmd;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "nftline")]
#[command(about = "Marketplace sale and order ingestion")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "debug")]
    quiet: bool,

    /// Config file path (default: ./nftline.toml or ~/.config/nftline/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Backfill one dataset until caught up (or keep following)
    Run(cmd::run::RunArgs),
    /// Show queue, checkpoint and storage state
    Status(cmd::status::StatusArgs),
    /// Queue an interval for (re-)ingestion
    Seed(cmd::seed::SeedArgs),
    /// Show current configuration
    Config,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Progress context (TTY auto-detect)
    let progress = Arc::new(nftline_core::ProgressContext::new());

    // Logging:
    //   TTY:     quiet (warn) unless --debug: the status line shows activity
    //   non-TTY: info unless --debug or --quiet: logs are the only progress indicator
    let is_tty = progress.is_tty();
    let multi = if is_tty { Some(progress.multi()) } else { None };
    let options = nftline_core::LogOptions {
        quiet: cli.quiet || (is_tty && !cli.debug),
        debug: cli.debug,
    };
    nftline_core::init_logging(options, multi);

    let config = if let Some(path) = cli.config {
        Config::from_file(&path)?
    } else {
        Config::load()?
    };

    match cli.command {
        Command::Run(args) => cmd::run::run(args, &config, &progress),
        Command::Status(args) => cmd::status::run(args, &config).map(|()| ExitCode::SUCCESS),
        Command::Seed(args) => cmd::seed::run(args, &config).map(|()| ExitCode::SUCCESS),
        Command::Config => {
            use comfy_table::{
                Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL,
            };

            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec![
                    Cell::new("Setting").fg(Color::Cyan),
                    Cell::new("Value").fg(Color::Cyan),
                ]);

            let base_url = config
                .api
                .base_url()
                .unwrap_or_else(|e| format!("invalid: {e}"));
            let scheduler = &config.scheduler;
            table.add_row(vec!["API base URL", &base_url]);
            table.add_row(vec![
                "API key",
                if config.api.api_key.is_some() {
                    "configured"
                } else {
                    "not set"
                },
            ]);
            table.add_row(vec!["System id", &config.api.system_id]);
            table.add_row(vec!["Dataset", &scheduler.dataset]);
            table.add_row(vec![
                "Contract",
                scheduler.contract.as_deref().unwrap_or("(all)"),
            ]);
            table.add_row(vec![
                "Workers",
                &format!("{} (+{} upkeep)", scheduler.workers, scheduler.upkeepers),
            ]);
            table.add_row(vec![
                "Split above",
                &format!("{} records", scheduler.max_records_per_block),
            ]);
            table.add_row(vec![
                "Retry delay",
                &format!(
                    "{}ms (429), {}ms (other)",
                    scheduler.rate_limit_delay_ms, scheduler.error_delay_ms
                ),
            ]);
            table.add_row(vec!["Frontier", &scheduler.frontier]);
            table.add_row(vec![
                "Backup",
                &format!(
                    "every {}s, restore {}",
                    scheduler.backup_interval_secs,
                    if scheduler.use_backup { "on" } else { "off" }
                ),
            ]);
            table.add_row(vec!["Queue directory", &config.queue.dir.display().to_string()]);
            table.add_row(vec![
                "Output directory",
                &config.output.dir.display().to_string(),
            ]);

            eprintln!("\n{table}");
            Ok(ExitCode::SUCCESS)
        }
    }
}
