//! Run counters shared by the controller and its workers

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use nftline_core::fmt_num;

/// Lock-free counters updated from worker tasks
#[derive(Debug)]
pub struct IngestStats {
    started: Instant,
    pages: AtomicU64,
    failed_requests: AtomicU64,
    records: AtomicU64,
    stored: AtomicU64,
    splits: AtomicU64,
    released: AtomicU64,
}

impl Default for IngestStats {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            pages: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            records: AtomicU64::new(0),
            stored: AtomicU64::new(0),
            splits: AtomicU64::new(0),
            released: AtomicU64::new(0),
        }
    }
}

impl IngestStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(&self) {
        self.pages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failed_request(&self) {
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// `received` records came back from the API, `stored` of them changed storage
    pub fn records(&self, received: usize, stored: usize) {
        self.records.fetch_add(received as u64, Ordering::Relaxed);
        self.stored.fetch_add(stored as u64, Ordering::Relaxed);
    }

    pub fn split(&self) {
        self.splits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn released(&self) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            pages: self.pages.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            records: self.records.load(Ordering::Relaxed),
            stored: self.stored.load(Ordering::Relaxed),
            splits: self.splits.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            elapsed: self.started.elapsed(),
        }
    }
}

/// Point-in-time copy of [`IngestStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub pages: u64,
    pub failed_requests: u64,
    pub records: u64,
    pub stored: u64,
    pub splits: u64,
    pub released: u64,
    pub elapsed: Duration,
}

impl StatsSnapshot {
    /// Compact form for the live status line
    pub fn status(&self) -> String {
        format!(
            "{} pages, {} records, {} splits, {} blocks done",
            fmt_num(self.pages),
            fmt_num(self.records),
            fmt_num(self.splits),
            fmt_num(self.released)
        )
    }

    pub fn log(&self) {
        log::info!(
            "{} pages ({} failed), {} records ({} stored), {} splits, {} blocks [{:.1}s]",
            fmt_num(self.pages),
            fmt_num(self.failed_requests),
            fmt_num(self.records),
            fmt_num(self.stored),
            fmt_num(self.splits),
            fmt_num(self.released),
            self.elapsed.as_secs_f64()
        );
    }

    pub fn format_table(&self) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                Cell::new("Ingestion")
                    .fg(Color::Cyan)
                    .add_attribute(comfy_table::Attribute::Bold),
                Cell::new("Value").fg(Color::Cyan),
            ]);
        let rows = [
            ("Pages fetched", self.pages),
            ("Failed requests", self.failed_requests),
            ("Records received", self.records),
            ("Records stored", self.stored),
            ("Splits", self.splits),
            ("Blocks drained", self.released),
        ];
        for (label, value) in rows {
            table.add_row(vec![Cell::new(label), Cell::new(fmt_num(value))]);
        }
        table.add_row(vec![
            Cell::new("Elapsed"),
            Cell::new(format!("{:.1}s", self.elapsed.as_secs_f64())),
        ]);
        table.to_string()
    }
}
