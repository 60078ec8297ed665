//! When is an interval too dense to drain in one cursor sweep?
//!
//! The two partition probes each return one page from opposite ends of the
//! block. If neither page was truncated, the block holds fewer records than
//! two pages and is trivially drainable. Otherwise the pages tell us how much
//! time a page's worth of records covers at each end, and we extrapolate that
//! rate over the whole block.

use chrono::{DateTime, TimeDelta, Utc};
use nftline_queue::Block;

use crate::api::Page;
use crate::record::updated_at_of;

/// 20 full pages
pub const DEFAULT_MAX_RECORDS_PER_BLOCK: u64 = 20_000;

/// Split / drain decision rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DensityPolicy {
    /// Projected record count above which a truncated block is bisected
    pub max_records_per_block: u64,
    /// Smallest half a split may produce
    pub min_split: TimeDelta,
}

impl Default for DensityPolicy {
    fn default() -> Self {
        Self {
            max_records_per_block: DEFAULT_MAX_RECORDS_PER_BLOCK,
            min_split: TimeDelta::seconds(1),
        }
    }
}

/// What the ascending + descending probe pages revealed about a block
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeSummary {
    pub records: usize,
    /// At least one probe page carried a continuation
    pub truncated: bool,
    /// Time covered by the records the probes returned
    pub covered: TimeDelta,
    pub span: TimeDelta,
    /// Most recent `updatedAt` across both pages
    pub newest: Option<DateTime<Utc>>,
}

impl ProbeSummary {
    pub fn from_pages(block: &Block, asc: &Page, desc: &Page) -> Self {
        let span = block.span();
        let truncated = asc.continuation.is_some() || desc.continuation.is_some();

        let newest = asc
            .records
            .iter()
            .chain(&desc.records)
            .filter_map(updated_at_of)
            .max();

        if !truncated {
            // Each page holds the whole block
            return Self {
                records: asc.records.len().max(desc.records.len()),
                truncated,
                covered: span,
                span,
                newest,
            };
        }

        let head = asc
            .records
            .last()
            .and_then(updated_at_of)
            .map_or(TimeDelta::zero(), |last| last - block.start());
        let tail = desc
            .records
            .last()
            .and_then(updated_at_of)
            .map_or(TimeDelta::zero(), |last| block.end() - last);
        let covered = (head.max(TimeDelta::zero()) + tail.max(TimeDelta::zero())).min(span);

        Self {
            records: asc.records.len() + desc.records.len(),
            truncated,
            covered,
            span,
            newest,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    /// Records expected across the whole block at the observed rate
    pub fn projected(&self) -> f64 {
        if !self.truncated {
            return self.records as f64;
        }
        let covered = self.covered.num_milliseconds();
        if covered <= 0 {
            return f64::INFINITY;
        }
        self.records as f64 * self.span.num_milliseconds() as f64 / covered as f64
    }
}

impl DensityPolicy {
    pub fn is_dense(&self, probe: &ProbeSummary) -> bool {
        probe.truncated && probe.projected() > self.max_records_per_block as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use nftline_queue::Dataset;
    use serde_json::{Value, json};

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn rec(secs: i64) -> Value {
        json!({"id": secs.to_string(), "updatedAt": ts(secs).to_rfc3339()})
    }

    fn page(secs: impl IntoIterator<Item = i64>, more: bool) -> Page {
        Page {
            records: secs.into_iter().map(rec).collect(),
            continuation: more.then(|| "next".to_string()),
        }
    }

    fn block(start: i64, end: i64) -> Block {
        Block::new(Dataset::Sales, ts(start), ts(end), "").unwrap()
    }

    #[test]
    fn untruncated_is_never_dense() {
        let b = block(0, 1_000);
        let probe = ProbeSummary::from_pages(&b, &page(0..10, false), &page((0..10).rev(), false));
        assert_eq!(probe.records, 10);
        assert_eq!(probe.newest, Some(ts(9)));
        assert!(!DensityPolicy::default().is_dense(&probe));
    }

    #[test]
    fn extrapolates_over_span() {
        // 1000 records in the first 100s and 1000 in the last 100s of a 10_000s block
        let b = block(0, 10_000);
        let asc = page((0..1000).map(|i| i / 10), true);
        let desc = page((0..1000).map(|i| 9_999 - i / 10), true);
        let probe = ProbeSummary::from_pages(&b, &asc, &desc);
        assert_eq!(probe.records, 2000);
        // head covers 99s, tail covers 100s
        assert_eq!(probe.covered, TimeDelta::seconds(199));
        assert!(probe.projected() > 100_000.0);
        assert!(DensityPolicy::default().is_dense(&probe));
    }

    #[test]
    fn sparse_truncated_block_drains() {
        // A page reaches across most of the block: projection stays small
        let b = block(0, 10_000);
        let asc = page((0..1000).map(|i| i * 5), true);
        let desc = page((0..1000).map(|i| 9_999 - i * 5), true);
        let probe = ProbeSummary::from_pages(&b, &asc, &desc);
        assert_eq!(probe.covered, TimeDelta::seconds(9_991));
        assert!(probe.projected() < 2_100.0);
        assert!(!DensityPolicy::default().is_dense(&probe));
    }

    #[test]
    fn bursts_at_both_edges_are_dense() {
        let b = block(0, 60);
        let probe = ProbeSummary::from_pages(&b, &page(vec![0; 1000], true), &page(vec![59; 1000], true));
        assert_eq!(probe.covered, TimeDelta::seconds(1));
        assert_eq!(probe.projected(), 120_000.0);
        assert!(DensityPolicy::default().is_dense(&probe));
    }

    #[test]
    fn empty_probe() {
        let b = block(0, 60);
        let probe = ProbeSummary::from_pages(&b, &Page::default(), &Page::default());
        assert!(probe.is_empty());
        assert_eq!(probe.newest, None);
        assert!(!DensityPolicy::default().is_dense(&probe));
    }
}
