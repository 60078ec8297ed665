//! Block and dataset value types

use std::fmt;

use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::QueueError;

/// Marketplace record kinds ingested by nftline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dataset {
    /// Executed trades
    Sales,
    /// Listings (sell-side orders)
    Asks,
    /// Offers (buy-side orders)
    Bids,
}

impl Dataset {
    /// Parse CLI/config string into enum (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sales" => Some(Self::Sales),
            "asks" => Some(Self::Asks),
            "bids" => Some(Self::Bids),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sales => "sales",
            Self::Asks => "asks",
            Self::Bids => "bids",
        }
    }

    /// API path appended to the chain base URL
    pub fn api_path(self) -> &'static str {
        match self {
            Self::Sales => "/sales/v6",
            Self::Asks => "/orders/asks/v5",
            Self::Bids => "/orders/bids/v6",
        }
    }

    /// Field holding the record array in a response body
    pub fn root_name(self) -> &'static str {
        match self {
            Self::Sales => "sales",
            Self::Asks | Self::Bids => "orders",
        }
    }

    /// Sort key parameter; sales and orders spell it differently
    pub fn sort_param(self) -> (&'static str, &'static str) {
        match self {
            Self::Sales => ("orderBy", "updated_at"),
            Self::Asks | Self::Bids => ("sortBy", "updatedAt"),
        }
    }

    /// List all datasets
    pub fn all() -> &'static [Dataset] {
        &[Self::Sales, Self::Asks, Self::Bids]
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque unique block identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(Uuid);

impl BlockId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First 8 hex digits, enough to tell blocks apart in logs
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for BlockId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One unit of ingestion work: `[start, end)` of one dataset.
///
/// Boundaries are whole seconds because the marketplace API filters by unix
/// seconds. `start < end` holds for every constructed block, including ones
/// read back from a queue file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawBlock", rename_all = "camelCase")]
pub struct Block {
    id: BlockId,
    dataset: Dataset,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    contract: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBlock {
    id: BlockId,
    dataset: Dataset,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    #[serde(default)]
    contract: String,
}

impl TryFrom<RawBlock> for Block {
    type Error = QueueError;

    fn try_from(raw: RawBlock) -> Result<Self, Self::Error> {
        Self::with_id(raw.id, raw.dataset, raw.start_date, raw.end_date, raw.contract)
    }
}

impl Block {
    /// Create a block with a fresh id; sub-second precision is truncated.
    ///
    /// An empty `contract` means unfiltered.
    pub fn new(
        dataset: Dataset,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        contract: impl Into<String>,
    ) -> Result<Self, QueueError> {
        Self::with_id(BlockId::new(), dataset, start, end, contract.into())
    }

    fn with_id(
        id: BlockId,
        dataset: Dataset,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        contract: String,
    ) -> Result<Self, QueueError> {
        let start = start.trunc_subsecs(0);
        let end = end.trunc_subsecs(0);
        if start >= end {
            return Err(QueueError::InvalidInterval { start, end });
        }
        Ok(Self {
            id,
            dataset,
            start_date: start,
            end_date: end,
            contract,
        })
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn dataset(&self) -> Dataset {
        self.dataset
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start_date
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end_date
    }

    /// Contract filter, `None` when unfiltered
    pub fn contract(&self) -> Option<&str> {
        (!self.contract.is_empty()).then_some(self.contract.as_str())
    }

    pub fn span(&self) -> TimeDelta {
        self.end_date - self.start_date
    }

    /// Midpoint rounded down to a whole second
    pub fn midpoint(&self) -> DateTime<Utc> {
        self.start_date + TimeDelta::seconds(self.span().num_seconds() / 2)
    }

    /// Bisect into `[start, mid)` and `[mid, end)`.
    ///
    /// The left half keeps this block's id (the worker keeps narrowing it),
    /// the right half is a new block. Returns `None` when either half would
    /// be shorter than `min_span` (never less than one second).
    pub fn split_at_midpoint(&self, min_span: TimeDelta) -> Option<(Block, Block)> {
        let min_span = min_span.max(TimeDelta::seconds(1));
        let mid = self.midpoint();
        if mid - self.start_date < min_span || self.end_date - mid < min_span {
            return None;
        }
        let left = Block {
            end_date: mid,
            ..self.clone()
        };
        let right = Block {
            id: BlockId::new(),
            start_date: mid,
            ..self.clone()
        };
        Some((left, right))
    }

    /// Whether `ts` falls inside `[start, end)`
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start_date <= ts && ts < self.end_date
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{} {} → {}]",
            self.dataset,
            self.id.short(),
            self.start_date.format("%Y-%m-%dT%H:%M:%SZ"),
            self.end_date.format("%Y-%m-%dT%H:%M:%SZ")
        )?;
        if let Some(contract) = self.contract() {
            write!(f, " {contract}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn block(start: i64, end: i64) -> Block {
        Block::new(Dataset::Sales, ts(start), ts(end), "").unwrap()
    }

    #[test]
    fn dataset_from_name() {
        assert_eq!(Dataset::from_name("sales"), Some(Dataset::Sales));
        assert_eq!(Dataset::from_name("ASKS"), Some(Dataset::Asks));
        assert_eq!(Dataset::from_name("bids"), Some(Dataset::Bids));
        assert_eq!(Dataset::from_name("orders"), None);
        assert_eq!(Dataset::all().len(), 3);
    }

    #[test]
    fn dataset_static_mapping() {
        assert_eq!(Dataset::Sales.root_name(), "sales");
        assert_eq!(Dataset::Asks.root_name(), "orders");
        assert_eq!(Dataset::Sales.sort_param(), ("orderBy", "updated_at"));
        assert_eq!(Dataset::Bids.sort_param(), ("sortBy", "updatedAt"));
    }

    #[test]
    fn empty_interval_rejected() {
        assert!(Block::new(Dataset::Sales, ts(10), ts(10), "").is_err());
        assert!(Block::new(Dataset::Sales, ts(11), ts(10), "").is_err());
    }

    #[test]
    fn subsecond_interval_rejected_after_truncation() {
        let start = ts(10);
        let end = start + TimeDelta::milliseconds(900);
        assert!(Block::new(Dataset::Sales, start, end, "").is_err());
    }

    #[test]
    fn contract_empty_means_unfiltered() {
        assert_eq!(block(0, 10).contract(), None);
        let filtered = Block::new(Dataset::Asks, ts(0), ts(10), "0xabc").unwrap();
        assert_eq!(filtered.contract(), Some("0xabc"));
    }

    #[test]
    fn split_covers_interval_exactly() {
        let b = block(1_000, 2_001);
        let (left, right) = b.split_at_midpoint(TimeDelta::seconds(1)).unwrap();
        assert_eq!(left.start(), b.start());
        assert_eq!(left.end(), right.start());
        assert_eq!(right.end(), b.end());
        assert_eq!(left.end(), ts(1_500));
        assert_eq!(left.id(), b.id());
        assert_ne!(right.id(), b.id());
    }

    #[test]
    fn repeated_splits_preserve_coverage() {
        // Bisect the left half until it can no longer split, collecting siblings
        let original = block(0, 86_400);
        let mut current = original.clone();
        let mut pieces = Vec::new();
        let mut steps = 0;
        while let Some((left, right)) = current.split_at_midpoint(TimeDelta::seconds(1)) {
            pieces.push(right);
            current = left;
            steps += 1;
        }
        pieces.push(current);
        assert!(steps <= 17, "bisection took {steps} steps");

        pieces.sort_by_key(|b| b.start());
        assert_eq!(pieces.first().unwrap().start(), original.start());
        assert_eq!(pieces.last().unwrap().end(), original.end());
        for pair in pieces.windows(2) {
            assert_eq!(pair[0].end(), pair[1].start(), "gap or overlap");
        }
    }

    #[test]
    fn split_refused_below_min_span() {
        assert!(block(0, 1).split_at_midpoint(TimeDelta::seconds(1)).is_none());
        assert!(block(0, 2).split_at_midpoint(TimeDelta::seconds(1)).is_some());
        assert!(block(0, 100).split_at_midpoint(TimeDelta::seconds(60)).is_none());
        // min_span below one second is clamped
        assert!(block(0, 1).split_at_midpoint(TimeDelta::zero()).is_none());
    }

    #[test]
    fn serde_roundtrip_validates() {
        let b = Block::new(Dataset::Bids, ts(0), ts(60), "0xdef").unwrap();
        let json = serde_json::to_string(&b).unwrap();
        assert!(json.contains("\"startDate\""));
        let back: Block = serde_json::from_str(&json).unwrap();
        assert_eq!(back, b);

        let bad = json.replace("1970-01-01T00:01:00Z", "1970-01-01T00:00:00Z");
        assert!(serde_json::from_str::<Block>(&bad).is_err());
    }

    #[test]
    fn contains_is_half_open() {
        let b = block(10, 20);
        assert!(b.contains(ts(10)));
        assert!(b.contains(ts(19)));
        assert!(!b.contains(ts(20)));
    }
}
