//! In-process stand-in for the marketplace API

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use nftline_ingest::{Fetch, MarketApi, Page, Query, SortDirection};
use nftline_queue::{Block, Dataset};
use serde_json::json;

pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

pub fn block(dataset: Dataset, start: i64, end: i64) -> Block {
    Block::new(dataset, ts(start), ts(end), "").unwrap()
}

/// Serves a fixed set of records the way the real API pages them: filtered
/// to `[startTimestamp, endTimestamp)`, sorted by `updatedAt` then id,
/// `page_size` per page, with the offset as continuation.
pub struct SimulatedMarket {
    records: Vec<(DateTime<Utc>, String)>,
    page_size: usize,
    failures: Mutex<VecDeque<u16>>,
    fail_forever: Option<u16>,
    stalled: AtomicBool,
    requests: AtomicUsize,
    queries: Mutex<Vec<Query>>,
}

impl SimulatedMarket {
    pub fn new(times: impl IntoIterator<Item = DateTime<Utc>>, page_size: usize) -> Self {
        let records = times
            .into_iter()
            .enumerate()
            .map(|(i, t)| (t, format!("r{i:06}")))
            .collect();
        Self {
            records,
            page_size,
            failures: Mutex::new(VecDeque::new()),
            fail_forever: None,
            stalled: AtomicBool::new(false),
            requests: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Answer the next requests with these statuses before serving data
    pub fn failing_first(self, statuses: &[u16]) -> Self {
        self.failures.lock().unwrap().extend(statuses);
        self
    }

    pub fn failing_forever(mut self, status: u16) -> Self {
        self.fail_forever = Some(status);
        self
    }

    /// Never answer
    pub fn stalled(self) -> Self {
        self.stalled.store(true, Ordering::SeqCst);
        self
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.records.iter().map(|(_, id)| id.clone()).collect();
        ids.sort();
        ids
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<Query> {
        self.queries.lock().unwrap().clone()
    }

    fn serve(&self, query: &Query) -> Page {
        let mut hits: Vec<_> = self
            .records
            .iter()
            .filter(|(t, _)| query.start.map_or(true, |s| *t >= s))
            .filter(|(t, _)| query.end.map_or(true, |e| *t < e))
            .collect();
        hits.sort();
        if query.sort == SortDirection::Desc {
            hits.reverse();
        }
        let offset: usize = query
            .continuation
            .as_deref()
            .map_or(0, |c| c.parse().expect("simulated cursor"));
        let records = hits
            .iter()
            .skip(offset)
            .take(self.page_size)
            .map(|(t, id)| json!({"id": id, "saleId": id, "updatedAt": t.to_rfc3339()}))
            .collect();
        let next = offset + self.page_size;
        Page {
            records,
            continuation: (next < hits.len()).then(|| next.to_string()),
        }
    }
}

#[async_trait]
impl MarketApi for SimulatedMarket {
    async fn fetch(&self, _dataset: Dataset, query: &Query) -> Fetch {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(query.clone());
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        // Let other tasks run between pages, like real I/O would
        tokio::task::yield_now().await;
        if let Some(status) = self.fail_forever {
            return Fetch::Failed { status };
        }
        if let Some(status) = self.failures.lock().unwrap().pop_front() {
            return Fetch::Failed { status };
        }
        Fetch::Page(self.serve(query))
    }
}
