//! Marketplace API client
//!
//! Every request is a single `GET {base}{path}?{query}` returning one page
//! of at most [`PAGE_LIMIT`] records plus an optional continuation cursor.
//! [`ReservoirClient::request`] never fails: transport errors are retried
//! in place, and every HTTP status is handed back for the caller to judge.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nftline_core::{HttpError, is_shutdown_requested};
use nftline_queue::{Block, Dataset};
use serde_json::Value;

/// Records per page requested from the API (the API maximum)
pub const PAGE_LIMIT: u32 = 1000;

/// Pause between attempts when a request never produced a response
pub const DEFAULT_TRANSPORT_PAUSE: Duration = Duration::from_millis(250);

/// Chains served by the marketplace API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chain {
    Mainnet,
    Polygon,
    Base,
    Arbitrum,
    Optimism,
    Sepolia,
}

impl Chain {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "mainnet" | "ethereum" => Some(Self::Mainnet),
            "polygon" => Some(Self::Polygon),
            "base" => Some(Self::Base),
            "arbitrum" => Some(Self::Arbitrum),
            "optimism" => Some(Self::Optimism),
            "sepolia" => Some(Self::Sepolia),
            _ => None,
        }
    }

    pub fn base_url(self) -> &'static str {
        match self {
            Self::Mainnet => "https://api.reservoir.tools",
            Self::Polygon => "https://api-polygon.reservoir.tools",
            Self::Base => "https://api-base.reservoir.tools",
            Self::Arbitrum => "https://api-arbitrum.reservoir.tools",
            Self::Optimism => "https://api-optimism.reservoir.tools",
            Self::Sepolia => "https://api-sepolia.reservoir.tools",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// Caller-supplied part of one page request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub sort: SortDirection,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub contract: Option<String>,
    pub continuation: Option<String>,
}

impl Query {
    /// Unbounded single-page probe over the whole dataset
    pub fn probe(sort: SortDirection, contract: Option<&str>) -> Self {
        Self {
            sort,
            start: None,
            end: None,
            contract: contract.map(str::to_string),
            continuation: None,
        }
    }

    /// Page over a block's interval and contract filter
    pub fn for_block(block: &Block, sort: SortDirection) -> Self {
        Self {
            sort,
            start: Some(block.start()),
            end: Some(block.end()),
            contract: block.contract().map(str::to_string),
            continuation: None,
        }
    }

    pub fn with_continuation(mut self, continuation: Option<String>) -> Self {
        self.continuation = continuation;
        self
    }

    /// Parameters in wire order; timestamps are unix seconds
    pub fn parameters(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::with_capacity(5);
        if let Some(c) = &self.continuation {
            params.push(("continuation", c.clone()));
        }
        if let Some(start) = self.start {
            params.push(("startTimestamp", start.timestamp().to_string()));
        }
        if let Some(end) = self.end {
            params.push(("endTimestamp", end.timestamp().to_string()));
        }
        if let Some(contract) = &self.contract {
            params.push(("contract", contract.clone()));
        }
        params.push(("sortDirection", self.sort.as_str().to_string()));
        params
    }
}

/// Build the query string: page limit, metadata flag, dataset sort key,
/// then every caller parameter in order.
pub fn normalize(dataset: Dataset, params: &[(&str, String)]) -> String {
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    query.append_pair("limit", &PAGE_LIMIT.to_string());
    query.append_pair("includeCriteriaMetadata", "true");
    let (sort_key, sort_value) = dataset.sort_param();
    query.append_pair(sort_key, sort_value);
    for (key, value) in params {
        query.append_pair(key, value);
    }
    query.finish()
}

/// One successful page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub records: Vec<Value>,
    pub continuation: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum PageError {
    #[error("invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),
    #[error("response has no `{0}` array")]
    MissingRoot(&'static str),
}

impl Page {
    /// Decode `{ <root>: [...], continuation?: string }`
    pub fn decode(dataset: Dataset, body: &[u8]) -> Result<Self, PageError> {
        let mut object: serde_json::Map<String, Value> = serde_json::from_slice(body)?;
        let records = match object.remove(dataset.root_name()) {
            Some(Value::Array(records)) => records,
            _ => return Err(PageError::MissingRoot(dataset.root_name())),
        };
        let continuation = match object.remove("continuation") {
            Some(Value::String(c)) if !c.is_empty() => Some(c),
            _ => None,
        };
        Ok(Self {
            records,
            continuation,
        })
    }
}

/// Outcome of one page request
#[derive(Debug, Clone, PartialEq)]
pub enum Fetch {
    Page(Page),
    /// Non-success status, or a 200 whose body could not be decoded
    Failed { status: u16 },
    /// Shutdown was requested while the request was being retried
    Interrupted,
}

/// Page source the scheduler depends on
#[async_trait]
pub trait MarketApi: Send + Sync {
    async fn fetch(&self, dataset: Dataset, query: &Query) -> Fetch;
}

/// HTTP client for the Reservoir marketplace API
#[derive(Debug, Clone)]
pub struct ReservoirClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    system_id: String,
    transport_pause: Duration,
}

impl ReservoirClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
        system_id: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            system_id: system_id.into(),
            transport_pause: DEFAULT_TRANSPORT_PAUSE,
        }
    }

    pub fn with_transport_pause(mut self, pause: Duration) -> Self {
        self.transport_pause = pause;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Issue `GET {base}{path}?{parameters}` until a response arrives
    pub async fn request(&self, dataset: Dataset, parameters: &str) -> Fetch {
        let url = format!("{}{}?{}", self.base_url, dataset.api_path(), parameters);
        let mut attempt = 0u64;
        loop {
            if is_shutdown_requested() {
                return Fetch::Interrupted;
            }
            attempt += 1;

            let mut request = self.http.get(&url).header("x-system", &self.system_id);
            if let Some(key) = &self.api_key {
                request = request.header("X-API-KEY", key);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    let err = HttpError::from_reqwest(&e);
                    log::warn!("{dataset}: request attempt {attempt} failed: {err}");
                    tokio::time::sleep(self.transport_pause).await;
                    continue;
                }
            };

            let status = response.status().as_u16();
            if status != 200 {
                log::debug!("{dataset}: HTTP {status}");
                return Fetch::Failed { status };
            }

            let body = match response.bytes().await {
                Ok(body) => body,
                Err(e) => {
                    let err = HttpError::from_reqwest(&e);
                    log::warn!("{dataset}: body read attempt {attempt} failed: {err}");
                    tokio::time::sleep(self.transport_pause).await;
                    continue;
                }
            };

            return match Page::decode(dataset, &body) {
                Ok(page) => Fetch::Page(page),
                Err(e) => {
                    log::warn!("{dataset}: undecodable page: {e}");
                    Fetch::Failed { status }
                }
            };
        }
    }
}

#[async_trait]
impl MarketApi for ReservoirClient {
    async fn fetch(&self, dataset: Dataset, query: &Query) -> Fetch {
        let parameters = normalize(dataset, &query.parameters());
        self.request(dataset, &parameters).await
    }
}
