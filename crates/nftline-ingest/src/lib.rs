//! nftline ingestion scheduler
//!
//! Backfills a marketplace dataset by recursively bisecting time intervals
//! until each one is sparse enough to page through with a cursor.
//!
//! - [`Controller`] owns the worker pool and the durable block queue
//! - [`Worker`] runs one block: partition, then drain
//! - [`ReservoirClient`] talks to the marketplace API
//! - [`RecordSink`] persists parsed records idempotently

pub mod api;
pub mod clock;
pub mod config;
pub mod controller;
pub mod density;
pub mod record;
pub mod runner;
pub mod sink;
pub mod stats;
pub mod worker;

pub use api::{Chain, Fetch, MarketApi, Page, Query, ReservoirClient, SortDirection, normalize};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ConfigError, SchedulerConfig};
pub use controller::{Controller, ControllerError, RunExit, WorkerEvent};
pub use density::{DensityPolicy, ProbeSummary};
pub use record::{Record, RecordError, Row};
pub use runner::{RunSummary, run};
pub use sink::{JsonlSink, MemorySink, RecordSink};
pub use stats::{IngestStats, StatsSnapshot};
pub use worker::{FrontierPolicy, Worker, WorkerKind, WorkerOutcome, WorkerPorts};
