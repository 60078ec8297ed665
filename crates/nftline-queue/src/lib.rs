//! nftline-queue: Durable block queue and worker checkpoints
//!
//! A [`Block`] is one unit of ingestion work: a half-open time interval of
//! one dataset, optionally filtered to a single contract. Pending blocks
//! live in a per-dataset FIFO that outlives the process, next to a
//! checkpoint of what every worker was doing at the last backup.

pub mod block;
pub mod checkpoint;
pub mod error;
pub mod file;
pub mod memory;
pub mod queue;

pub use block::{Block, BlockId, Dataset};
pub use checkpoint::{Checkpoint, Phase, WorkerCheckpoint};
pub use error::QueueError;
pub use file::FileQueue;
pub use memory::MemoryQueue;
pub use queue::{BlockQueue, DurableQueue};
