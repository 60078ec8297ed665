//! nftline Core - Common infrastructure for marketplace ingestion
//!
//! This crate provides the pieces every nftline component shares:
//! an HTTP client with status classification, retry helpers, logging,
//! progress display and graceful shutdown.

pub mod http;
pub mod logging;
pub mod progress;
pub mod retry;
pub mod shutdown;

// Re-exports for convenience
pub use http::{HttpError, HttpSettings, http_client};
pub use logging::{IndicatifLogger, LogOptions, init_logging};
pub use progress::{ProgressContext, SharedProgress, fmt_num};
pub use retry::{RetryPolicy, Retryable, backoff_duration, retry_forever};
pub use shutdown::{install_signal_handlers, is_shutdown_requested, request_shutdown};
