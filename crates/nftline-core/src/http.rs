//! HTTP client construction and error classification.
//!
//! The marketplace API is plain JSON over HTTPS. Transport failures and
//! non-success statuses are kept apart because callers retry them
//! differently: a rate-limited response waits, everything else goes again.

use std::time::Duration;

/// HTTP status the marketplace API returns when a key exceeds its quota
pub const STATUS_RATE_LIMITED: u16 = 429;

/// Timeouts and pooling for the shared client
#[derive(Debug, Clone, Copy)]
pub struct HttpSettings {
    pub connect_timeout: Duration,
    /// Whole-request timeout; a stalled page counts as a transport failure
    pub request_timeout: Duration,
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
            pool_max_idle_per_host: 16,
        }
    }
}

/// Build an async HTTP client with connection pooling.
///
/// One client is shared by every worker; reqwest clones are cheap handles
/// onto the same pool.
pub fn http_client(settings: &HttpSettings) -> Result<reqwest::Client, HttpError> {
    reqwest::Client::builder()
        .connect_timeout(settings.connect_timeout)
        .timeout(settings.request_timeout)
        .pool_max_idle_per_host(settings.pool_max_idle_per_host)
        .build()
        .map_err(|e| HttpError::from_reqwest(&e))
}

/// Error from a single HTTP exchange
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// Server answered with a non-success status
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
    /// Request never produced a response (DNS, connect, timeout, reset)
    #[error("HTTP transport error: {0}")]
    Transport(String),
}

impl HttpError {
    /// Create from a reqwest error without leaking the request URL
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        // The URL carries the API query string; keep it out of logs
        let mut message = e.to_string();
        if let Some(url) = e.url() {
            message = message.replace(url.as_str(), "<url>");
        }
        match e.status() {
            Some(status) => Self::Status {
                status: status.as_u16(),
                message,
            },
            None => Self::Transport(message),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport(_) => None,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status() == Some(STATUS_RATE_LIMITED)
    }

    /// Client errors other than 408/429 will not improve by asking again
    pub fn is_retryable(&self) -> bool {
        match self.status() {
            None => true,
            Some(408 | STATUS_RATE_LIMITED) => true,
            Some(s) => !(400..500).contains(&s),
        }
    }
}
