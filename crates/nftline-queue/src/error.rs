//! Queue and checkpoint store errors

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use nftline_core::Retryable;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Backing store unreachable or I/O failed; safe to retry
    #[error("queue store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored document cannot be decoded; retrying will not help
    #[error("corrupt queue document {}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid block interval: start {start} is not before end {end}")]
    InvalidInterval {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    /// Background store task panicked or was cancelled
    #[error("queue store task failed: {0}")]
    Task(String),
}

impl QueueError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Io(e) => e.kind() != std::io::ErrorKind::StorageFull,
            Self::Corrupt { .. } | Self::InvalidInterval { .. } => false,
            Self::Task(_) => true,
        }
    }
}

impl Retryable for QueueError {
    fn is_retryable(&self) -> bool {
        QueueError::is_retryable(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    #[test]
    fn io_errors_retryable_except_disk_full() {
        assert!(QueueError::Io(std::io::Error::new(ErrorKind::BrokenPipe, "pipe")).is_retryable());
        assert!(
            !QueueError::Io(std::io::Error::new(ErrorKind::StorageFull, "full")).is_retryable()
        );
    }

    #[test]
    fn corrupt_not_retryable() {
        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = QueueError::Corrupt {
            path: PathBuf::from("sales.queue.json"),
            source,
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("sales.queue.json"));
    }
}
