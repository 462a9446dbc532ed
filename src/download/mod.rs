//! Concurrent document downloads.
//!
//! [`DocumentDownloader`] runs a fixed pool of workers draining a bounded
//! queue of [`DownloadTask`]s. A task that keeps failing is recorded in the
//! [`DownloadReport`] returned by [`DocumentDownloader::join`]; it never
//! stops the other tasks.
//!
//! ```no_run
//! use std::path::Path;
//! use traderepublic_rs::download::{filename, DownloadTask};
//!
//! # async fn example(
//! #     client: traderepublic_rs::TradeRepublicClient,
//! #     event: traderepublic_rs::Event,
//! # ) -> traderepublic_rs::Result<()> {
//! let downloader = client.downloader()?;
//! for document in event.documents() {
//!     let destination = filename::document_path(Path::new("documents"), &event, &document);
//!     downloader.submit(DownloadTask::new(document.url, destination)).await?;
//! }
//!
//! let report = downloader.join().await;
//! for failure in &report.failures {
//!     eprintln!("{}: {}", failure.task.destination.display(), failure.error);
//! }
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

use thiserror::Error;

pub mod filename;
mod pool;
mod retry;

pub use pool::{DocumentDownloader, DownloadStats, DownloaderConfig, DEFAULT_WORKERS};
pub use retry::{classify_error, FailureType, RetryDecision, RetryPolicy, DEFAULT_MAX_ATTEMPTS};

/// One file to fetch.
///
/// Two tasks with the same destination describe the same file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DownloadTask {
    /// Source URL
    pub url: String,
    /// Where the file ends up; overwritten if present
    pub destination: PathBuf,
}

impl DownloadTask {
    /// Create a task.
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            destination: destination.into(),
        }
    }
}

/// A task that did not complete.
#[derive(Debug, Clone)]
pub struct DownloadFailure {
    /// The failed task
    pub task: DownloadTask,
    /// Last error, rendered
    pub error: String,
    /// Attempts made, including the first
    pub attempts: u32,
}

/// Outcome of a download batch.
#[derive(Debug, Clone, Default)]
pub struct DownloadReport {
    /// Tasks written successfully
    pub completed: usize,
    /// Retries performed across all tasks
    pub retried: usize,
    /// Tasks that failed permanently or ran out of attempts
    pub failures: Vec<DownloadFailure>,
}

impl DownloadReport {
    /// Number of failed tasks.
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// Number of tasks processed.
    pub fn total(&self) -> usize {
        self.completed + self.failed()
    }

    /// Returns `true` if every task completed.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Why a single download attempt failed.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS, connection refused, TLS, reset)
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL being downloaded
        url: String,
        /// The underlying error
        #[source]
        source: reqwest::Error,
    },

    /// The request timed out
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL being downloaded
        url: String,
    },

    /// Non-success HTTP status
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL being downloaded
        url: String,
        /// Response status code
        status: u16,
    },

    /// Local file system failure
    #[error("I/O error writing {path}: {source}")]
    Io {
        /// File being written
        path: PathBuf,
        /// The underlying error
        #[source]
        source: std::io::Error,
    },

    /// The URL cannot be requested
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The offending URL
        url: String,
    },
}

impl DownloadError {
    pub(crate) fn from_reqwest(url: &str, error: reqwest::Error) -> Self {
        if error.is_timeout() {
            DownloadError::Timeout {
                url: url.to_string(),
            }
        } else if error.is_builder() {
            DownloadError::InvalidUrl {
                url: url.to_string(),
            }
        } else {
            DownloadError::Network {
                url: url.to_string(),
                source: error,
            }
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DownloadError::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_counts() {
        let report = DownloadReport {
            completed: 97,
            retried: 6,
            failures: vec![DownloadFailure {
                task: DownloadTask::new("https://example.com/a.pdf", "/tmp/a.pdf"),
                error: "HTTP 500 downloading https://example.com/a.pdf".to_string(),
                attempts: 3,
            }],
        };
        assert_eq!(report.failed(), 1);
        assert_eq!(report.total(), 98);
        assert!(!report.is_success());
        assert!(DownloadReport::default().is_success());
    }

    #[test]
    fn test_error_messages() {
        let err = DownloadError::HttpStatus {
            url: "https://example.com/x".to_string(),
            status: 503,
        };
        assert_eq!(err.to_string(), "HTTP 503 downloading https://example.com/x");
    }
}
