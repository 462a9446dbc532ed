use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use reqwest::header::HeaderMap;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::retry::{classify_error, RetryDecision, RetryPolicy};
use super::{DownloadError, DownloadFailure, DownloadReport, DownloadTask};
use crate::auth::Session;
use crate::{Error, Result};

/// Default number of concurrent workers.
pub const DEFAULT_WORKERS: usize = 8;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Configuration for a [`DocumentDownloader`].
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Number of concurrent workers (at least 1)
    pub workers: usize,
    /// Pending tasks held before [`DocumentDownloader::submit`] waits;
    /// defaults to four per worker
    pub queue_capacity: Option<usize>,
    /// Retry policy applied per task
    pub retry: RetryPolicy,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl DownloaderConfig {
    /// Set the number of workers.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn worker_count(&self) -> usize {
        self.workers.max(1)
    }

    fn capacity(&self) -> usize {
        self.queue_capacity
            .unwrap_or(self.worker_count() * 4)
            .max(1)
    }
}

/// Live counters shared by the workers.
#[derive(Debug, Default)]
pub struct DownloadStats {
    submitted: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    retried: AtomicUsize,
}

impl DownloadStats {
    /// Tasks accepted by [`DocumentDownloader::submit`].
    pub fn submitted(&self) -> usize {
        self.submitted.load(Ordering::SeqCst)
    }

    /// Tasks written successfully.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Tasks that gave up.
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Retries performed.
    pub fn retried(&self) -> usize {
        self.retried.load(Ordering::SeqCst)
    }

    /// Tasks not yet finished.
    pub fn pending(&self) -> usize {
        self.submitted()
            .saturating_sub(self.completed() + self.failed())
    }
}

/// Bounded pool of download workers.
///
/// Tasks are delivered to exactly one worker. Each worker streams the
/// response into a temporary file next to the destination and renames it
/// into place, so a destination is never left half written.
pub struct DocumentDownloader {
    sender: mpsc::Sender<DownloadTask>,
    workers: Vec<JoinHandle<Vec<DownloadFailure>>>,
    stats: Arc<DownloadStats>,
}

struct Worker {
    http: reqwest::Client,
    headers: HeaderMap,
    retry: RetryPolicy,
    stats: Arc<DownloadStats>,
}

impl DocumentDownloader {
    /// Start the workers.
    ///
    /// Requests carry the session's authentication headers.
    pub fn new(http: reqwest::Client, session: &Session, config: DownloaderConfig) -> Result<Self> {
        let headers = session.headers()?;
        let (sender, receiver) = mpsc::channel(config.capacity());
        let receiver = Arc::new(Mutex::new(receiver));
        let stats = Arc::new(DownloadStats::default());

        let worker = Arc::new(Worker {
            http,
            headers,
            retry: config.retry.clone(),
            stats: stats.clone(),
        });

        let workers = (0..config.worker_count())
            .map(|index| tokio::spawn(run_worker(index, receiver.clone(), worker.clone())))
            .collect();

        debug!(workers = config.worker_count(), capacity = config.capacity(), "downloader started");

        Ok(Self {
            sender,
            workers,
            stats,
        })
    }

    /// Queue a task, waiting while the queue is full.
    ///
    /// The destination's parent directory is created first.
    pub async fn submit(&self, task: DownloadTask) -> Result<()> {
        if let Some(parent) = task.destination.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        self.sender
            .send(task)
            .await
            .map_err(|_| Error::InvalidInput("downloader workers have stopped".to_string()))?;
        self.stats.submitted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Live counters.
    pub fn stats(&self) -> Arc<DownloadStats> {
        self.stats.clone()
    }

    /// Stop accepting tasks, wait for every queued task to finish and
    /// report the outcome.
    pub async fn join(self) -> DownloadReport {
        let Self {
            sender,
            workers,
            stats,
        } = self;
        drop(sender);

        let mut failures = Vec::new();
        for handle in workers {
            match handle.await {
                Ok(worker_failures) => failures.extend(worker_failures),
                Err(e) => warn!(error = %e, "download worker panicked"),
            }
        }

        let report = DownloadReport {
            completed: stats.completed(),
            retried: stats.retried(),
            failures,
        };
        info!(
            completed = report.completed,
            failed = report.failed(),
            retried = report.retried,
            "downloads finished"
        );
        report
    }
}

impl std::fmt::Debug for DocumentDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentDownloader")
            .field("workers", &self.workers.len())
            .field("stats", &self.stats)
            .finish()
    }
}

async fn run_worker(
    index: usize,
    receiver: Arc<Mutex<mpsc::Receiver<DownloadTask>>>,
    worker: Arc<Worker>,
) -> Vec<DownloadFailure> {
    let mut failures = Vec::new();
    loop {
        let task = receiver.lock().await.recv().await;
        let Some(task) = task else {
            break;
        };

        match worker.download_with_retry(&task).await {
            Ok(bytes) => {
                worker.stats.completed.fetch_add(1, Ordering::SeqCst);
                debug!(worker = index, bytes, path = %task.destination.display(), "downloaded");
            }
            Err((error, attempts)) => {
                worker.stats.failed.fetch_add(1, Ordering::SeqCst);
                warn!(worker = index, attempts, error = %error, "download failed");
                failures.push(DownloadFailure {
                    task,
                    error: error.to_string(),
                    attempts,
                });
            }
        }
    }
    debug!(worker = index, "download worker stopped");
    failures
}

impl Worker {
    #[instrument(skip_all, fields(path = %task.destination.display()))]
    async fn download_with_retry(
        &self,
        task: &DownloadTask,
    ) -> std::result::Result<u64, (DownloadError, u32)> {
        let mut attempt = 1;
        loop {
            let error = match self.download_once(task).await {
                Ok(bytes) => return Ok(bytes),
                Err(error) => error,
            };
            match self.retry.should_retry(classify_error(&error), attempt) {
                RetryDecision::Retry { delay, attempt: next } => {
                    self.stats.retried.fetch_add(1, Ordering::SeqCst);
                    debug!(attempt, error = %error, delay_ms = delay.as_millis() as u64, "retrying download");
                    tokio::time::sleep(delay).await;
                    attempt = next;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(attempt, reason = %reason, "giving up");
                    return Err((error, attempt));
                }
            }
        }
    }

    async fn download_once(&self, task: &DownloadTask) -> std::result::Result<u64, DownloadError> {
        let response = self
            .http
            .get(&task.url)
            .headers(self.headers.clone())
            .send()
            .await
            .map_err(|e| DownloadError::from_reqwest(&task.url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::HttpStatus {
                url: task.url.clone(),
                status: status.as_u16(),
            });
        }

        let temp = temp_path(&task.destination);
        let written = match stream_to_file(response, &task.url, &temp).await {
            Ok(written) => written,
            Err(e) => {
                let _ = tokio::fs::remove_file(&temp).await;
                return Err(e);
            }
        };
        if let Err(e) = tokio::fs::rename(&temp, &task.destination).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(DownloadError::io(&task.destination, e));
        }
        Ok(written)
    }
}

async fn stream_to_file(
    response: reqwest::Response,
    url: &str,
    path: &Path,
) -> std::result::Result<u64, DownloadError> {
    let file = File::create(path)
        .await
        .map_err(|e| DownloadError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    let mut written = 0u64;

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| DownloadError::from_reqwest(url, e))?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(path, e))?;
        written += chunk.len() as u64;
    }

    writer.flush().await.map_err(|e| DownloadError::io(path, e))?;
    Ok(written)
}

/// Unique sibling of `destination` used while the body is streamed.
fn temp_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    destination.with_file_name(format!(".{name}.{}-{n}.part", std::process::id()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = DownloaderConfig::default();
        assert_eq!(config.worker_count(), 8);
        assert_eq!(config.capacity(), 32);

        let config = DownloaderConfig::default().with_workers(0);
        assert_eq!(config.worker_count(), 1);
        assert_eq!(config.capacity(), 4);

        let config = DownloaderConfig::default().with_queue_capacity(2);
        assert_eq!(config.capacity(), 2);
    }

    #[test]
    fn test_temp_path_is_unique_sibling() {
        let destination = Path::new("/data/Order/2023-01-01 - A - 1.pdf");
        let a = temp_path(destination);
        let b = temp_path(destination);
        assert_ne!(a, b);
        assert_eq!(a.parent(), destination.parent());
        assert!(a.file_name().unwrap().to_str().unwrap().ends_with(".part"));
    }

    #[test]
    fn test_stats_pending() {
        let stats = DownloadStats::default();
        stats.submitted.store(5, Ordering::SeqCst);
        stats.completed.store(2, Ordering::SeqCst);
        stats.failed.store(1, Ordering::SeqCst);
        assert_eq!(stats.pending(), 2);
    }

    #[tokio::test]
    async fn test_join_without_tasks() {
        let session = Session::from_web_cookies("tr_session=abc");
        let downloader =
            DocumentDownloader::new(reqwest::Client::new(), &session, DownloaderConfig::default())
                .unwrap();
        let report = downloader.join().await;
        assert_eq!(report.total(), 0);
        assert!(report.is_success());
    }
}
