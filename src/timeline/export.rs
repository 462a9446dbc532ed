//! Full timeline export: fetch, download documents, sort.

use std::collections::HashSet;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use futures_util::StreamExt;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::TimelineFetcher;
use crate::download::{
    DocumentDownloader, DownloadFailure, DownloadReport, DownloadTask, DownloaderConfig,
};
use crate::models::{sort_newest_first, Event};
use crate::{Result, TradeRepublicClient};

/// Result of [`Timeline::run`].
#[derive(Debug, Clone, Serialize)]
pub struct TimelineOutput {
    /// All fetched events, newest first
    pub events: Vec<Event>,
    /// Download outcome; `None` when no documents directory was set
    #[serde(skip)]
    pub downloads: Option<DownloadReport>,
}

/// Builder driving a complete export.
///
/// Documents are queued for download while the timeline is still being
/// fetched.
///
/// ```no_run
/// # async fn example(client: traderepublic_rs::TradeRepublicClient) -> traderepublic_rs::Result<()> {
/// let output = client
///     .export()
///     .since_days_ago(30)
///     .documents_dir("documents")
///     .workers(4)
///     .run()
///     .await?;
///
/// println!("{} events", output.events.len());
/// if let Some(report) = output.downloads {
///     println!("{} documents, {} failed", report.completed, report.failed());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Timeline {
    client: TradeRepublicClient,
    fetcher: TimelineFetcher,
    since: Option<DateTime<Utc>>,
    documents_dir: Option<PathBuf>,
    downloads: DownloaderConfig,
}

impl Timeline {
    /// Export over the client's websocket timeline.
    #[cfg(feature = "streaming")]
    pub fn new(client: &TradeRepublicClient) -> Self {
        Self::with_fetcher(client, client.timeline())
    }

    /// Export events produced by `fetcher`; documents are downloaded with
    /// the client's HTTP client and session.
    pub fn with_fetcher(client: &TradeRepublicClient, fetcher: TimelineFetcher) -> Self {
        Self {
            client: client.clone(),
            fetcher,
            since: None,
            documents_dir: None,
            downloads: DownloaderConfig::default(),
        }
    }

    /// Only keep events at or after `since`.
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// Only keep events from the last `days` days; `0` exports the whole
    /// history.
    pub fn since_days_ago(mut self, days: u32) -> Self {
        self.since = (days > 0).then(|| Utc::now() - Duration::days(i64::from(days)));
        self
    }

    /// Download documents below `dir`.
    pub fn documents_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.documents_dir = Some(dir.into());
        self
    }

    /// Number of download workers.
    pub fn workers(mut self, workers: usize) -> Self {
        self.downloads.workers = workers;
        self
    }

    /// Replace the downloader configuration.
    pub fn downloader_config(mut self, config: DownloaderConfig) -> Self {
        self.downloads = config;
        self
    }

    /// Run the export.
    ///
    /// A fetch error is returned only after every queued download has
    /// finished.
    pub async fn run(self) -> Result<TimelineOutput> {
        let Self {
            client,
            fetcher,
            since,
            documents_dir,
            downloads,
        } = self;

        let downloader = match &documents_dir {
            Some(_) => {
                if !fetcher.config().fetch_details {
                    warn!("event details are disabled, no documents will be found");
                }
                Some(client.downloader_with(downloads)?)
            }
            None => None,
        };
        let mut queue = DocumentQueue {
            downloader,
            base: documents_dir,
            queued: HashSet::new(),
            rejected: Vec::new(),
        };

        let mut events = Vec::new();
        let mut fetch_error = None;
        let mut stream = fetcher.fetch_events(since);
        while let Some(item) = stream.next().await {
            match item {
                Ok(event) => {
                    queue.submit_documents(&event).await;
                    events.push(event);
                }
                Err(e) => {
                    warn!(error = %e, fetched = events.len(), "timeline fetch failed");
                    fetch_error = Some(e);
                    break;
                }
            }
        }
        drop(stream);

        let downloads = queue.finish().await;
        if let Some(e) = fetch_error {
            return Err(e);
        }

        sort_newest_first(&mut events);
        info!(events = events.len(), "timeline export finished");
        Ok(TimelineOutput { events, downloads })
    }
}

struct DocumentQueue {
    downloader: Option<DocumentDownloader>,
    base: Option<PathBuf>,
    queued: HashSet<PathBuf>,
    rejected: Vec<DownloadFailure>,
}

impl DocumentQueue {
    async fn submit_documents(&mut self, event: &Event) {
        let (Some(downloader), Some(base)) = (&self.downloader, &self.base) else {
            return;
        };

        for document in event.documents() {
            let destination = document.destination(base, event);
            if !self.queued.insert(destination.clone()) {
                debug!(path = %destination.display(), "document already queued");
                continue;
            }
            let task = DownloadTask::new(document.url, destination);
            if let Err(e) = downloader.submit(task.clone()).await {
                warn!(error = %e, path = %task.destination.display(), "could not queue document");
                self.rejected.push(DownloadFailure {
                    task,
                    error: e.to_string(),
                    attempts: 0,
                });
            }
        }
    }

    async fn finish(self) -> Option<DownloadReport> {
        let mut report = self.downloader?.join().await;
        report.failures.extend(self.rejected);
        Some(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Session;
    use crate::client::ClientConfig;
    use crate::timeline::{TimelineConfig, TimelineKind, TimelinePage, TimelineSource};
    use crate::models::{EventDetails, EventId};
    use crate::Error;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct FixedSource {
        items: Vec<serde_json::Value>,
        fail_after: bool,
    }

    #[async_trait]
    impl TimelineSource for FixedSource {
        async fn page(&self, kind: TimelineKind, after: Option<&str>) -> Result<TimelinePage> {
            match (kind, after) {
                (TimelineKind::Transactions, None) => {
                    let after = if self.fail_after { "next" } else { "" };
                    TimelinePage::from_value(serde_json::json!({
                        "items": self.items,
                        "cursors": {"after": after},
                    }))
                }
                (TimelineKind::Transactions, Some(_)) => Err(Error::SessionExpired),
                (TimelineKind::ActivityLog, _) => Ok(TimelinePage::default()),
            }
        }

        async fn detail(&self, _id: &EventId) -> Result<EventDetails> {
            Err(Error::Protocol("no details".to_string()))
        }
    }

    fn client() -> TradeRepublicClient {
        TradeRepublicClient::with_session(
            Session::from_web_cookies("tr_session=abc"),
            ClientConfig::default(),
        )
        .unwrap()
    }

    fn fetcher(fail_after: bool) -> TimelineFetcher {
        let source = FixedSource {
            items: vec![
                serde_json::json!({"id": "a", "timestamp": "2023-01-01T10:00:00.000+0000"}),
                serde_json::json!({"id": "b", "timestamp": "2023-03-01T10:00:00.000+0000"}),
            ],
            fail_after,
        };
        TimelineFetcher::new(
            Arc::new(source),
            TimelineConfig::default().with_details(false),
        )
    }

    #[tokio::test]
    async fn test_events_sorted_newest_first() {
        let output = Timeline::with_fetcher(&client(), fetcher(false))
            .run()
            .await
            .unwrap();
        let ids: Vec<_> = output.events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert!(output.downloads.is_none());
    }

    #[tokio::test]
    async fn test_fetch_error_returned_after_join() {
        let dir = tempfile::tempdir().unwrap();
        let result = Timeline::with_fetcher(&client(), fetcher(true))
            .documents_dir(dir.path())
            .run()
            .await;
        assert!(matches!(result, Err(Error::SessionExpired)));
    }

    #[test]
    fn test_since_days_ago_zero_is_whole_history() {
        let timeline = Timeline::with_fetcher(&client(), fetcher(false)).since_days_ago(0);
        assert!(timeline.since.is_none());

        let timeline = Timeline::with_fetcher(&client(), fetcher(false)).since_days_ago(7);
        let since = timeline.since.unwrap();
        let age = Utc::now() - since;
        assert!(age >= Duration::days(7) && age < Duration::days(7) + Duration::minutes(1));
    }
}
