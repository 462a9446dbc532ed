//! Lazy, deduplicated walk over the timeline pages.

use std::collections::{HashSet, VecDeque};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use tracing::{debug, warn};

use super::{TimelineKind, TimelinePage, TimelineSource};
use crate::client::RetryConfig;
use crate::models::{Event, EventDetails, EventId};
use crate::{Error, Result};

/// Default number of detail requests in flight per page.
pub const DEFAULT_DETAIL_CONCURRENCY: usize = 4;

/// Type alias for a boxed future used internally.
type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Timeline retrieval options.
#[derive(Debug, Clone)]
pub struct TimelineConfig {
    /// Walk the activity log after the transactions timeline
    pub include_activity_log: bool,
    /// Attach details (and with them document references) to each event
    pub fetch_details: bool,
    /// Detail requests in flight at once
    pub detail_concurrency: usize,
    /// Retry schedule for transient page and detail failures
    pub retry: RetryConfig,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            include_activity_log: true,
            fetch_details: true,
            detail_concurrency: DEFAULT_DETAIL_CONCURRENCY,
            retry: RetryConfig::default(),
        }
    }
}

impl TimelineConfig {
    /// Set whether the activity log is walked.
    pub fn with_activity_log(mut self, include: bool) -> Self {
        self.include_activity_log = include;
        self
    }

    /// Set whether event details are fetched.
    pub fn with_details(mut self, fetch: bool) -> Self {
        self.fetch_details = fetch;
        self
    }

    /// Set the number of concurrent detail requests.
    pub fn with_detail_concurrency(mut self, concurrency: usize) -> Self {
        self.detail_concurrency = concurrency.max(1);
        self
    }

    /// Set the retry schedule.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn kinds(&self) -> VecDeque<TimelineKind> {
        let mut kinds = VecDeque::from([TimelineKind::Transactions]);
        if self.include_activity_log {
            kinds.push_back(TimelineKind::ActivityLog);
        }
        kinds
    }
}

/// Fetches timeline events from a [`TimelineSource`].
#[derive(Clone)]
pub struct TimelineFetcher {
    source: Arc<dyn TimelineSource>,
    config: TimelineConfig,
}

impl TimelineFetcher {
    /// Create a fetcher over `source`.
    pub fn new(source: Arc<dyn TimelineSource>, config: TimelineConfig) -> Self {
        Self { source, config }
    }

    /// The fetcher configuration.
    pub fn config(&self) -> &TimelineConfig {
        &self.config
    }

    /// Stream events newer than `since`, each id at most once.
    ///
    /// `None` (or the Unix epoch) fetches the entire history. Nothing is
    /// requested until the stream is polled, and a stream cannot be
    /// restarted: a second traversal needs a new call.
    pub fn fetch_events(&self, since: Option<DateTime<Utc>>) -> EventStream {
        EventStream::new(
            self.source.clone(),
            self.config.clone(),
            since.filter(|since| since.timestamp() > 0),
        )
    }
}

impl std::fmt::Debug for TimelineFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimelineFetcher")
            .field("config", &self.config)
            .finish()
    }
}

enum Pending {
    Page(BoxFuture<'static, Result<TimelinePage>>),
    Details(BoxFuture<'static, Result<Vec<Event>>>),
}

/// A stream of timeline events.
///
/// Yields events in the order the service returns them. A
/// [`Error::SessionExpired`] or [`Error::Transport`] item ends the stream;
/// events yielded before it remain valid.
pub struct EventStream {
    source: Arc<dyn TimelineSource>,
    config: TimelineConfig,
    since: Option<DateTime<Utc>>,
    /// Timelines still to walk; the front one is in progress
    kinds: VecDeque<TimelineKind>,
    /// Cursor for the next page of the front timeline
    cursor: Option<String>,
    /// Cursors already requested on the front timeline
    visited: HashSet<String>,
    seen: HashSet<EventId>,
    ready: VecDeque<Event>,
    pending: Option<Pending>,
    finished: bool,
}

impl EventStream {
    fn new(
        source: Arc<dyn TimelineSource>,
        config: TimelineConfig,
        since: Option<DateTime<Utc>>,
    ) -> Self {
        let kinds = config.kinds();
        Self {
            source,
            config,
            since,
            kinds,
            cursor: None,
            visited: HashSet::new(),
            seen: HashSet::new(),
            ready: VecDeque::new(),
            pending: None,
            finished: false,
        }
    }

    /// Number of distinct events accepted so far.
    pub fn events_seen(&self) -> usize {
        self.seen.len()
    }

    /// Filter and deduplicate a page, then decide where to continue.
    fn accept_page(&mut self, page: TimelinePage) -> Vec<Event> {
        let mut reached_bound = false;
        let mut accepted = Vec::with_capacity(page.items.len());

        for event in page.items {
            if let Some(since) = self.since {
                if event.is_older_than(since) {
                    reached_bound = true;
                    continue;
                }
            }
            if !self.seen.insert(event.id.clone()) {
                debug!(event_id = %event.id, "skipping duplicate event");
                continue;
            }
            accepted.push(event);
        }

        let kind = self.kinds.front().copied();
        let next = page.after.filter(|after| {
            if self.visited.insert(after.clone()) {
                true
            } else {
                warn!(?kind, cursor = %after, "service repeated a cursor, ending this timeline");
                false
            }
        });

        match next {
            Some(after) if !reached_bound => self.cursor = Some(after),
            _ => {
                debug!(?kind, reached_bound, "timeline complete");
                self.kinds.pop_front();
                self.cursor = None;
                self.visited.clear();
            }
        }
        accepted
    }
}

impl Stream for EventStream {
    type Item = Result<Event>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        loop {
            if let Some(event) = this.ready.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }
            if this.finished {
                return Poll::Ready(None);
            }

            match this.pending.as_mut() {
                Some(Pending::Page(fut)) => match fut.as_mut().poll(cx) {
                    Poll::Ready(Ok(page)) => {
                        this.pending = None;
                        let accepted = this.accept_page(page);
                        if this.config.fetch_details && !accepted.is_empty() {
                            this.pending = Some(Pending::Details(Box::pin(attach_details(
                                this.source.clone(),
                                accepted,
                                this.config.clone(),
                            ))));
                        } else {
                            this.ready.extend(accepted);
                        }
                        continue;
                    }
                    Poll::Ready(Err(e)) => {
                        this.pending = None;
                        this.finished = true;
                        return Poll::Ready(Some(Err(e)));
                    }
                    Poll::Pending => return Poll::Pending,
                },
                Some(Pending::Details(fut)) => match fut.as_mut().poll(cx) {
                    Poll::Ready(Ok(events)) => {
                        this.pending = None;
                        this.ready.extend(events);
                        continue;
                    }
                    Poll::Ready(Err(e)) => {
                        this.pending = None;
                        this.finished = true;
                        return Poll::Ready(Some(Err(e)));
                    }
                    Poll::Pending => return Poll::Pending,
                },
                None => {}
            }

            match this.kinds.front().copied() {
                Some(kind) => {
                    this.pending = Some(Pending::Page(Box::pin(fetch_page(
                        this.source.clone(),
                        kind,
                        this.cursor.clone(),
                        this.config.retry.clone(),
                    ))));
                }
                None => {
                    this.finished = true;
                    return Poll::Ready(None);
                }
            }
        }
    }
}

impl Unpin for EventStream {}

/// Sleep before the next attempt, or turn the error into the final one.
async fn backoff_or_fail(error: Error, attempt: u32, retry: &RetryConfig, what: &str) -> Result<u32> {
    if !error.is_retryable() {
        return Err(error);
    }
    if attempt >= retry.max_retries {
        return Err(Error::Transport {
            attempts: attempt + 1,
            message: error.to_string(),
        });
    }
    let backoff = retry.backoff_for_attempt(attempt);
    warn!(what, attempt = attempt + 1, ?backoff, error = %error, "transient failure, retrying");
    tokio::time::sleep(backoff).await;
    Ok(attempt + 1)
}

async fn fetch_page(
    source: Arc<dyn TimelineSource>,
    kind: TimelineKind,
    cursor: Option<String>,
    retry: RetryConfig,
) -> Result<TimelinePage> {
    let mut attempt = 0;
    loop {
        match source.page(kind, cursor.as_deref()).await {
            Ok(page) => {
                debug!(?kind, items = page.items.len(), has_next = page.after.is_some(), "page received");
                return Ok(page);
            }
            Err(e) => attempt = backoff_or_fail(e, attempt, &retry, "timeline page").await?,
        }
    }
}

async fn fetch_detail(
    source: &dyn TimelineSource,
    id: &EventId,
    retry: &RetryConfig,
) -> Result<EventDetails> {
    let mut attempt = 0;
    loop {
        match source.detail(id).await {
            Ok(details) => return Ok(details),
            Err(e) => attempt = backoff_or_fail(e, attempt, retry, "event detail").await?,
        }
    }
}

/// Attach details to each event, keeping service order.
///
/// A detail the service rejects is logged and the event is kept without
/// it. An expired session or exhausted retries abort the page.
async fn attach_details(
    source: Arc<dyn TimelineSource>,
    events: Vec<Event>,
    config: TimelineConfig,
) -> Result<Vec<Event>> {
    let concurrency = config.detail_concurrency.max(1);
    let retry = config.retry;
    let results: Vec<Result<Event>> = futures_util::stream::iter(events)
        .map(move |mut event| {
            let source = source.clone();
            let retry = retry.clone();
            async move {
                match fetch_detail(source.as_ref(), &event.id, &retry).await {
                    Ok(details) => event.details = Some(details),
                    Err(e @ (Error::SessionExpired | Error::Transport { .. })) => return Err(e),
                    Err(e) => warn!(event_id = %event.id, error = %e, "details unavailable"),
                }
                Ok(event)
            }
        })
        .buffered(concurrency)
        .collect()
        .await;

    results.into_iter().collect()
}
