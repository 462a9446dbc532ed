//! Timeline retrieval.
//!
//! The timeline is served page by page over the subscription websocket.
//! [`TimelineFetcher`] walks the pages lazily and yields each event once;
//! [`Timeline`] drives a full export, handing discovered documents to the
//! [`DocumentDownloader`](crate::download::DocumentDownloader) as it goes.
//!
//! ```no_run
//! use futures_util::StreamExt;
//!
//! # async fn example(client: traderepublic_rs::TradeRepublicClient) -> traderepublic_rs::Result<()> {
//! let mut events = client.timeline().fetch_events(None);
//! while let Some(event) = events.next().await {
//!     let event = event?;
//!     println!("{} {}", event.timestamp, event.title);
//! }
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::models::{Event, EventDetails, EventId};
use crate::Result;

mod export;
mod fetcher;
#[cfg(feature = "streaming")]
mod source;

pub use export::{Timeline, TimelineOutput};
pub use fetcher::{EventStream, TimelineConfig, TimelineFetcher};
#[cfg(feature = "streaming")]
pub use source::WebSocketTimelineSource;

/// The two paginated timelines the service keeps per account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimelineKind {
    /// Money movements: trades, savings plans, deposits, dividends.
    Transactions,
    /// Everything else: statements, notices, account changes.
    ActivityLog,
}

impl TimelineKind {
    /// Subscription type requesting a page of this timeline.
    pub fn subscription_type(&self) -> &'static str {
        match self {
            TimelineKind::Transactions => "timelineTransactions",
            TimelineKind::ActivityLog => "timelineActivityLog",
        }
    }
}

/// One page of a timeline.
#[derive(Debug, Clone, Default)]
pub struct TimelinePage {
    /// Events on this page, in service order
    pub items: Vec<Event>,
    /// Cursor for the next page; `None` on the last page
    pub after: Option<String>,
}

#[derive(Deserialize)]
struct RawPage {
    #[serde(default)]
    items: Vec<Value>,
    #[serde(default)]
    cursors: Option<RawCursors>,
}

#[derive(Deserialize)]
struct RawCursors {
    #[serde(default)]
    after: Option<String>,
}

impl TimelinePage {
    /// Decode a page answer. Items that do not decode as events are
    /// logged and skipped.
    pub fn from_value(value: Value) -> Result<Self> {
        let raw: RawPage = serde_json::from_value(value)?;
        let items = raw
            .items
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<Event>(item) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(error = %e, "skipping undecodable timeline item");
                    None
                }
            })
            .collect();

        Ok(Self {
            items,
            after: raw.cursors.and_then(|c| c.after).filter(|a| !a.is_empty()),
        })
    }
}

/// Where timeline pages and event details come from.
#[async_trait]
pub trait TimelineSource: Send + Sync {
    /// Fetch the page of `kind` following the `after` cursor (first page
    /// when `None`).
    async fn page(&self, kind: TimelineKind, after: Option<&str>) -> Result<TimelinePage>;

    /// Fetch the details of one event.
    async fn detail(&self, id: &EventId) -> Result<EventDetails>;
}
