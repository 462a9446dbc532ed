//! Timeline pages over the subscription websocket.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use super::{TimelineKind, TimelinePage, TimelineSource};
use crate::auth::Session;
use crate::client::ClientConfig;
use crate::models::{EventDetails, EventId};
use crate::streaming::SubscriptionConnection;
use crate::Result;

/// [`TimelineSource`] backed by a [`SubscriptionConnection`].
///
/// The connection is opened on first use and reopened on the next request
/// after it drops.
pub struct WebSocketTimelineSource {
    session: Session,
    config: ClientConfig,
    connection: Mutex<Option<Arc<SubscriptionConnection>>>,
}

impl WebSocketTimelineSource {
    /// Create a source for `session`. Nothing is connected yet.
    pub fn new(session: Session, config: ClientConfig) -> Self {
        Self {
            session,
            config,
            connection: Mutex::new(None),
        }
    }

    async fn connection(&self) -> Result<Arc<SubscriptionConnection>> {
        let mut slot = self.connection.lock().await;
        if let Some(connection) = slot.as_ref().filter(|c| c.is_connected()) {
            return Ok(connection.clone());
        }
        if slot.is_some() {
            debug!("subscription connection dropped, reconnecting");
        }
        let connection = Arc::new(SubscriptionConnection::connect(&self.session, &self.config).await?);
        *slot = Some(connection.clone());
        Ok(connection)
    }
}

#[async_trait]
impl TimelineSource for WebSocketTimelineSource {
    async fn page(&self, kind: TimelineKind, after: Option<&str>) -> Result<TimelinePage> {
        let payload = match after {
            Some(after) => json!({"type": kind.subscription_type(), "after": after}),
            None => json!({"type": kind.subscription_type()}),
        };
        let answer = self.connection().await?.request(payload).await?;
        TimelinePage::from_value(answer)
    }

    async fn detail(&self, id: &EventId) -> Result<EventDetails> {
        let payload = json!({"type": "timelineDetailV2", "id": id.as_str()});
        let answer = self.connection().await?.request(payload).await?;
        Ok(serde_json::from_value(answer)?)
    }
}

impl std::fmt::Debug for WebSocketTimelineSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTimelineSource")
            .field("session", &self.session)
            .field("endpoints", &self.config.endpoints)
            .finish()
    }
}
