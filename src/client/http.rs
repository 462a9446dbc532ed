//! The authenticated client handle.

use std::sync::Arc;

use crate::auth::Session;
use crate::download::{DocumentDownloader, DownloaderConfig};
use crate::Result;

use super::config::ClientConfig;

#[cfg(feature = "streaming")]
use crate::timeline::{Timeline, TimelineConfig, TimelineFetcher, WebSocketTimelineSource};

/// The main client for an authenticated Trade Republic session.
///
/// Cloning is cheap; clones share the HTTP client and session.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use traderepublic_rs::auth::{FileTokenStore, NegotiatorConfig, SessionNegotiator};
/// use traderepublic_rs::{ClientConfig, Credentials, TradeRepublicClient};
///
/// # async fn example() -> traderepublic_rs::Result<()> {
/// let config = ClientConfig::default();
/// let mut negotiator = SessionNegotiator::new(
///     Credentials::new("+4917612345678", "1234"),
///     Arc::new(FileTokenStore::in_dir(".traderepublic")),
///     NegotiatorConfig::web(),
///     &config,
/// )?;
///
/// negotiator.resume_session().await?;
/// let session = match negotiator.session() {
///     Some(session) => session.clone(),
///     None => {
///         negotiator.begin_web_login().await?;
///         negotiator.complete_web_login("1234").await?
///     }
/// };
/// let client = TradeRepublicClient::with_session(session, config)?;
/// let output = client.export().since_days_ago(90).run().await?;
/// println!("{} events", output.events.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct TradeRepublicClient {
    pub(crate) inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    pub(crate) http: reqwest::Client,
    pub(crate) session: Session,
    pub(crate) config: ClientConfig,
}

impl TradeRepublicClient {
    /// Create a client for `session` with the default configuration.
    pub fn new(session: Session) -> Result<Self> {
        Self::with_session(session, ClientConfig::default())
    }

    /// Create a client for `session` with a custom configuration.
    pub fn with_session(session: Session, config: ClientConfig) -> Result<Self> {
        let http = config.build_http()?;

        Ok(Self {
            inner: Arc::new(ClientInner {
                http,
                session,
                config,
            }),
        })
    }

    /// The session this client acts for.
    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    /// The client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Timeline fetcher with default options and the client's retry
    /// schedule.
    #[cfg(feature = "streaming")]
    pub fn timeline(&self) -> TimelineFetcher {
        self.timeline_with(TimelineConfig::default().with_retry(self.inner.config.retry.clone()))
    }

    /// Timeline fetcher with custom options.
    #[cfg(feature = "streaming")]
    pub fn timeline_with(&self, config: TimelineConfig) -> TimelineFetcher {
        let source = WebSocketTimelineSource::new(self.inner.session.clone(), self.inner.config.clone());
        TimelineFetcher::new(Arc::new(source), config)
    }

    /// Start a document downloader with the default configuration.
    pub fn downloader(&self) -> Result<DocumentDownloader> {
        self.downloader_with(DownloaderConfig::default())
    }

    /// Start a document downloader.
    pub fn downloader_with(&self, config: DownloaderConfig) -> Result<DocumentDownloader> {
        DocumentDownloader::new(self.inner.http.clone(), &self.inner.session, config)
    }

    /// Build a full timeline export.
    #[cfg(feature = "streaming")]
    pub fn export(&self) -> Timeline {
        Timeline::new(self)
    }
}

impl std::fmt::Debug for TradeRepublicClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradeRepublicClient")
            .field("session", &self.inner.session)
            .field("config", &self.inner.config)
            .finish()
    }
}
