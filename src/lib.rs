//! # traderepublic-rs
//!
//! An async Rust client for the Trade Republic private API.
//!
//! The crate covers the three pieces needed to export an account's history:
//!
//! - **Authentication**: web login with a second-factor code, app login
//!   with a signed device key, session resume and device reset
//!   ([`auth`])
//! - **Timeline**: a lazy, deduplicated stream of account events over the
//!   subscription websocket ([`timeline`], [`streaming`])
//! - **Documents**: a bounded pool of download workers with retries and a
//!   failure report ([`download`])
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use traderepublic_rs::auth::{FileTokenStore, NegotiatorConfig, SessionNegotiator};
//! use traderepublic_rs::{ClientConfig, Credentials, TradeRepublicClient};
//!
//! #[tokio::main]
//! async fn main() -> traderepublic_rs::Result<()> {
//!     let config = ClientConfig::default();
//!     let mut negotiator = SessionNegotiator::new(
//!         Credentials::new("+4917612345678", "1234"),
//!         Arc::new(FileTokenStore::in_dir(".traderepublic")),
//!         NegotiatorConfig::web(),
//!         &config,
//!     )?;
//!
//!     negotiator.resume_session().await?;
//!     let session = match negotiator.session() {
//!         Some(session) => session.clone(),
//!         None => {
//!             let countdown = negotiator.begin_web_login().await?;
//!             println!("Code sent to the app; SMS available in {countdown}s");
//!             negotiator.complete_web_login("0000").await?
//!         }
//!     };
//!
//!     let client = TradeRepublicClient::with_session(session, config)?;
//!     let output = client
//!         .export()
//!         .since_days_ago(30)
//!         .documents_dir("documents")
//!         .run()
//!         .await?;
//!
//!     println!("{} events", output.events.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Streaming Example
//!
//! ```rust,no_run
//! use futures_util::StreamExt;
//! use traderepublic_rs::{Session, TradeRepublicClient};
//!
//! #[tokio::main]
//! async fn main() -> traderepublic_rs::Result<()> {
//!     let client = TradeRepublicClient::new(Session::from_app_token("session-token"))?;
//!
//!     let mut events = client.timeline().fetch_events(None);
//!     while let Some(event) = events.next().await {
//!         let event = event?;
//!         println!("{} {} {:?}", event.timestamp, event.title, event.amount);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod auth;
pub mod client;
pub mod download;
pub mod error;
pub mod models;
#[cfg(feature = "streaming")]
pub mod streaming;
pub mod timeline;

// Re-export primary types at crate root for convenience
pub use auth::{LoginMode, Session};
pub use client::{ClientConfig, RetryConfig, TradeRepublicClient};
pub use error::{Error, Result};
pub use models::{Credentials, DocumentReference, Endpoints, Event, EventId, EventType};

/// Prelude module for convenient imports.
///
/// ```rust
/// use traderepublic_rs::prelude::*;
/// ```
pub mod prelude {
    pub use crate::auth::{
        FileTokenStore, LoginMode, MemoryTokenStore, NegotiatorConfig, ResetConfirmation,
        Session, SessionNegotiator, TokenStore,
    };
    pub use crate::client::{ClientConfig, RetryConfig, TradeRepublicClient};
    pub use crate::download::{
        DocumentDownloader, DownloadReport, DownloadTask, DownloaderConfig, RetryPolicy,
    };
    pub use crate::error::{Error, Result};
    pub use crate::models::{
        Amount, Credentials, DocumentReference, Endpoints, Event, EventDetails, EventId,
        EventType,
    };
    pub use crate::timeline::{
        EventStream, Timeline, TimelineConfig, TimelineFetcher, TimelineOutput,
    };
}
