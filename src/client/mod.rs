//! Client handle and configuration.
//!
//! [`TradeRepublicClient`] bundles an issued [`Session`](crate::Session)
//! with an HTTP client and a [`ClientConfig`], and hands out the timeline
//! and download services.
//!
//! # Example
//!
//! ```no_run
//! use futures_util::StreamExt;
//! use traderepublic_rs::{Session, TradeRepublicClient};
//!
//! # async fn example() -> traderepublic_rs::Result<()> {
//! let client = TradeRepublicClient::new(Session::from_web_cookies("tr_session=..."))?;
//!
//! let mut events = client.timeline().fetch_events(None);
//! while let Some(event) = events.next().await {
//!     println!("{}", event?.title);
//! }
//! # Ok(())
//! # }
//! ```

mod config;
mod http;

pub use config::{ClientConfig, RetryConfig};
pub use http::TradeRepublicClient;
