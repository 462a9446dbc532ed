//! Subscription websocket used by the timeline.
//!
//! The service answers read requests over a single persistent websocket.
//! Each request is a subscription identified by a connection-local id;
//! answers may be full JSON documents or deltas against the previous
//! answer of the same subscription.
//!
//! ```no_run
//! use traderepublic_rs::streaming::SubscriptionConnection;
//! use traderepublic_rs::{ClientConfig, Session};
//!
//! # async fn example(session: Session) -> traderepublic_rs::Result<()> {
//! let connection = SubscriptionConnection::connect(&session, &ClientConfig::default()).await?;
//! let page = connection
//!     .request(serde_json::json!({"type": "timelineTransactions"}))
//!     .await?;
//! println!("{page}");
//! # Ok(())
//! # }
//! ```

mod connection;
pub(crate) mod protocol;

pub use connection::{Subscription, SubscriptionConnection};
