//! Authentication and session management for the Trade Republic API.
//!
//! Two login protocols are supported:
//!
//! 1. **Web** - phone number and PIN, then a 4-digit code pushed to the app
//!    (or resent by SMS after a countdown). The resulting cookies can be
//!    stored and resumed later.
//! 2. **App** - phone number and PIN signed with a device key. A device key
//!    is bound to the account through a device reset, which requires a
//!    token sent by SMS and unbinds any previous device.
//!
//! [`SessionNegotiator`] drives either protocol and yields a [`Session`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use traderepublic_rs::auth::{
//!     MemoryTokenStore, NegotiatorConfig, ResetConfirmation, SessionNegotiator,
//! };
//! use traderepublic_rs::{ClientConfig, Credentials, Error};
//!
//! # async fn example() -> traderepublic_rs::Result<()> {
//! let mut negotiator = SessionNegotiator::new(
//!     Credentials::new("+4915112345678", "1234"),
//!     Arc::new(MemoryTokenStore::new()),
//!     NegotiatorConfig::app(),
//!     &ClientConfig::default(),
//! )?;
//!
//! let session = match negotiator.login_app().await {
//!     Ok(session) => session,
//!     Err(Error::StaleCredential(_)) => {
//!         negotiator
//!             .initiate_device_reset(ResetConfirmation::Confirmed)
//!             .await?;
//!         negotiator.complete_device_reset("1234").await?
//!     }
//!     Err(e) => return Err(e),
//! };
//! # Ok(())
//! # }
//! ```

mod device_key;
mod negotiator;
mod session;
mod store;
mod transport;

pub use device_key::DeviceKey;
pub use negotiator::{
    AuthStateKind, NegotiatorConfig, ResetConfirmation, SessionNegotiator,
    DEFAULT_MAX_CODE_ATTEMPTS,
};
pub use session::{LoginMode, Session};
pub use store::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use transport::{AppTokens, AuthTransport, HttpAuthTransport, WebLoginChallenge};
