//! Primitive types and newtypes for type-safe API interactions.
//!
//! This module provides strongly-typed wrappers around string identifiers
//! so event ids, event types and endpoint URLs cannot be mixed up.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A strongly-typed timeline event id.
///
/// # Example
///
/// ```
/// use traderepublic_rs::EventId;
///
/// let id = EventId::new("0b9c2e3f-1d5a-4c7e-9a8b-6f0e1d2c3b4a");
/// println!("Event: {}", id);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// Create a new event id from a string.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the event id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for EventId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for EventId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EventId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The service's event type tag (e.g. `PAYMENT_INBOUND`, `ORDER_EXECUTED`).
///
/// Kept as an open string: the service adds new types without notice.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(String);

impl EventType {
    /// Create a new event type.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the event type as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First character upper case, the rest lower case.
    ///
    /// Used as the per-type directory name for downloaded documents.
    ///
    /// ```
    /// use traderepublic_rs::EventType;
    ///
    /// assert_eq!(EventType::new("PAYMENT_INBOUND").capitalized(), "Payment_inbound");
    /// ```
    pub fn capitalized(&self) -> String {
        let mut chars = self.0.chars();
        match chars.next() {
            Some(first) => first
                .to_uppercase()
                .chain(chars.flat_map(char::to_lowercase))
                .collect(),
            None => String::new(),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Remote endpoints used by the client.
///
/// Defaults to the production service. Tests and proxies can point the
/// client elsewhere with [`Endpoints::custom`].
///
/// # Example
///
/// ```
/// use traderepublic_rs::Endpoints;
///
/// let endpoints = Endpoints::default();
/// assert_eq!(endpoints.api_base_url(), "https://api.traderepublic.com");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    api_base_url: String,
    websocket_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.traderepublic.com".to_string(),
            websocket_url: "wss://api.traderepublic.com".to_string(),
        }
    }
}

impl Endpoints {
    /// Use custom base URLs. Trailing slashes are stripped.
    pub fn custom(api_base_url: impl Into<String>, websocket_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
            websocket_url: websocket_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Get the base URL for REST API requests.
    pub fn api_base_url(&self) -> &str {
        &self.api_base_url
    }

    /// Get the WebSocket URL for the subscription connection.
    pub fn websocket_url(&self) -> &str {
        &self.websocket_url
    }

    /// Join a path onto the API base URL.
    pub(crate) fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.api_base_url, path)
    }
}
