//! Error types for the Trade Republic client.
//!
//! One error enum covers authentication, timeline retrieval and transport
//! failures. Per-document download failures are not part of it: those are
//! isolated per task and reported through
//! [`DownloadReport`](crate::download::DownloadReport).

use thiserror::Error;

/// A specialized `Result` type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for all client operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Credentials are missing or malformed. Fatal: retrying with the same
    /// input cannot succeed.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The service rejected a second-factor code or reset token.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The stored device key is missing, unreadable or no longer accepted.
    /// Recoverable through the device reset flow.
    #[error("Stale device credential: {0}")]
    StaleCredential(String),

    /// The session was rejected mid-operation; a new login is required.
    #[error("Session expired; login required")]
    SessionExpired,

    /// A network operation kept failing after all retry attempts.
    #[error("Transport failed after {attempts} attempts: {message}")]
    Transport {
        /// Number of attempts made
        attempts: u32,
        /// Last underlying failure
        message: String,
    },

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Local filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// API returned an unexpected error response
    #[error("API error: status={status}, message={message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Message extracted from the response body
        message: String,
    },

    /// Rate limited by the API
    #[error("Rate limited; retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Number of seconds to wait before retrying
        retry_after_secs: u64,
    },

    /// Request timed out
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// WebSocket connection error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Stream was disconnected unexpectedly
    #[error("Stream disconnected")]
    StreamDisconnected,

    /// The subscription protocol produced something unparseable
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid input provided to a function
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// URL parsing error
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl Error {
    /// Returns `true` if this error is potentially transient and the
    /// operation could be retried with the same input.
    ///
    /// Authentication failures are never retryable: resending the same code
    /// or PIN risks locking the account.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => !e.is_status() || e.status().is_some_and(|s| s.is_server_error()),
            Error::Api { status, .. } => *status >= 500,
            Error::Timeout(_)
            | Error::RateLimited { .. }
            | Error::WebSocket(_)
            | Error::StreamDisconnected => true,
            _ => false,
        }
    }

    /// Returns `true` if this is an authentication-related error.
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            Error::Authentication(_) | Error::StaleCredential(_) | Error::SessionExpired
        )
    }

    /// Returns `true` if the process cannot continue without new input.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Configuration(_))
    }

    /// Create an API error from a response status and body.
    ///
    /// The service reports errors as `{"errors": [{"errorMessage": ..}]}`.
    pub(crate) fn from_api_response(status: u16, body: &serde_json::Value) -> Self {
        Error::Api {
            status,
            message: api_error_message(body).unwrap_or_else(|| "Unknown API error".to_string()),
        }
    }
}

/// Extract the first error message from a service error body.
pub(crate) fn api_error_message(body: &serde_json::Value) -> Option<String> {
    let first = body.get("errors").and_then(|e| e.get(0))?;
    first
        .get("errorMessage")
        .or_else(|| first.get("errorCode"))
        .and_then(|m| m.as_str())
        .map(String::from)
}

#[cfg(feature = "streaming")]
impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocket(err.to_string())
    }
}
