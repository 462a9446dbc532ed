//! Authenticated session handle.

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, COOKIE};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;

use crate::{Error, Result};

/// Which login protocol produced a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoginMode {
    /// Two-factor login used by the web app; authenticated by cookies.
    #[default]
    Web,
    /// Device-key login used by the mobile app; authenticated by a token.
    App,
}

/// Authenticated session for the Trade Republic API.
///
/// A session is immutable once issued. Cloning is cheap and shares the same
/// credential material, so one session can be handed read-only to the
/// timeline fetcher and every download worker at once. Logging in again
/// produces a new `Session`; an existing one is never updated in place.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    credential: SessionCredential,
    issued_at: DateTime<Utc>,
}

enum SessionCredential {
    /// `Cookie` header value
    Web(SecretString),
    /// Bearer session token
    App(SecretString),
}

impl Session {
    /// Build a web session from a `Cookie` header value.
    ///
    /// Normally produced by the [`SessionNegotiator`](crate::auth::SessionNegotiator);
    /// exposed for callers that manage cookies themselves.
    pub fn from_web_cookies(cookie_header: impl Into<String>) -> Self {
        Self::new(SessionCredential::Web(SecretString::from(cookie_header.into())))
    }

    /// Build an app session from a session token.
    pub fn from_app_token(session_token: impl Into<String>) -> Self {
        Self::new(SessionCredential::App(SecretString::from(session_token.into())))
    }

    fn new(credential: SessionCredential) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                credential,
                issued_at: Utc::now(),
            }),
        }
    }

    /// The protocol this session was issued by.
    pub fn mode(&self) -> LoginMode {
        match self.inner.credential {
            SessionCredential::Web(_) => LoginMode::Web,
            SessionCredential::App(_) => LoginMode::App,
        }
    }

    /// When this session was issued.
    pub fn issued_at(&self) -> DateTime<Utc> {
        self.inner.issued_at
    }

    /// Request headers authorizing a call with this session.
    pub fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        match &self.inner.credential {
            SessionCredential::Web(cookies) => {
                headers.insert(
                    COOKIE,
                    HeaderValue::from_str(cookies.expose_secret())
                        .map_err(|_| Error::InvalidInput("Invalid cookie format".to_string()))?,
                );
            }
            SessionCredential::App(token) => {
                let mut value =
                    HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
                        .map_err(|_| Error::InvalidInput("Invalid token format".to_string()))?;
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
        }
        Ok(headers)
    }

    /// Cookie header for the websocket handshake (web sessions only).
    pub(crate) fn cookie_header(&self) -> Option<&str> {
        match &self.inner.credential {
            SessionCredential::Web(cookies) => Some(cookies.expose_secret()),
            SessionCredential::App(_) => None,
        }
    }

    /// Token embedded in subscription payloads (app sessions only).
    pub(crate) fn session_token(&self) -> Option<&str> {
        match &self.inner.credential {
            SessionCredential::Web(_) => None,
            SessionCredential::App(token) => Some(token.expose_secret()),
        }
    }

    /// Returns `true` if both handles share the same issued credential.
    pub fn same_as(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("mode", &self.mode())
            .field("credential", &"[REDACTED]")
            .field("issued_at", &self.inner.issued_at)
            .finish()
    }
}
