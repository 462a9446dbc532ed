//! HTTP calls behind the login protocols.

use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, instrument};
use url::Url;

use super::DeviceKey;
use crate::client::ClientConfig;
use crate::error::api_error_message;
use crate::{Credentials, Endpoints, Error, Result};

/// First step of a web login: the service has sent a code to the app.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebLoginChallenge {
    /// Identifies this login attempt in follow-up calls
    pub process_id: String,
    /// Seconds until the code may be resent as SMS
    #[serde(default)]
    pub countdown_in_seconds: u64,
}

/// Tokens issued by an app login.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppTokens {
    /// Bearer token for subsequent calls
    pub session_token: String,
    /// Long-lived refresh token
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessStarted {
    process_id: String,
}

/// The remote side of session negotiation.
///
/// [`SessionNegotiator`](super::SessionNegotiator) drives the login state
/// machine against this trait; [`HttpAuthTransport`] talks to the real
/// service.
#[async_trait]
pub trait AuthTransport: Send + Sync {
    /// Validate a stored web cookie blob. Returns the refreshed blob, or
    /// `None` if the service no longer accepts it.
    async fn refresh_web_session(&self, cookies: &str) -> Result<Option<String>>;

    /// Start a web login; the service pushes a code to the app.
    async fn begin_web_login(&self, credentials: &Credentials) -> Result<WebLoginChallenge>;

    /// Ask the service to resend the code as SMS.
    async fn resend_web_login(&self, process_id: &str) -> Result<()>;

    /// Submit the code. Returns the session cookie blob.
    async fn complete_web_login(&self, process_id: &str, code: &str) -> Result<String>;

    /// Log in with a device key.
    async fn login_app(&self, credentials: &Credentials, key: &DeviceKey) -> Result<AppTokens>;

    /// Start a device reset; the service sends a token by SMS.
    async fn initiate_device_reset(&self, credentials: &Credentials) -> Result<String>;

    /// Bind `key` to the account using the SMS token.
    async fn complete_device_reset(
        &self,
        process_id: &str,
        token: &str,
        key: &DeviceKey,
    ) -> Result<()>;
}

/// [`AuthTransport`] over HTTPS with a cookie jar.
pub struct HttpAuthTransport {
    http: reqwest::Client,
    jar: Arc<Jar>,
    endpoints: Endpoints,
}

impl HttpAuthTransport {
    /// Create a transport from client configuration.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let jar = Arc::new(Jar::default());
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .cookie_provider(jar.clone())
            .build()?;

        Ok(Self {
            http,
            jar,
            endpoints: config.endpoints.clone(),
        })
    }

    fn base_url(&self) -> Result<Url> {
        Ok(Url::parse(self.endpoints.api_base_url())?)
    }

    /// Current cookies for the API host, as a `Cookie` header value.
    fn cookie_header(&self) -> Result<Option<String>> {
        let url = self.base_url()?;
        Ok(self
            .jar
            .cookies(&url)
            .and_then(|value| value.to_str().ok().map(String::from)))
    }

    fn restore_cookies(&self, cookies: &str) -> Result<()> {
        let url = self.base_url()?;
        for pair in cookies.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            self.jar.add_cookie_str(pair, &url);
        }
        Ok(())
    }
}

impl std::fmt::Debug for HttpAuthTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpAuthTransport")
            .field("endpoints", &self.endpoints)
            .finish()
    }
}

/// Map a non-success response to an error. Client errors go through
/// `on_client_error`; the caller decides what a 4xx means at its step.
async fn check(response: Response, on_client_error: fn(String) -> Error) -> Result<Response> {
    check_with(response, |status, body| {
        on_client_error(api_error_message(body).unwrap_or_else(|| status.to_string()))
    })
    .await
}

/// Like [`check`], with the 4xx mapping given the status and error body.
async fn check_with(
    response: Response,
    on_client_error: impl FnOnce(StatusCode, &serde_json::Value) -> Error,
) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let body: serde_json::Value = response.json().await.unwrap_or_default();

    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(Error::RateLimited {
            retry_after_secs: retry_after.unwrap_or(60),
        });
    }
    if status.is_client_error() {
        return Err(on_client_error(status, &body));
    }
    Err(Error::from_api_response(status.as_u16(), &body))
}

/// Error codes naming the device key or its signature.
const DEVICE_ERROR_MARKERS: [&str; 3] = ["DEVICE", "KEY", "SIGNATURE"];

/// Map a rejected app login.
///
/// Only a rejection of the device key (or a bare 401/403 without an error
/// code) means the key is stale; anything else is a credential problem and
/// must not lead into a device reset.
fn app_login_error(status: StatusCode, body: &serde_json::Value) -> Error {
    let code = body
        .get("errors")
        .and_then(|e| e.get(0))
        .and_then(|e| e.get("errorCode"))
        .and_then(|c| c.as_str())
        .map(str::to_ascii_uppercase);
    let message = api_error_message(body).unwrap_or_else(|| status.to_string());

    match code {
        Some(code) if DEVICE_ERROR_MARKERS.iter().any(|m| code.contains(m)) => {
            Error::StaleCredential(message)
        }
        None if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => {
            Error::StaleCredential(message)
        }
        Some(_) if status == StatusCode::UNAUTHORIZED => Error::Authentication(message),
        _ => Error::Configuration(message),
    }
}

async fn read_json<T: DeserializeOwned>(
    response: Response,
    on_client_error: fn(String) -> Error,
) -> Result<T> {
    let response = check(response, on_client_error).await?;
    Ok(response.json().await?)
}

#[async_trait]
impl AuthTransport for HttpAuthTransport {
    #[instrument(skip_all)]
    async fn refresh_web_session(&self, cookies: &str) -> Result<Option<String>> {
        self.restore_cookies(cookies)?;
        let url = self.endpoints.api_url("/api/v1/auth/web/session");
        let response = self.http.get(&url).send().await?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                debug!("stored web session rejected");
                Ok(None)
            }
            _ => {
                check(response, Error::Authentication).await?;
                Ok(Some(self.cookie_header()?.unwrap_or_else(|| cookies.to_string())))
            }
        }
    }

    #[instrument(skip_all)]
    async fn begin_web_login(&self, credentials: &Credentials) -> Result<WebLoginChallenge> {
        let url = self.endpoints.api_url("/api/v1/auth/web/login");
        let response = self
            .http
            .post(&url)
            .json(&credentials.login_body())
            .send()
            .await?;
        read_json(response, Error::Configuration).await
    }

    #[instrument(skip(self))]
    async fn resend_web_login(&self, process_id: &str) -> Result<()> {
        let url = self
            .endpoints
            .api_url(&format!(
                "/api/v1/auth/web/login/{}/resend",
                urlencoding::encode(process_id)
            ));
        let response = self.http.post(&url).send().await?;
        check(response, Error::Authentication).await?;
        Ok(())
    }

    #[instrument(skip(self, code))]
    async fn complete_web_login(&self, process_id: &str, code: &str) -> Result<String> {
        let url = self
            .endpoints
            .api_url(&format!(
                "/api/v1/auth/web/login/{}/{}",
                urlencoding::encode(process_id),
                urlencoding::encode(code)
            ));
        let response = self.http.post(&url).send().await?;
        check(response, Error::Authentication).await?;

        self.cookie_header()?.ok_or_else(|| {
            Error::Authentication("login accepted but no session cookie was set".to_string())
        })
    }

    #[instrument(skip_all)]
    async fn login_app(&self, credentials: &Credentials, key: &DeviceKey) -> Result<AppTokens> {
        let url = self.endpoints.api_url("/api/v1/auth/login");
        let body = serde_json::to_string(&credentials.login_body())?;
        let timestamp = chrono::Utc::now().timestamp_millis();

        let mut request = self
            .http
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        for (name, value) in key.signature_headers(timestamp, &body)? {
            request = request.header(name, value);
        }
        let response = request.body(body).send().await?;
        let response = check_with(response, app_login_error).await?;
        Ok(response.json().await?)
    }

    #[instrument(skip_all)]
    async fn initiate_device_reset(&self, credentials: &Credentials) -> Result<String> {
        let url = self.endpoints.api_url("/api/v1/auth/account/reset/device");
        let response = self
            .http
            .post(&url)
            .json(&credentials.login_body())
            .send()
            .await?;
        let started: ProcessStarted = read_json(response, Error::Configuration).await?;
        Ok(started.process_id)
    }

    #[instrument(skip(self, token, key))]
    async fn complete_device_reset(
        &self,
        process_id: &str,
        token: &str,
        key: &DeviceKey,
    ) -> Result<()> {
        let url = self
            .endpoints
            .api_url(&format!(
                "/api/v1/auth/account/reset/device/{}/key",
                urlencoding::encode(process_id)
            ));
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "code": token,
                "deviceKey": key.public_key_base64(),
            }))
            .send()
            .await?;
        check(response, Error::Authentication).await?;
        Ok(())
    }
}
