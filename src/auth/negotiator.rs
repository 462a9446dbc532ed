//! The login state machine.
//!
//! [`SessionNegotiator`] only consumes code and token strings; prompting
//! the user for them is the caller's job. See `demos/export_timeline.rs`
//! for an interactive loop built on top of it.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::{AuthTransport, DeviceKey, HttpAuthTransport, LoginMode, Session, TokenStore};
use crate::client::ClientConfig;
use crate::{Credentials, Error, Result};

/// Default number of wrong codes accepted before a web login restarts.
pub const DEFAULT_MAX_CODE_ATTEMPTS: u32 = 3;

/// Configuration for a [`SessionNegotiator`].
#[derive(Debug, Clone)]
pub struct NegotiatorConfig {
    /// Which login protocol to negotiate
    pub mode: LoginMode,
    /// Wrong codes tolerated before the login must restart
    pub max_code_attempts: u32,
}

impl Default for NegotiatorConfig {
    fn default() -> Self {
        Self {
            mode: LoginMode::Web,
            max_code_attempts: DEFAULT_MAX_CODE_ATTEMPTS,
        }
    }
}

impl NegotiatorConfig {
    /// Web login with defaults.
    pub fn web() -> Self {
        Self::default()
    }

    /// App login with defaults.
    pub fn app() -> Self {
        Self {
            mode: LoginMode::App,
            ..Default::default()
        }
    }

    /// Set the number of wrong codes tolerated.
    pub fn with_max_code_attempts(mut self, attempts: u32) -> Self {
        self.max_code_attempts = attempts.max(1);
        self
    }
}

/// Explicit consent for a device reset, which unbinds the previous device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetConfirmation {
    /// The user agreed to the reset.
    Confirmed,
    /// The user declined.
    Declined,
}

#[derive(Debug)]
enum AuthState {
    Unauthenticated,
    AwaitingCode {
        process_id: String,
        sms_allowed_at: Instant,
        attempts: u32,
    },
    AwaitingSmsCode {
        process_id: String,
        attempts: u32,
    },
    AwaitingDeviceReset {
        process_id: String,
        pending_key: DeviceKey,
    },
    Authenticated(Session),
}

/// Observable negotiation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStateKind {
    /// No login in progress.
    Unauthenticated,
    /// Web login started; waiting for the code pushed to the app.
    AwaitingCode,
    /// Code resent by SMS; waiting for it.
    AwaitingSmsCode,
    /// Device reset started; waiting for the SMS token.
    AwaitingDeviceReset,
    /// A session has been issued.
    Authenticated,
}

impl AuthState {
    fn kind(&self) -> AuthStateKind {
        match self {
            AuthState::Unauthenticated => AuthStateKind::Unauthenticated,
            AuthState::AwaitingCode { .. } => AuthStateKind::AwaitingCode,
            AuthState::AwaitingSmsCode { .. } => AuthStateKind::AwaitingSmsCode,
            AuthState::AwaitingDeviceReset { .. } => AuthStateKind::AwaitingDeviceReset,
            AuthState::Authenticated(_) => AuthStateKind::Authenticated,
        }
    }
}

/// Negotiates a [`Session`] using the web or app login protocol.
///
/// # Web login
///
/// ```no_run
/// use std::sync::Arc;
/// use traderepublic_rs::auth::{FileTokenStore, NegotiatorConfig, SessionNegotiator};
/// use traderepublic_rs::{ClientConfig, Credentials};
///
/// # async fn example() -> traderepublic_rs::Result<()> {
/// let credentials = Credentials::new("+4915112345678", "1234");
/// let store = Arc::new(FileTokenStore::in_dir(".traderepublic"));
/// let mut negotiator = SessionNegotiator::new(
///     credentials,
///     store,
///     NegotiatorConfig::web(),
///     &ClientConfig::default(),
/// )?;
///
/// if !negotiator.resume_session().await? {
///     negotiator.begin_web_login().await?;
///     let code = "0000"; // read from the user
///     negotiator.complete_web_login(code).await?;
/// }
/// # Ok(())
/// # }
/// ```
pub struct SessionNegotiator<T: AuthTransport = HttpAuthTransport> {
    transport: T,
    store: Arc<dyn TokenStore>,
    credentials: Credentials,
    config: NegotiatorConfig,
    state: AuthState,
}

impl SessionNegotiator<HttpAuthTransport> {
    /// Create a negotiator talking to the live service.
    pub fn new(
        credentials: Credentials,
        store: Arc<dyn TokenStore>,
        config: NegotiatorConfig,
        client_config: &ClientConfig,
    ) -> Result<Self> {
        let transport = HttpAuthTransport::new(client_config)?;
        Ok(Self::with_transport(transport, credentials, store, config))
    }
}

impl<T: AuthTransport> SessionNegotiator<T> {
    /// Create a negotiator over a custom transport.
    pub fn with_transport(
        transport: T,
        credentials: Credentials,
        store: Arc<dyn TokenStore>,
        config: NegotiatorConfig,
    ) -> Self {
        Self {
            transport,
            store,
            credentials,
            config,
            state: AuthState::Unauthenticated,
        }
    }

    /// The current state.
    pub fn state(&self) -> AuthStateKind {
        self.state.kind()
    }

    /// The login protocol in use.
    pub fn mode(&self) -> LoginMode {
        self.config.mode
    }

    /// The issued session, once authenticated.
    pub fn session(&self) -> Option<&Session> {
        match &self.state {
            AuthState::Authenticated(session) => Some(session),
            _ => None,
        }
    }

    /// Drop the current session or abandon a login in progress.
    pub fn logout(&mut self) {
        self.state = AuthState::Unauthenticated;
    }

    fn require_mode(&self, mode: LoginMode) -> Result<()> {
        if self.config.mode != mode {
            return Err(Error::Configuration(format!(
                "operation requires {mode:?} login, negotiator is configured for {:?}",
                self.config.mode
            )));
        }
        Ok(())
    }

    fn persist_session_token(&self, token: &str) {
        if let Err(e) = self.store.save_session_token(token.as_bytes()) {
            warn!(error = %e, "failed to persist session token");
        }
    }

    /// Try to resume a stored web session.
    ///
    /// Returns `Ok(false)` when there is nothing to resume or the service
    /// rejects the stored token; the negotiator is then `Unauthenticated`
    /// and a fresh login may begin. App logins have no resumable session.
    #[instrument(skip(self))]
    pub async fn resume_session(&mut self) -> Result<bool> {
        if self.config.mode != LoginMode::Web {
            return Ok(false);
        }
        let Some(blob) = self.store.load_session_token()? else {
            debug!("no stored session");
            return Ok(false);
        };
        let Ok(cookies) = String::from_utf8(blob) else {
            warn!("stored session token is not valid UTF-8, ignoring it");
            return Ok(false);
        };

        match self.transport.refresh_web_session(&cookies).await? {
            Some(refreshed) => {
                self.persist_session_token(&refreshed);
                self.state = AuthState::Authenticated(Session::from_web_cookies(refreshed));
                info!("resumed stored session");
                Ok(true)
            }
            None => {
                self.state = AuthState::Unauthenticated;
                info!("stored session expired");
                Ok(false)
            }
        }
    }

    /// Start a web login. Returns the seconds until an SMS may be requested.
    ///
    /// Any login in progress is abandoned.
    #[instrument(skip(self))]
    pub async fn begin_web_login(&mut self) -> Result<u64> {
        self.require_mode(LoginMode::Web)?;
        self.credentials.validate()?;
        self.state = AuthState::Unauthenticated;

        let challenge = self.transport.begin_web_login(&self.credentials).await?;
        let countdown = challenge.countdown_in_seconds;
        info!(countdown_secs = countdown, "code sent to app");

        self.state = AuthState::AwaitingCode {
            process_id: challenge.process_id,
            sms_allowed_at: Instant::now() + Duration::from_secs(countdown),
            attempts: 0,
        };
        Ok(countdown)
    }

    /// Remaining wait before [`resend_as_sms`](Self::resend_as_sms) may
    /// contact the service, while a code is awaited.
    pub fn sms_countdown_remaining(&self) -> Option<Duration> {
        match &self.state {
            AuthState::AwaitingCode { sms_allowed_at, .. } => {
                Some(sms_allowed_at.saturating_duration_since(Instant::now()))
            }
            _ => None,
        }
    }

    /// Ask for the code by SMS, waiting out the service's countdown first.
    #[instrument(skip(self))]
    pub async fn resend_as_sms(&mut self) -> Result<()> {
        let AuthState::AwaitingCode {
            process_id,
            sms_allowed_at,
            attempts,
        } = &self.state
        else {
            return Err(Error::InvalidInput(format!(
                "SMS resend needs a pending app code, state is {:?}",
                self.state.kind()
            )));
        };
        let (process_id, sms_allowed_at, attempts) = (process_id.clone(), *sms_allowed_at, *attempts);

        let wait = sms_allowed_at.saturating_duration_since(Instant::now());
        if !wait.is_zero() {
            debug!(wait_secs = wait.as_secs(), "waiting for SMS countdown");
            tokio::time::sleep_until(sms_allowed_at).await;
        }

        self.transport.resend_web_login(&process_id).await?;
        info!("code resent by SMS");
        self.state = AuthState::AwaitingSmsCode {
            process_id,
            attempts,
        };
        Ok(())
    }

    /// Submit the code from the app or SMS.
    ///
    /// A wrong code returns [`Error::Authentication`] and may be retried
    /// until `max_code_attempts` is reached, after which the login must be
    /// started again.
    #[instrument(skip(self, code))]
    pub async fn complete_web_login(&mut self, code: &str) -> Result<Session> {
        let (process_id, attempts) = match &self.state {
            AuthState::AwaitingCode {
                process_id,
                attempts,
                ..
            }
            | AuthState::AwaitingSmsCode {
                process_id,
                attempts,
            } => (process_id.clone(), *attempts),
            other => {
                return Err(Error::InvalidInput(format!(
                    "no web login in progress, state is {:?}",
                    other.kind()
                )))
            }
        };
        let code = code.trim();
        if code.is_empty() {
            return Err(Error::InvalidInput("code is empty".to_string()));
        }
        if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::InvalidInput(
                "code may only contain letters and digits".to_string(),
            ));
        }

        match self.transport.complete_web_login(&process_id, code).await {
            Ok(cookies) => {
                self.persist_session_token(&cookies);
                let session = Session::from_web_cookies(cookies);
                self.state = AuthState::Authenticated(session.clone());
                info!("web login complete");
                Ok(session)
            }
            Err(Error::Authentication(message)) => {
                let attempts = attempts + 1;
                if attempts >= self.config.max_code_attempts {
                    warn!(attempts, "code attempts exhausted");
                    self.state = AuthState::Unauthenticated;
                    return Err(Error::Authentication(format!(
                        "{message}; {attempts} attempts used, start the login again"
                    )));
                }
                if let AuthState::AwaitingCode { attempts: count, .. }
                | AuthState::AwaitingSmsCode { attempts: count, .. } = &mut self.state
                {
                    *count = attempts;
                }
                Err(Error::Authentication(message))
            }
            Err(e) => Err(e),
        }
    }

    /// Log in with the stored device key.
    ///
    /// # Errors
    ///
    /// [`Error::StaleCredential`] if no usable key is stored or the service
    /// rejects it; recover with [`initiate_device_reset`](Self::initiate_device_reset).
    /// A rejected PIN is [`Error::Authentication`] and does not call for a reset.
    #[instrument(skip(self))]
    pub async fn login_app(&mut self) -> Result<Session> {
        self.require_mode(LoginMode::App)?;
        self.credentials.validate()?;

        let blob = self.store.load_device_key()?.ok_or_else(|| {
            Error::StaleCredential("no device key stored; a device reset is required".to_string())
        })?;
        let key = DeviceKey::from_bytes(&blob)?;
        self.login_with_key(&key).await
    }

    async fn login_with_key(&mut self, key: &DeviceKey) -> Result<Session> {
        let tokens = self.transport.login_app(&self.credentials, key).await?;
        let session = Session::from_app_token(tokens.session_token);
        self.state = AuthState::Authenticated(session.clone());
        info!("app login complete");
        Ok(session)
    }

    /// Start binding a new device key. The service sends a token by SMS.
    ///
    /// Destructive: the previously bound device stops working.
    #[instrument(skip(self))]
    pub async fn initiate_device_reset(&mut self, confirmation: ResetConfirmation) -> Result<()> {
        if confirmation != ResetConfirmation::Confirmed {
            return Err(Error::InvalidInput("device reset was not confirmed".to_string()));
        }
        self.require_mode(LoginMode::App)?;
        self.credentials.validate()?;

        let pending_key = DeviceKey::generate();
        let process_id = self.transport.initiate_device_reset(&self.credentials).await?;
        info!("device reset started, token sent by SMS");
        self.state = AuthState::AwaitingDeviceReset {
            process_id,
            pending_key,
        };
        Ok(())
    }

    /// Finish a device reset with the SMS token, then log in with the new key.
    #[instrument(skip(self, token))]
    pub async fn complete_device_reset(&mut self, token: &str) -> Result<Session> {
        let AuthState::AwaitingDeviceReset {
            process_id,
            pending_key,
        } = &self.state
        else {
            return Err(Error::InvalidInput(format!(
                "no device reset in progress, state is {:?}",
                self.state.kind()
            )));
        };
        let (process_id, key) = (process_id.clone(), pending_key.clone());

        self.transport
            .complete_device_reset(&process_id, token.trim(), &key)
            .await?;
        self.store.save_device_key(&key.to_bytes())?;
        info!("device key bound");

        self.state = AuthState::Unauthenticated;
        self.login_with_key(&key).await
    }
}

impl<T: AuthTransport> std::fmt::Debug for SessionNegotiator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionNegotiator")
            .field("mode", &self.config.mode)
            .field("credentials", &self.credentials)
            .field("state", &self.state.kind())
            .finish()
    }
}
