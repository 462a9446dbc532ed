//! Login credentials.

use secrecy::{ExposeSecret, SecretString};
use std::fmt;

use crate::{Error, Result};

/// Phone number and PIN used to log in.
///
/// The PIN is kept in a [`SecretString`] and never shows up in `Debug`
/// output. The core never persists credentials.
#[derive(Clone)]
pub struct Credentials {
    phone: String,
    pin: SecretString,
}

impl Credentials {
    /// Create credentials from a phone number (international format) and PIN.
    pub fn new(phone: impl Into<String>, pin: impl Into<String>) -> Self {
        Self {
            phone: phone.into().trim().to_string(),
            pin: SecretString::from(pin.into().trim().to_string()),
        }
    }

    /// Parse a credential text: phone number on the first line, PIN on the
    /// second.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if there are fewer than two lines or
    /// either field is empty.
    ///
    /// ```
    /// use traderepublic_rs::Credentials;
    ///
    /// let creds = Credentials::from_lines("+4915112345678\n1234\n").unwrap();
    /// assert_eq!(creds.phone(), "+4915112345678");
    /// assert!(Credentials::from_lines("+4915112345678").is_err());
    /// ```
    pub fn from_lines(text: &str) -> Result<Self> {
        let mut lines = text.lines();
        let (Some(phone), Some(pin)) = (lines.next(), lines.next()) else {
            return Err(Error::Configuration(
                "credential text needs two lines: phone number and PIN".to_string(),
            ));
        };
        let creds = Self::new(phone, pin);
        creds.validate()?;
        Ok(creds)
    }

    /// Check that both fields are present.
    pub fn validate(&self) -> Result<()> {
        if self.phone.is_empty() {
            return Err(Error::Configuration("phone number is empty".to_string()));
        }
        if self.pin.expose_secret().is_empty() {
            return Err(Error::Configuration("PIN is empty".to_string()));
        }
        Ok(())
    }

    /// The phone number.
    pub fn phone(&self) -> &str {
        &self.phone
    }

    pub(crate) fn pin(&self) -> &str {
        self.pin.expose_secret()
    }

    /// Request body shared by the login endpoints.
    pub(crate) fn login_body(&self) -> serde_json::Value {
        serde_json::json!({
            "phoneNumber": self.phone,
            "pin": self.pin(),
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("phone", &self.phone)
            .field("pin", &"[REDACTED]")
            .finish()
    }
}
