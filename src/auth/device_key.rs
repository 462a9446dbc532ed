//! Device key used by the app login protocol.
//!
//! The app protocol binds a P-256 key pair to the account during device
//! reset and signs every login request with it. Requests carry
//! `X-Zeta-Timestamp` and `X-Zeta-Signature` headers, the signature being
//! ECDSA over SHA-512 of `"{timestamp}.{body}"`, DER encoded, base64.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use p256::ecdsa::signature::hazmat::PrehashSigner;
use p256::ecdsa::{Signature, SigningKey};
use sha2::{Digest, Sha512};

use crate::{Error, Result};

/// A device signing key.
#[derive(Clone)]
pub struct DeviceKey {
    key: SigningKey,
}

impl DeviceKey {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        Self {
            key: SigningKey::random(&mut rand::rngs::OsRng),
        }
    }

    /// Decode a key previously produced by [`DeviceKey::to_bytes`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleCredential`] if the blob is not a valid key;
    /// the only way forward is a device reset.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        SigningKey::from_slice(bytes)
            .map(|key| Self { key })
            .map_err(|_| Error::StaleCredential("stored device key is not a valid P-256 key".to_string()))
    }

    /// Serialize the private scalar.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.key.to_bytes().to_vec()
    }

    /// Base64 of the uncompressed SEC1 public key, as sent during reset.
    pub fn public_key_base64(&self) -> String {
        let point = self.key.verifying_key().to_encoded_point(false);
        BASE64.encode(point.as_bytes())
    }

    /// Sign a message, returning the base64 DER signature.
    pub fn sign(&self, message: &[u8]) -> Result<String> {
        let digest = Sha512::digest(message);
        let signature: Signature = self
            .key
            .sign_prehash(&digest)
            .map_err(|e| Error::InvalidInput(format!("signing failed: {e}")))?;
        Ok(BASE64.encode(signature.to_der().as_bytes()))
    }

    /// Signature headers for a request body sent at `timestamp_millis`.
    pub(crate) fn signature_headers(
        &self,
        timestamp_millis: i64,
        body: &str,
    ) -> Result<[(&'static str, String); 2]> {
        let signature = self.sign(format!("{timestamp_millis}.{body}").as_bytes())?;
        Ok([
            ("X-Zeta-Timestamp", timestamp_millis.to_string()),
            ("X-Zeta-Signature", signature),
        ])
    }
}

impl std::fmt::Debug for DeviceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceKey")
            .field("public_key", &self.public_key_base64())
            .finish()
    }
}
