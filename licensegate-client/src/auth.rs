//! Request authentication
//!
//! Every request to the authority carries four headers proving which
//! instance sent it. The signature covers the canonical string
//!
//! ```text
//! METHOD\nPATH\nhex(SHA256(body))\nUNIX_SECONDS\nNONCE
//! ```
//!
//! and the instance identity is the hex SHA-256 fingerprint of the public key.

use crate::error::{ClientError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

pub const HEADER_PUBLIC_KEY: &str = "X-LCC-PublicKey";
pub const HEADER_TIMESTAMP: &str = "X-LCC-Timestamp";
pub const HEADER_NONCE: &str = "X-LCC-Nonce";
pub const HEADER_SIGNATURE: &str = "X-LCC-Signature";

/// Oldest accepted signature age
const MAX_SIGNATURE_AGE_SECS: i64 = 300;
/// Furthest accepted signature timestamp in the future
const MAX_CLOCK_SKEW_SECS: i64 = 60;

/// Attaches proof of identity to outbound authority requests
pub trait RequestAuthenticator: Send + Sync {
    /// Stable identity of this instance
    fn identity(&self) -> &str;

    /// Public key as sent during registration
    fn public_key(&self) -> String;

    /// Produce the authentication headers for one request
    fn authenticate(&self, method: &str, path: &str, body: &[u8]) -> Result<SignedRequest>;
}

/// The four authentication header values of one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    pub public_key: String,
    pub timestamp: i64,
    pub nonce: String,
    pub signature: String,
}

impl SignedRequest {
    pub fn headers(&self) -> [(&'static str, String); 4] {
        [
            (HEADER_PUBLIC_KEY, self.public_key.clone()),
            (HEADER_TIMESTAMP, self.timestamp.to_string()),
            (HEADER_NONCE, self.nonce.clone()),
            (HEADER_SIGNATURE, self.signature.clone()),
        ]
    }

    /// Rebuild from received headers; `lookup` returns a header value by name
    pub fn from_headers<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| ClientError::Auth(format!("missing header {name}")))
        };

        let timestamp = get(HEADER_TIMESTAMP)?
            .parse()
            .map_err(|e| ClientError::Auth(format!("invalid timestamp: {e}")))?;

        Ok(SignedRequest {
            public_key: get(HEADER_PUBLIC_KEY)?,
            timestamp,
            nonce: get(HEADER_NONCE)?,
            signature: get(HEADER_SIGNATURE)?,
        })
    }
}

/// Hex SHA-256 of a request body
pub fn body_hash(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

/// The string that gets signed for one request
pub fn canonical_string(method: &str, path: &str, body: &[u8], timestamp: i64, nonce: &str) -> String {
    format!(
        "{}\n{}\n{}\n{}\n{}",
        method.to_ascii_uppercase(),
        path,
        body_hash(body),
        timestamp,
        nonce
    )
}

/// Check a received request's signature and freshness
///
/// # Errors
///
/// Returns [`ClientError::Auth`] if the timestamp is outside the accepted
/// window, the key or signature cannot be decoded, or the signature does not
/// match.
pub fn verify_request(
    signed: &SignedRequest,
    method: &str,
    path: &str,
    body: &[u8],
    now_unix: i64,
) -> Result<()> {
    let age = now_unix
        .checked_sub(signed.timestamp)
        .ok_or_else(|| ClientError::Auth("timestamp out of range".to_string()))?;
    if age > MAX_SIGNATURE_AGE_SECS || age < -MAX_CLOCK_SKEW_SECS {
        return Err(ClientError::Auth(format!(
            "timestamp out of range (diff: {age} seconds)"
        )));
    }

    let key_bytes: [u8; 32] = STANDARD
        .decode(&signed.public_key)
        .map_err(|e| ClientError::Auth(format!("failed to decode public key: {e}")))?
        .try_into()
        .map_err(|_| ClientError::Auth("public key must be 32 bytes".to_string()))?;
    let verifying_key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| ClientError::Auth(format!("invalid public key: {e}")))?;

    let signature_bytes = hex::decode(&signed.signature)
        .map_err(|e| ClientError::Auth(format!("failed to decode signature: {e}")))?;
    let signature = Signature::from_slice(&signature_bytes)
        .map_err(|e| ClientError::Auth(format!("invalid signature: {e}")))?;

    let canonical = canonical_string(method, path, body, signed.timestamp, &signed.nonce);
    verifying_key
        .verify(canonical.as_bytes(), &signature)
        .map_err(|_| ClientError::Auth("signature verification failed".to_string()))
}

/// Identity of a public key: hex SHA-256 of its bytes
pub fn fingerprint(key: &VerifyingKey) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

pub(crate) fn unix_now() -> Result<i64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .map_err(|e| ClientError::Auth(format!("system clock before unix epoch: {e}")))
}

/// Ed25519 request signer
///
/// # Example
///
/// ```
/// use licensegate_client::auth::{KeyPairAuthenticator, RequestAuthenticator, verify_request};
///
/// let signer = KeyPairAuthenticator::generate();
/// let signed = signer.authenticate("POST", "/api/v1/sdk/usage", b"{}").unwrap();
///
/// verify_request(&signed, "POST", "/api/v1/sdk/usage", b"{}", signed.timestamp).unwrap();
/// assert_eq!(signer.identity().len(), 64);
/// ```
pub struct KeyPairAuthenticator {
    signing_key: SigningKey,
    identity: String,
}

impl KeyPairAuthenticator {
    /// Fresh random key pair
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut rand::thread_rng()))
    }

    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(secret))
    }

    /// Load from a hex-encoded 32-byte secret
    pub fn from_hex(secret_hex: &str) -> Result<Self> {
        let bytes: [u8; 32] = hex::decode(secret_hex.trim())
            .map_err(|e| ClientError::Auth(format!("invalid secret key hex: {e}")))?
            .try_into()
            .map_err(|_| ClientError::Auth("secret key must be 32 bytes".to_string()))?;
        Ok(Self::from_secret_bytes(&bytes))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let identity = fingerprint(&signing_key.verifying_key());
        KeyPairAuthenticator {
            signing_key,
            identity,
        }
    }

    /// Hex-encoded secret for persisting the key pair
    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    fn sign_at(&self, method: &str, path: &str, body: &[u8], timestamp: i64, nonce: String) -> SignedRequest {
        let canonical = canonical_string(method, path, body, timestamp, &nonce);
        let signature = self.signing_key.sign(canonical.as_bytes());

        SignedRequest {
            public_key: self.public_key(),
            timestamp,
            nonce,
            signature: hex::encode(signature.to_bytes()),
        }
    }
}

impl RequestAuthenticator for KeyPairAuthenticator {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn public_key(&self) -> String {
        STANDARD.encode(self.signing_key.verifying_key().as_bytes())
    }

    fn authenticate(&self, method: &str, path: &str, body: &[u8]) -> Result<SignedRequest> {
        let timestamp = unix_now()?;
        let nonce = uuid::Uuid::new_v4().to_string();
        Ok(self.sign_at(method, path, body, timestamp, nonce))
    }
}

impl fmt::Debug for KeyPairAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPairAuthenticator")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}
