//! API credentials and their fingerprints.
//!
//! Market data is public, so credentials only matter for private channels and
//! for telling connections apart: two feeds with different keys must not
//! share a socket. [`Credentials::fingerprint`] gives a stable, non-reversible
//! id that is safe to use as a map key or log field.
//!
//! # Example
//!
//! ```rust
//! use exchange_feed::client::auth::Credentials;
//!
//! let creds = Credentials::new("api-key", "api-secret");
//! let fingerprint = creds.fingerprint();
//!
//! assert_eq!(fingerprint, Credentials::new("api-key", "api-secret").fingerprint());
//! assert!(!format!("{:?}", creds).contains("api-secret"));
//! ```

use std::fmt;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64, Engine};
use sha2::{Digest, Sha256};

/// API key and secret for one venue account
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    api_key: String,
    api_secret: String,
}

impl Credentials {
    /// Create credentials from a key and secret
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    /// Get the API key
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Get the API secret
    pub fn api_secret(&self) -> &str {
        &self.api_secret
    }

    /// Stable id derived from key and secret
    ///
    /// Base64 (URL-safe, unpadded) of SHA-256 over `key:secret`.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.api_key.as_bytes());
        hasher.update(b":");
        hasher.update(self.api_secret.as_bytes());
        BASE64.encode(hasher.finalize())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// Fingerprint for an optional credential; anonymous connections share one
pub fn fingerprint_of(credentials: Option<&Credentials>) -> String {
    credentials
        .map(Credentials::fingerprint)
        .unwrap_or_else(|| "anonymous".to_string())
}
