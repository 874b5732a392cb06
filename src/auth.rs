//! Signed bearer tokens carrying a caller identity
//!
//! Token format: `base64url(json claims).base64url(hmac_sha256(json claims))`.
//! The identity provider that issues tokens in production only needs the
//! shared secret; `issue_token` exists for tests and the dev token endpoint.

use axum::http::{header, HeaderMap};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Secret used when TYPERACE_AUTH_SECRET is unset (never use in production)
const DEV_SECRET: &str = "typerace-dev-secret";

/// A verified caller identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable subject id from the identity provider
    pub subject: String,
    /// Display name, if the provider knows one
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum AuthError {
    #[error("Malformed token")]
    Malformed,

    #[error("Bad token signature")]
    BadSignature,

    #[error("Invalid token claims: {0}")]
    InvalidClaims(String),
}

/// Authentication configuration
#[derive(Clone)]
pub struct AuthConfig {
    secret: Vec<u8>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig").finish_non_exhaustive()
    }
}

impl Default for AuthConfig {
    /// Dev secret, for tests and local play
    fn default() -> Self {
        Self::new(DEV_SECRET)
    }
}

impl AuthConfig {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Load auth config from environment variables
    pub fn from_env() -> Self {
        let secret = std::env::var("TYPERACE_AUTH_SECRET")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        match secret {
            Some(secret) => {
                tracing::info!("Token verification enabled");
                Self::new(secret)
            }
            None => {
                tracing::warn!(
                    "TYPERACE_AUTH_SECRET not set - using the built-in dev secret, tokens are forgeable!"
                );
                Self::new(DEV_SECRET)
            }
        }
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length")
    }

    /// Issue a token for an identity
    pub fn issue_token(&self, identity: &Identity) -> String {
        let payload = serde_json::to_vec(identity).unwrap_or_default();
        let mut mac = self.mac();
        mac.update(&payload);
        let sig = mac.finalize().into_bytes();
        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(sig)
        )
    }

    /// Verify a token and return the identity it carries
    pub fn verify_token(&self, token: &str) -> Result<Identity, AuthError> {
        let (payload_b64, sig_b64) = token.trim().split_once('.').ok_or(AuthError::Malformed)?;
        if sig_b64.contains('.') {
            return Err(AuthError::Malformed);
        }

        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| AuthError::Malformed)?;
        let sig = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| AuthError::Malformed)?;

        let mut mac = self.mac();
        mac.update(&payload);
        // Constant-time comparison
        mac.verify_slice(&sig)
            .map_err(|_| AuthError::BadSignature)?;

        let identity: Identity = serde_json::from_slice(&payload)
            .map_err(|e| AuthError::InvalidClaims(e.to_string()))?;
        if identity.subject.trim().is_empty() {
            return Err(AuthError::InvalidClaims("empty subject".to_string()));
        }
        Ok(identity)
    }

    /// Resolve an optional token into an optional identity.
    ///
    /// Invalid tokens are logged and treated as unauthenticated.
    pub fn identify(&self, token: Option<&str>) -> Option<Identity> {
        let token = token.filter(|t| !t.trim().is_empty())?;
        match self.verify_token(token) {
            Ok(identity) => Some(identity),
            Err(e) => {
                tracing::warn!("Rejected token: {}", e);
                None
            }
        }
    }
}

/// Extract a bearer token from the Authorization header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}
