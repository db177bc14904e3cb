//! Session tokens and browser-session cookies.
//!
//! A session token is a JWT signed with the plane's RSA key, handed to the
//! CLI after a device login and presented on later connections. Browser
//! sessions are HS256 cookies with a sliding expiry, signed with a secret
//! from the credential store.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::STANDARD, Engine};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use manifold_core::{Error, Result};

use crate::keys::SigningKeyPair;

fn unix_now() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| Error::unspecified(format!("system clock error: {e}")))
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    sub: String,
    iss: String,
    iat: u64,
    exp: u64,
}

// ── Session tokens (CLI) ─────────────────────────────────────────────────

/// Issues and verifies the base64 session tokens used by the CLI.
pub struct SessionTokenService {
    keys: Arc<SigningKeyPair>,
    issuer: String,
    ttl: Duration,
}

impl SessionTokenService {
    pub fn new(keys: Arc<SigningKeyPair>, issuer: impl Into<String>, ttl: Duration) -> Self {
        Self {
            keys,
            issuer: issuer.into(),
            ttl,
        }
    }

    /// Mint a base64-wrapped session token for a principal.
    pub fn issue(&self, principal: &str) -> Result<String> {
        let now = unix_now()?;
        let claims = SessionClaims {
            sub: principal.to_string(),
            iss: self.issuer.clone(),
            iat: now,
            exp: now + self.ttl.as_secs(),
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.keys.kid().to_string());
        let jwt = jsonwebtoken::encode(&header, &claims, self.keys.encoding_key())
            .map_err(|e| Error::unspecified(format!("sign session token: {e}")))?;
        Ok(STANDARD.encode(jwt))
    }

    /// Verify a base64 session token: decode, read the subject, then check
    /// the signature and expiry.
    pub fn verify(&self, token: &str) -> Result<String> {
        let jwt_bytes = STANDARD
            .decode(token.trim())
            .map_err(|e| Error::unauthorized(format!("decode session token: {e}")))?;
        let jwt = String::from_utf8(jwt_bytes)
            .map_err(|_| Error::unauthorized("session token is not valid UTF-8"))?;

        // The subject is read before signature verification so failures
        // can be attributed to a principal in logs.
        let subject = insecure_subject(&jwt)?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[&self.issuer]);
        validation.validate_exp = true;
        validation.validate_aud = false;
        let data =
            jsonwebtoken::decode::<SessionClaims>(&jwt, &self.keys.decoding_key()?, &validation)
                .map_err(|e| {
                    tracing::debug!(subject = %subject, "session token rejected");
                    Error::unauthorized(format!("invalid session token: {e}"))
                })?;
        Ok(data.claims.sub)
    }
}

/// Read the `sub` claim of a JWT without verifying anything.
pub fn insecure_subject(jwt: &str) -> Result<String> {
    let payload = jwt
        .split('.')
        .nth(1)
        .ok_or_else(|| Error::unauthorized("malformed JWT"))?;
    let raw = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| Error::unauthorized(format!("malformed JWT payload: {e}")))?;
    let claims: serde_json::Value = serde_json::from_slice(&raw)
        .map_err(|e| Error::unauthorized(format!("malformed JWT claims: {e}")))?;
    claims
        .get("sub")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| Error::unauthorized("JWT carries no subject"))
}

// ── Browser-session cookies ──────────────────────────────────────────────

/// Name of the browser-session cookie.
pub const SESSION_COOKIE: &str = "manifold-session";

/// A verified browser session.
#[derive(Clone, Debug)]
pub struct BrowserSession {
    pub principal: String,
    /// Seconds until expiry at verification time.
    pub remaining: u64,
}

/// Issues and verifies HS256 browser-session cookies with a sliding
/// window: verifying a cookie past half its lifetime yields a fresh one.
pub struct CookieSessionService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    ttl: Duration,
}

impl CookieSessionService {
    pub fn new(secret: &[u8], issuer: impl Into<String>, ttl: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer: issuer.into(),
            ttl,
        }
    }

    pub fn issue(&self, principal: &str) -> Result<String> {
        let now = unix_now()?;
        let claims = SessionClaims {
            sub: principal.to_string(),
            iss: self.issuer.clone(),
            iat: now,
            exp: now + self.ttl.as_secs(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| Error::unspecified(format!("sign session cookie: {e}")))
    }

    /// Verify a cookie. Returns the session and, when the sliding window
    /// calls for it, a replacement cookie to set.
    pub fn verify(&self, cookie: &str) -> Result<(BrowserSession, Option<String>)> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.validate_exp = true;
        validation.validate_aud = false;
        let data = jsonwebtoken::decode::<SessionClaims>(cookie, &self.decoding_key, &validation)
            .map_err(|e| Error::unauthorized(format!("invalid session cookie: {e}")))?;

        let now = unix_now()?;
        let remaining = data.claims.exp.saturating_sub(now);
        let session = BrowserSession {
            principal: data.claims.sub.clone(),
            remaining,
        };
        let refreshed = if remaining < self.ttl.as_secs() / 2 {
            Some(self.issue(&data.claims.sub)?)
        } else {
            None
        };
        Ok((session, refreshed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_service() -> SessionTokenService {
        let keys = Arc::new(SigningKeyPair::generate("session-test").unwrap());
        SessionTokenService::new(keys, "manifold", Duration::from_secs(3600))
    }

    #[test]
    fn session_token_round_trip() {
        let service = token_service();
        let token = service.issue("alice@example.com").unwrap();
        assert_eq!(service.verify(&token).unwrap(), "alice@example.com");
    }

    #[test]
    fn tampered_token_is_rejected() {
        let service = token_service();
        let token = service.issue("alice@example.com").unwrap();
        let other = token_service();
        let err = other.verify(&token).unwrap_err();
        assert_eq!(err.code(), "unauthorized");
    }

    #[test]
    fn insecure_subject_reads_without_keys() {
        let service = token_service();
        let token = service.issue("carol@example.com").unwrap();
        let jwt = String::from_utf8(STANDARD.decode(token).unwrap()).unwrap();
        assert_eq!(insecure_subject(&jwt).unwrap(), "carol@example.com");
    }

    #[test]
    fn cookie_round_trip_and_sliding_refresh() {
        let service = CookieSessionService::new(b"0123456789abcdef", "manifold", Duration::from_secs(3600));
        let cookie = service.issue("alice@example.com").unwrap();
        let (session, refreshed) = service.verify(&cookie).unwrap();
        assert_eq!(session.principal, "alice@example.com");
        // A fresh cookie is well inside the window; no refresh yet.
        assert!(refreshed.is_none());
        assert!(session.remaining > 1700);
    }
}
