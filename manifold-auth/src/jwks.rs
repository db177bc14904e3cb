//! JWKS cache for validating tokens issued by the OIDC provider.
//!
//! Keys are indexed by `kid`. A miss triggers a refresh from the JWKS
//! endpoint, rate-limited so a flood of bad tokens cannot hammer the
//! provider.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};

use manifold_core::{Error, Result};

/// Raw JWK structure as returned by a JWKS endpoint. Only the fields we
/// need are captured.
#[derive(Debug, Clone, Deserialize)]
struct Jwk {
    kid: Option<String>,
    kty: String,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<Jwk>,
}

/// Stored raw components so a `DecodingKey` can be rebuilt on demand
/// (`DecodingKey` does not implement `Clone` usefully across key types).
#[derive(Debug, Clone)]
struct CachedJwk {
    kty: String,
    n: Option<String>,
    e: Option<String>,
}

impl CachedJwk {
    fn to_decoding_key(&self) -> Result<DecodingKey> {
        match self.kty.as_str() {
            "RSA" => {
                let n = self
                    .n
                    .as_deref()
                    .ok_or_else(|| Error::unauthorized("RSA key missing 'n' component"))?;
                let e = self
                    .e
                    .as_deref()
                    .ok_or_else(|| Error::unauthorized("RSA key missing 'e' component"))?;
                DecodingKey::from_rsa_components(n, e)
                    .map_err(|err| Error::unauthorized(format!("bad RSA key components: {err}")))
            }
            other => Err(Error::unauthorized(format!("unsupported key type {other:?}"))),
        }
    }
}

struct CacheInner {
    keys: HashMap<String, CachedJwk>,
    last_refresh: Option<Instant>,
    last_refresh_attempt: Option<Instant>,
}

/// JWKS cache with TTL and a minimum interval between refresh attempts.
pub struct JwksCache {
    inner: Arc<RwLock<CacheInner>>,
    jwks_url: String,
    ttl: Duration,
    min_refresh_interval: Duration,
    client: reqwest::Client,
    refresh_lock: Mutex<()>,
}

impl JwksCache {
    pub fn new(jwks_url: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(CacheInner {
                keys: HashMap::new(),
                last_refresh: None,
                last_refresh_attempt: None,
            })),
            jwks_url: jwks_url.into(),
            ttl: Duration::from_secs(3600),
            min_refresh_interval: Duration::from_secs(30),
            client: reqwest::Client::new(),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Retrieve the decoding key for `kid`, refreshing on a miss.
    pub async fn get_key(&self, kid: &str) -> Result<DecodingKey> {
        let mut needs_refresh = false;
        let mut force = false;
        {
            let cache = self.inner.read().await;
            if let Some(jwk) = cache.keys.get(kid) {
                if is_stale(cache.last_refresh, self.ttl) {
                    needs_refresh = true;
                } else {
                    return jwk.to_decoding_key();
                }
            } else {
                needs_refresh = true;
                force = true;
            }
        }

        if needs_refresh {
            self.try_refresh(force).await?;
        }

        let cache = self.inner.read().await;
        cache
            .keys
            .get(kid)
            .ok_or_else(|| Error::unauthorized(format!("unknown key id {kid:?}")))?
            .to_decoding_key()
    }

    async fn refresh(&self) -> Result<()> {
        let response = self
            .client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| Error::connection_failed(format!("fetch JWKS: {e}")))?
            .error_for_status()
            .map_err(|e| Error::connection_failed(format!("fetch JWKS: {e}")))?;
        let jwks: JwksResponse = response
            .json()
            .await
            .map_err(|e| Error::unauthorized(format!("parse JWKS: {e}")))?;

        let mut keys = HashMap::new();
        for jwk in jwks.keys {
            if let Some(kid) = &jwk.kid {
                keys.insert(
                    kid.clone(),
                    CachedJwk {
                        kty: jwk.kty.clone(),
                        n: jwk.n.clone(),
                        e: jwk.e.clone(),
                    },
                );
            }
        }

        let now = Instant::now();
        let mut cache = self.inner.write().await;
        cache.keys = keys;
        cache.last_refresh = Some(now);
        cache.last_refresh_attempt = Some(now);
        Ok(())
    }

    async fn try_refresh(&self, force: bool) -> Result<()> {
        {
            let cache = self.inner.read().await;
            if !force && !is_stale(cache.last_refresh, self.ttl) {
                return Ok(());
            }
            if !can_attempt(cache.last_refresh_attempt, self.min_refresh_interval) {
                return Ok(());
            }
        }

        let _guard = self.refresh_lock.lock().await;

        {
            let cache = self.inner.read().await;
            if !force && !is_stale(cache.last_refresh, self.ttl) {
                return Ok(());
            }
            if !can_attempt(cache.last_refresh_attempt, self.min_refresh_interval) {
                return Ok(());
            }
        }

        {
            let mut cache = self.inner.write().await;
            cache.last_refresh_attempt = Some(Instant::now());
        }

        self.refresh().await
    }
}

fn is_stale(last_refresh: Option<Instant>, ttl: Duration) -> bool {
    match last_refresh {
        None => true,
        Some(ts) => ts.elapsed() >= ttl,
    }
}

fn can_attempt(last_attempt: Option<Instant>, min_interval: Duration) -> bool {
    match last_attempt {
        None => true,
        Some(ts) => ts.elapsed() >= min_interval,
    }
}

#[cfg(test)]
mod tests {
    use super::{can_attempt, is_stale};
    use std::time::{Duration, Instant};

    #[test]
    fn stale_when_never_refreshed() {
        assert!(is_stale(None, Duration::from_secs(60)));
    }

    #[test]
    fn not_stale_before_ttl() {
        let ts = Instant::now() - Duration::from_secs(10);
        assert!(!is_stale(Some(ts), Duration::from_secs(60)));
    }

    #[test]
    fn refresh_attempts_are_rate_limited() {
        let ts = Instant::now() - Duration::from_secs(3);
        assert!(!can_attempt(Some(ts), Duration::from_secs(10)));
        assert!(can_attempt(None, Duration::from_secs(10)));
    }
}
