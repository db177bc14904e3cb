//! Mints the short-lived JWTs presented to backend controllers.
//!
//! A token proves, to one controller, a user's access to a set of tagged
//! entities. The minter keeps per-connection state between
//! [`TokenMinter::make_login_token`] and [`TokenMinter::make_token`]: the
//! login target and the access map minted so far, so additional
//! permissions accumulate over the life of a proxied connection.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, Header};
use serde::Serialize;

use manifold_core::{Error, Result};

use crate::keys::SigningKeyPair;

/// Default lifetime of a minted token.
pub const TOKEN_TTL: Duration = Duration::from_secs(300);

/// Answers access questions for the minter. Implemented over the policy
/// engine and catalog by the server.
pub trait AccessResolver: Send + Sync + 'static {
    /// The strongest access string the user holds on the tagged entity,
    /// or `None`.
    fn access<'a>(
        &'a self,
        user: &'a str,
        tag: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>>> + Send + 'a>>;

    /// Whether the user holds at least `access` on the tagged entity.
    fn check<'a>(
        &'a self,
        user: &'a str,
        access: &'a str,
        tag: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>>;
}

/// The entities a login token speaks for.
#[derive(Clone, Debug)]
pub struct LoginTarget {
    /// JAAS user tag, e.g. `user-alice@example.com`.
    pub user_tag: String,
    /// JAAS model tag of the proxied model.
    pub model_tag: String,
    /// JAAS controller tag of the hosting controller.
    pub controller_tag: String,
    /// JAAS cloud tag of the cloud the model inhabits.
    pub cloud_tag: String,
    /// The `aud` claim: the backend controller's UUID.
    pub controller_uuid: String,
}

#[derive(Serialize)]
struct AccessClaims<'a> {
    iss: &'a str,
    sub: &'a str,
    aud: &'a str,
    exp: u64,
    iat: u64,
    access: &'a BTreeMap<String, String>,
}

/// Per-connection token minter.
pub struct TokenMinter {
    keys: Arc<SigningKeyPair>,
    resolver: Arc<dyn AccessResolver>,
    issuer: String,
    ttl: Duration,
    state: Option<MintState>,
}

struct MintState {
    target: LoginTarget,
    access: BTreeMap<String, String>,
}

impl TokenMinter {
    pub fn new(
        keys: Arc<SigningKeyPair>,
        resolver: Arc<dyn AccessResolver>,
        issuer: impl Into<String>,
    ) -> Self {
        Self {
            keys,
            resolver,
            issuer: issuer.into(),
            ttl: TOKEN_TTL,
            state: None,
        }
    }

    /// Mint the login token: the user's access to the model, its
    /// controller and its cloud, merged into one access map.
    pub async fn make_login_token(&mut self, target: LoginTarget) -> Result<Vec<u8>> {
        let mut access = BTreeMap::new();
        for tag in [&target.model_tag, &target.controller_tag, &target.cloud_tag] {
            if let Some(level) = self.resolver.access(&target.user_tag, tag).await? {
                access.insert(tag.clone(), level);
            }
        }
        let token = self.sign(&target, &access)?;
        self.state = Some(MintState { target, access });
        Ok(token)
    }

    /// Mint a token carrying the login access map plus `extra` pairs, each
    /// verified against the policy store before inclusion.
    pub async fn make_token(&mut self, extra: &BTreeMap<String, String>) -> Result<Vec<u8>> {
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| Error::unauthorized("no login token minted on this connection"))?;
        for (tag, level) in extra {
            let allowed = self
                .resolver
                .check(&state.target.user_tag, level, tag)
                .await?;
            if !allowed {
                return Err(Error::forbidden(format!(
                    "{} does not hold {level} on {tag}",
                    state.target.user_tag
                )));
            }
            state.access.insert(tag.clone(), level.clone());
        }
        let (target, access) = (state.target.clone(), state.access.clone());
        let token = self.sign(&target, &access)?;
        Ok(token)
    }

    fn sign(&self, target: &LoginTarget, access: &BTreeMap<String, String>) -> Result<Vec<u8>> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| Error::unspecified(format!("system clock error: {e}")))?
            .as_secs();
        let claims = AccessClaims {
            iss: &self.issuer,
            sub: &target.user_tag,
            aud: &target.controller_uuid,
            exp: now + self.ttl.as_secs(),
            iat: now,
            access,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.keys.kid().to_string());
        let jwt = jsonwebtoken::encode(&header, &claims, self.keys.encoding_key())
            .map_err(|e| Error::unspecified(format!("sign access token: {e}")))?;
        Ok(jwt.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedResolver {
        grants: Vec<(String, String)>,
    }

    impl AccessResolver for FixedResolver {
        fn access<'a>(
            &'a self,
            _user: &'a str,
            tag: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<Option<String>>> + Send + 'a>> {
            let level = self
                .grants
                .iter()
                .find(|(t, _)| t == tag)
                .map(|(_, l)| l.clone());
            Box::pin(async move { Ok(level) })
        }

        fn check<'a>(
            &'a self,
            _user: &'a str,
            access: &'a str,
            tag: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
            let ok = self.grants.iter().any(|(t, l)| t == tag && l == access);
            Box::pin(async move { Ok(ok) })
        }
    }

    fn target() -> LoginTarget {
        LoginTarget {
            user_tag: "user-alice@example.com".to_string(),
            model_tag: "model-0000-1".to_string(),
            controller_tag: "controller-0000-2".to_string(),
            cloud_tag: "cloud-test-cloud".to_string(),
            controller_uuid: "0000-2".to_string(),
        }
    }

    fn minter(grants: Vec<(String, String)>) -> TokenMinter {
        let keys = Arc::new(SigningKeyPair::generate("mint-test").unwrap());
        TokenMinter::new(keys, Arc::new(FixedResolver { grants }), "manifold")
    }

    fn decode_claims(token: &[u8], minter_keys: &SigningKeyPair) -> serde_json::Value {
        let mut validation = jsonwebtoken::Validation::new(Algorithm::RS256);
        validation.validate_aud = false;
        jsonwebtoken::decode::<serde_json::Value>(
            std::str::from_utf8(token).unwrap(),
            &minter_keys.decoding_key().unwrap(),
            &validation,
        )
        .unwrap()
        .claims
    }

    #[tokio::test]
    async fn login_token_carries_held_access_only() {
        let keys = Arc::new(SigningKeyPair::generate("mint-test").unwrap());
        let resolver = FixedResolver {
            grants: vec![
                ("model-0000-1".to_string(), "admin".to_string()),
                ("controller-0000-2".to_string(), "login".to_string()),
            ],
        };
        let mut minter = TokenMinter::new(keys.clone(), Arc::new(resolver), "manifold");
        let token = minter.make_login_token(target()).await.unwrap();
        let claims = decode_claims(&token, &keys);
        assert_eq!(claims["access"]["model-0000-1"], "admin");
        assert_eq!(claims["access"]["controller-0000-2"], "login");
        assert!(claims["access"].get("cloud-test-cloud").is_none());
        assert_eq!(claims["sub"], "user-alice@example.com");
        assert_eq!(claims["aud"], "0000-2");
    }

    #[tokio::test]
    async fn make_token_requires_a_login_first() {
        let mut minter = minter(vec![]);
        let err = minter.make_token(&BTreeMap::new()).await.unwrap_err();
        assert_eq!(err.code(), "unauthorized");
    }

    #[tokio::test]
    async fn make_token_verifies_and_accumulates() {
        let mut minter = minter(vec![
            ("model-0000-1".to_string(), "admin".to_string()),
            ("applicationoffer-o1".to_string(), "consume".to_string()),
        ]);
        minter.make_login_token(target()).await.unwrap();

        let mut extra = BTreeMap::new();
        extra.insert("applicationoffer-o1".to_string(), "consume".to_string());
        minter.make_token(&extra).await.unwrap();

        // An access level the user does not hold is refused.
        let mut bad = BTreeMap::new();
        bad.insert("applicationoffer-o2".to_string(), "consume".to_string());
        let err = minter.make_token(&bad).await.unwrap_err();
        assert_eq!(err.code(), "forbidden");
    }
}
