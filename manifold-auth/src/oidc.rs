//! Client side of the external OpenID Connect provider.
//!
//! Supports the device-authorization grant (RFC 8628) used by the CLI and
//! the client-credentials grant used by service accounts. Identity tokens
//! are verified against the provider's JWKS.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use manifold_core::{names, Error, Result};

use crate::jwks::JwksCache;

/// Provider settings.
#[derive(Clone, Debug, Deserialize)]
pub struct OidcConfig {
    /// Issuer URL; discovery happens at
    /// `<issuer>/.well-known/openid-configuration`.
    pub issuer_url: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    /// Scopes requested on the device grant.
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
}

fn default_scopes() -> Vec<String> {
    vec!["openid".to_string(), "profile".to_string(), "email".to_string()]
}

/// The subset of the discovery document we use.
#[derive(Clone, Debug, Deserialize)]
struct DiscoveryDocument {
    issuer: String,
    token_endpoint: String,
    device_authorization_endpoint: Option<String>,
    jwks_uri: String,
}

/// Response of the device-authorization endpoint, relayed to the CLI.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceAuthResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    #[serde(default)]
    pub verification_uri_complete: Option<String>,
    /// Seconds between polls.
    #[serde(default = "default_interval")]
    pub interval: u64,
    /// Seconds until the device code expires.
    pub expires_in: u64,
}

fn default_interval() -> u64 {
    5
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    id_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// A completed login: the provider's tokens.
#[derive(Clone, Debug)]
pub struct ProviderTokens {
    pub access_token: String,
    pub id_token: String,
}

/// OIDC provider client.
pub struct OidcClient {
    config: OidcConfig,
    discovery: DiscoveryDocument,
    jwks: Arc<JwksCache>,
    http: reqwest::Client,
}

impl OidcClient {
    /// Discover the provider's endpoints and build a client.
    pub async fn discover(config: OidcConfig) -> Result<Self> {
        let http = reqwest::Client::new();
        let url = format!(
            "{}/.well-known/openid-configuration",
            config.issuer_url.trim_end_matches('/')
        );
        let discovery: DiscoveryDocument = http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::connection_failed(format!("OIDC discovery: {e}")))?
            .error_for_status()
            .map_err(|e| Error::connection_failed(format!("OIDC discovery: {e}")))?
            .json()
            .await
            .map_err(|e| Error::connection_failed(format!("parse OIDC discovery: {e}")))?;
        let jwks = Arc::new(JwksCache::new(discovery.jwks_uri.clone()));
        Ok(Self {
            config,
            discovery,
            jwks,
            http,
        })
    }

    pub fn jwks(&self) -> Arc<JwksCache> {
        self.jwks.clone()
    }

    pub fn issuer(&self) -> &str {
        &self.discovery.issuer
    }

    /// Start a device-authorization flow. The caller shows
    /// `verification_uri` and `user_code` to the user.
    pub async fn device(&self) -> Result<DeviceAuthResponse> {
        let endpoint = self
            .discovery
            .device_authorization_endpoint
            .as_deref()
            .ok_or_else(|| {
                Error::not_supported("provider does not support the device grant")
            })?;
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("scope", &self.config.scopes.join(" ")),
        ];
        self.http
            .post(endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| Error::connection_failed(format!("device authorization: {e}")))?
            .error_for_status()
            .map_err(|e| Error::unauthorized(format!("device authorization: {e}")))?
            .json()
            .await
            .map_err(|e| Error::unauthorized(format!("parse device authorization: {e}")))
    }

    /// Poll the token endpoint until the user completes the device login,
    /// the provider reports a terminal error, or the code expires.
    pub async fn device_access_token(&self, auth: &DeviceAuthResponse) -> Result<ProviderTokens> {
        let mut interval = Duration::from_secs(auth.interval.max(1));
        let deadline = tokio::time::Instant::now() + Duration::from_secs(auth.expires_in);
        loop {
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::unauthorized("device code expired"));
            }
            tokio::time::sleep(interval).await;

            let params = [
                ("client_id", self.config.client_id.as_str()),
                ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
                ("device_code", &auth.device_code),
            ];
            let response: TokenResponse = self
                .http
                .post(&self.discovery.token_endpoint)
                .form(&params)
                .send()
                .await
                .map_err(|e| Error::connection_failed(format!("device token poll: {e}")))?
                .json()
                .await
                .map_err(|e| Error::unauthorized(format!("parse token response: {e}")))?;

            match response.error.as_deref() {
                None => {
                    let access_token = response
                        .access_token
                        .ok_or_else(|| Error::unauthorized("token response missing access_token"))?;
                    let id_token = response
                        .id_token
                        .ok_or_else(|| Error::unauthorized("token response missing id_token"))?;
                    return Ok(ProviderTokens {
                        access_token,
                        id_token,
                    });
                }
                Some("authorization_pending") => {}
                Some("slow_down") => {
                    interval += Duration::from_secs(5);
                }
                Some(other) => {
                    let detail = response.error_description.unwrap_or_default();
                    return Err(Error::unauthorized(format!(
                        "device login failed: {other} {detail}"
                    )));
                }
            }
        }
    }

    /// Verify an id token's signature and standard claims, returning the
    /// claims object.
    pub async fn extract_and_verify_id_token(&self, token: &str) -> Result<serde_json::Value> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| Error::unauthorized(format!("decode id token header: {e}")))?;
        let kid = header
            .kid
            .as_deref()
            .ok_or_else(|| Error::unauthorized("id token missing 'kid'"))?;
        let key = self.jwks.get_key(kid).await?;

        let mut validation = jsonwebtoken::Validation::new(header.alg);
        validation.set_issuer(&[&self.discovery.issuer]);
        validation.set_audience(&[&self.config.client_id]);
        validation.validate_exp = true;
        let data = jsonwebtoken::decode::<serde_json::Value>(token, &key, &validation)
            .map_err(|e| Error::unauthorized(format!("invalid id token: {e}")))?;
        Ok(data.claims)
    }

    /// The stored principal for a verified id token.
    pub fn email(&self, claims: &serde_json::Value) -> Result<String> {
        let email = claims
            .get("email")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::unauthorized("id token carries no email claim"))?;
        names::principal_from_email(email)
            .ok_or_else(|| Error::unauthorized(format!("email {email:?} is not a usable principal")))
    }

    /// Validate service-account credentials via the client-credentials
    /// grant, returning the `<client-id>@serviceaccount` principal.
    pub async fn client_credentials_login(
        &self,
        client_id: &str,
        client_secret: &str,
    ) -> Result<String> {
        if !names::is_valid_client_id(client_id) {
            return Err(Error::bad_request(format!(
                "invalid client id {client_id:?}"
            )));
        }
        let params = [
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("grant_type", "client_credentials"),
        ];
        let response: TokenResponse = self
            .http
            .post(&self.discovery.token_endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| Error::connection_failed(format!("client credentials: {e}")))?
            .json()
            .await
            .map_err(|e| Error::unauthorized(format!("parse token response: {e}")))?;
        if let Some(error) = response.error {
            let detail = response.error_description.unwrap_or_default();
            return Err(Error::unauthorized(format!(
                "client credentials rejected: {error} {detail}"
            )));
        }
        if response.access_token.is_none() {
            return Err(Error::unauthorized("token response missing access_token"));
        }
        Ok(names::ensure_serviceaccount_suffix(client_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_auth_response_defaults() {
        let parsed: DeviceAuthResponse = serde_json::from_str(
            r#"{"device_code":"d","user_code":"ABCD-EFGH",
                "verification_uri":"https://idp/activate","expires_in":900}"#,
        )
        .unwrap();
        assert_eq!(parsed.interval, 5);
        assert_eq!(parsed.verification_uri_complete, None);
    }

    #[test]
    fn scopes_default_to_openid_profile_email() {
        let config: OidcConfig = serde_json::from_str(
            r#"{"issuer_url":"https://idp","client_id":"manifold"}"#,
        )
        .unwrap();
        assert_eq!(config.scopes, ["openid", "profile", "email"]);
    }
}
