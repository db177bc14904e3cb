//! Credential store — secrets never land in the catalog.
//!
//! Keyed by `(kind, identifier)` with three kinds: controller admin
//! credentials, cloud-credential attributes and the OAuth session signing
//! key. [`MemoryVault`] backs tests and single-node deployments; a real
//! vault backend implements the same trait.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;

use manifold_core::{Error, Result};

const KIND_CONTROLLER_ADMIN: &str = "controller-admin";
const KIND_CLOUD_CREDENTIAL: &str = "cloud-credential-attrs";
const KIND_OAUTH_SESSION: &str = "oauth-session";

/// Admin username and password for dialing a controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerCredentials {
    pub username: String,
    pub password: String,
}

/// External secret storage.
///
/// Last write wins; the store is treated as a single-writer service.
pub trait VaultStore: Send + Sync + 'static {
    fn get(
        &self,
        kind: &str,
        identifier: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Vec<u8>>>> + Send + '_>>;

    fn put(
        &self,
        kind: &str,
        identifier: &str,
        value: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    fn delete(
        &self,
        kind: &str,
        identifier: &str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Typed helpers over a [`VaultStore`].
#[derive(Clone)]
pub struct Vault {
    store: Arc<dyn VaultStore>,
}

impl Vault {
    pub fn new(store: Arc<dyn VaultStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryVault::default()))
    }

    pub async fn controller_credentials(&self, controller: &str) -> Result<ControllerCredentials> {
        let raw = self
            .store
            .get(KIND_CONTROLLER_ADMIN, controller)
            .await?
            .ok_or_else(|| {
                Error::not_found(format!("no admin credentials for controller {controller:?}"))
            })?;
        let decoded: (String, String) = serde_json::from_slice(&raw)
            .map_err(|e| Error::unspecified(format!("decode controller credentials: {e}")))?;
        Ok(ControllerCredentials {
            username: decoded.0,
            password: decoded.1,
        })
    }

    pub async fn put_controller_credentials(
        &self,
        controller: &str,
        credentials: &ControllerCredentials,
    ) -> Result<()> {
        let raw = serde_json::to_vec(&(&credentials.username, &credentials.password))
            .map_err(|e| Error::unspecified(format!("encode controller credentials: {e}")))?;
        self.store.put(KIND_CONTROLLER_ADMIN, controller, raw).await
    }

    pub async fn cloud_credential_attributes(
        &self,
        credential_id: &str,
    ) -> Result<HashMap<String, String>> {
        let raw = self.store.get(KIND_CLOUD_CREDENTIAL, credential_id).await?;
        match raw {
            Some(raw) => serde_json::from_slice(&raw)
                .map_err(|e| Error::unspecified(format!("decode credential attributes: {e}"))),
            None => Ok(HashMap::new()),
        }
    }

    pub async fn put_cloud_credential_attributes(
        &self,
        credential_id: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<()> {
        let raw = serde_json::to_vec(attributes)
            .map_err(|e| Error::unspecified(format!("encode credential attributes: {e}")))?;
        self.store.put(KIND_CLOUD_CREDENTIAL, credential_id, raw).await
    }

    /// The HS256 secret for browser-session cookies, created on first use.
    pub async fn session_secret(&self) -> Result<Vec<u8>> {
        if let Some(secret) = self.store.get(KIND_OAUTH_SESSION, "cookie-key").await? {
            return Ok(secret);
        }
        let secret: Vec<u8> = uuid::Uuid::new_v4()
            .as_bytes()
            .iter()
            .chain(uuid::Uuid::new_v4().as_bytes())
            .copied()
            .collect();
        self.store
            .put(KIND_OAUTH_SESSION, "cookie-key", secret.clone())
            .await?;
        Ok(secret)
    }
}

/// In-memory vault.
#[derive(Default)]
pub struct MemoryVault {
    entries: DashMap<(String, String), Vec<u8>>,
}

impl VaultStore for MemoryVault {
    fn get(
        &self,
        kind: &str,
        identifier: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Vec<u8>>>> + Send + '_>> {
        let value = self
            .entries
            .get(&(kind.to_string(), identifier.to_string()))
            .map(|entry| entry.value().clone());
        Box::pin(async move { Ok(value) })
    }

    fn put(
        &self,
        kind: &str,
        identifier: &str,
        value: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.entries
            .insert((kind.to_string(), identifier.to_string()), value);
        Box::pin(async { Ok(()) })
    }

    fn delete(
        &self,
        kind: &str,
        identifier: &str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.entries
            .remove(&(kind.to_string(), identifier.to_string()));
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn controller_credentials_round_trip() {
        let vault = Vault::in_memory();
        let creds = ControllerCredentials {
            username: "admin".to_string(),
            password: "hunter2".to_string(),
        };
        vault.put_controller_credentials("alpha", &creds).await.unwrap();
        assert_eq!(vault.controller_credentials("alpha").await.unwrap(), creds);

        let err = vault.controller_credentials("beta").await.unwrap_err();
        assert_eq!(err.code(), "not-found");
    }

    #[tokio::test]
    async fn session_secret_is_stable() {
        let vault = Vault::in_memory();
        let first = vault.session_secret().await.unwrap();
        let second = vault.session_secret().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 32);
    }

    #[tokio::test]
    async fn missing_attributes_are_empty() {
        let vault = Vault::in_memory();
        assert!(vault
            .cloud_credential_attributes("cred-1")
            .await
            .unwrap()
            .is_empty());
    }
}
