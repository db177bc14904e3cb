//! The typed RPC surface of a backend controller.
//!
//! [`Rpc`] is the transport seam: the production implementation is a live
//! [`Connection`], tests substitute canned responses. [`ApiClient`] layers
//! the typed calls on top; [`Dialer`] produces clients and is the seam the
//! federated operations and the summary watcher mock in their tests.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{json, Value};

use manifold_core::{Error, Result};

use crate::conn::Connection;
use crate::dial::{connect_websocket, ControllerTarget};
use crate::params::{
    CloudSpec, ControllerModelSummary, CreateModelArgs, CredentialModelResult, MigrationSpec,
    ModelAbstract, ModelInfo, OfferDetails,
};

const ADMIN_VERSION: u32 = 3;
const CLOUD_VERSION: u32 = 7;
const CONTROLLER_VERSION: u32 = 11;
const MODEL_MANAGER_VERSION: u32 = 9;
const OFFERS_VERSION: u32 = 4;
const WATCHER_VERSION: u32 = 1;
const PINGER_VERSION: u32 = 1;

/// Facade name gating the summary watcher.
pub const SUMMARY_WATCHER_FACADE: &str = "ModelSummaryWatcher";

/// Transport for RPC calls.
pub trait Rpc: Send + Sync + 'static {
    fn call(
        &self,
        facade: &str,
        version: u32,
        method: &str,
        params: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + '_>>;
}

impl Rpc for Connection {
    fn call(
        &self,
        facade: &str,
        version: u32,
        method: &str,
        params: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + '_>> {
        // The returned future may only borrow the connection itself.
        let facade = facade.to_string();
        let method = method.to_string();
        Box::pin(async move { Connection::call(self, &facade, version, &method, params).await })
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: Value, what: &str) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| Error::unspecified(format!("decode {what} response: {e}")))
}

/// Typed client for one controller connection.
#[derive(Clone)]
pub struct ApiClient {
    rpc: Arc<dyn Rpc>,
    facades: Arc<HashSet<String>>,
}

impl ApiClient {
    pub fn new(rpc: Arc<dyn Rpc>, facades: HashSet<String>) -> Self {
        Self {
            rpc,
            facades: Arc::new(facades),
        }
    }

    // ── Controller facade ──────────────────────────────────────────────

    /// Summary of the model the controller itself runs in.
    pub async fn controller_model_summary(&self) -> Result<ControllerModelSummary> {
        let response = self
            .rpc
            .call("Controller", CONTROLLER_VERSION, "ControllerModelSummary", Value::Null)
            .await?;
        decode(response, "controller model summary")
    }

    pub async fn initiate_migration(&self, spec: MigrationSpec) -> Result<String> {
        let response = self
            .rpc
            .call(
                "Controller",
                CONTROLLER_VERSION,
                "InitiateMigration",
                json!({ "specs": [spec] }),
            )
            .await?;
        let results = response
            .get("results")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let first = results
            .first()
            .ok_or_else(|| Error::unspecified("empty migration result"))?;
        if let Some(message) = first.get("error").and_then(Value::as_str) {
            let kind = first
                .get("error-code")
                .and_then(Value::as_str)
                .map(manifold_core::ErrorKind::from_code)
                .unwrap_or(manifold_core::ErrorKind::Unspecified);
            return Err(Error::new(kind, message.to_string()));
        }
        Ok(first
            .get("migration-id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    // ── Cloud facade ───────────────────────────────────────────────────

    /// Every cloud the controller knows, keyed by cloud tag.
    pub async fn clouds(&self) -> Result<HashMap<String, CloudSpec>> {
        let response = self
            .rpc
            .call("Cloud", CLOUD_VERSION, "Clouds", Value::Null)
            .await?;
        let clouds = response.get("clouds").cloned().unwrap_or_else(|| json!({}));
        decode(clouds, "clouds")
    }

    pub async fn cloud(&self, name: &str) -> Result<CloudSpec> {
        let response = self
            .rpc
            .call("Cloud", CLOUD_VERSION, "Cloud", json!({ "cloud-tag": format!("cloud-{name}") }))
            .await?;
        decode(response, "cloud")
    }

    pub async fn add_cloud(&self, name: &str, cloud: &CloudSpec) -> Result<()> {
        self.rpc
            .call(
                "Cloud",
                CLOUD_VERSION,
                "AddCloud",
                json!({ "name": name, "cloud": cloud }),
            )
            .await?;
        Ok(())
    }

    pub async fn remove_cloud(&self, name: &str) -> Result<()> {
        self.rpc
            .call(
                "Cloud",
                CLOUD_VERSION,
                "RemoveClouds",
                json!({ "cloud-tags": [format!("cloud-{name}")] }),
            )
            .await?;
        Ok(())
    }

    pub async fn update_cloud(&self, name: &str, cloud: &CloudSpec) -> Result<()> {
        self.rpc
            .call(
                "Cloud",
                CLOUD_VERSION,
                "UpdateCloud",
                json!({ "name": name, "cloud": cloud }),
            )
            .await?;
        Ok(())
    }

    /// Grant cloud access; a user that already holds it is a success.
    pub async fn grant_cloud_access(&self, cloud: &str, user_tag: &str, access: &str) -> Result<()> {
        let result = self
            .rpc
            .call(
                "Cloud",
                CLOUD_VERSION,
                "ModifyCloudAccess",
                json!({ "changes": [{
                    "cloud-tag": format!("cloud-{cloud}"),
                    "user-tag": user_tag,
                    "action": "grant",
                    "access": access,
                }]}),
            )
            .await;
        swallow_already_granted(result)
    }

    pub async fn update_credential(
        &self,
        credential_tag: &str,
        auth_type: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<Vec<CredentialModelResult>> {
        let response = self
            .rpc
            .call(
                "Cloud",
                CLOUD_VERSION,
                "UpdateCredentialsCheckModels",
                json!({ "credentials": [{
                    "tag": credential_tag,
                    "credential": { "auth-type": auth_type, "attrs": attributes },
                }]}),
            )
            .await?;
        let models = response.get("models").cloned().unwrap_or_else(|| json!([]));
        decode(models, "credential models")
    }

    pub async fn check_credential_models(
        &self,
        credential_tag: &str,
    ) -> Result<Vec<CredentialModelResult>> {
        let response = self
            .rpc
            .call(
                "Cloud",
                CLOUD_VERSION,
                "CheckCredentialsModels",
                json!({ "credentials": [{ "tag": credential_tag }] }),
            )
            .await?;
        let models = response.get("models").cloned().unwrap_or_else(|| json!([]));
        decode(models, "credential models")
    }

    // ── ModelManager facade ────────────────────────────────────────────

    pub async fn model_info(&self, model_uuid: &str) -> Result<ModelInfo> {
        let response = self
            .rpc
            .call(
                "ModelManager",
                MODEL_MANAGER_VERSION,
                "ModelInfo",
                json!({ "model-tag": format!("model-{model_uuid}") }),
            )
            .await?;
        decode(response, "model info")
    }

    pub async fn create_model(&self, args: CreateModelArgs) -> Result<ModelInfo> {
        let response = self
            .rpc
            .call(
                "ModelManager",
                MODEL_MANAGER_VERSION,
                "CreateModel",
                serde_json::to_value(&args)
                    .map_err(|e| Error::unspecified(format!("encode create-model: {e}")))?,
            )
            .await?;
        decode(response, "create model")
    }

    pub async fn destroy_model(&self, model_uuid: &str) -> Result<()> {
        self.rpc
            .call(
                "ModelManager",
                MODEL_MANAGER_VERSION,
                "DestroyModels",
                json!({ "models": [{ "model-tag": format!("model-{model_uuid}") }] }),
            )
            .await?;
        Ok(())
    }

    pub async fn validate_model_upgrade(&self, model_uuid: &str, force: bool) -> Result<()> {
        self.rpc
            .call(
                "ModelManager",
                MODEL_MANAGER_VERSION,
                "ValidateModelUpgrades",
                json!({ "model-tag": format!("model-{model_uuid}"), "force": force }),
            )
            .await?;
        Ok(())
    }

    pub async fn dump_model(&self, model_uuid: &str) -> Result<Value> {
        self.rpc
            .call(
                "ModelManager",
                MODEL_MANAGER_VERSION,
                "DumpModels",
                json!({ "model-tag": format!("model-{model_uuid}") }),
            )
            .await
    }

    pub async fn dump_model_db(&self, model_uuid: &str) -> Result<Value> {
        self.rpc
            .call(
                "ModelManager",
                MODEL_MANAGER_VERSION,
                "DumpModelsDB",
                json!({ "model-tag": format!("model-{model_uuid}") }),
            )
            .await
    }

    /// Make the plane's own identity an administrator of the model; a
    /// grant that is already in place is a success.
    pub async fn grant_model_admin(&self, model_uuid: &str, user_tag: &str) -> Result<()> {
        let result = self
            .rpc
            .call(
                "ModelManager",
                MODEL_MANAGER_VERSION,
                "ModifyModelAccess",
                json!({ "changes": [{
                    "model-tag": format!("model-{model_uuid}"),
                    "user-tag": user_tag,
                    "action": "grant",
                    "access": "admin",
                }]}),
            )
            .await;
        swallow_already_granted(result)
    }

    pub async fn change_model_credential(
        &self,
        model_uuid: &str,
        credential_tag: &str,
    ) -> Result<()> {
        self.rpc
            .call(
                "ModelManager",
                MODEL_MANAGER_VERSION,
                "ChangeModelCredential",
                json!({ "models": [{
                    "model-tag": format!("model-{model_uuid}"),
                    "cloud-credential-tag": credential_tag,
                }]}),
            )
            .await?;
        Ok(())
    }

    pub async fn list_model_summaries(&self) -> Result<Vec<ModelAbstract>> {
        let response = self
            .rpc
            .call(
                "ModelManager",
                MODEL_MANAGER_VERSION,
                "ListModelSummaries",
                Value::Null,
            )
            .await?;
        let models = response.get("results").cloned().unwrap_or_else(|| json!([]));
        decode(models, "model summaries")
    }

    // ── ApplicationOffers facade ───────────────────────────────────────

    pub async fn list_application_offers(
        &self,
        owner: &str,
        model_name: &str,
    ) -> Result<Vec<OfferDetails>> {
        let response = self
            .rpc
            .call(
                "ApplicationOffers",
                OFFERS_VERSION,
                "ListApplicationOffers",
                json!({ "filters": [{ "owner-name": owner, "model-name": model_name }] }),
            )
            .await?;
        let offers = response.get("results").cloned().unwrap_or_else(|| json!([]));
        decode(offers, "application offers")
    }

    // ── Summary watcher ────────────────────────────────────────────────

    /// Whether the controller offers the summary-watcher facade at all.
    pub fn supports_model_summary_watcher(&self) -> bool {
        self.facades.contains(SUMMARY_WATCHER_FACADE)
    }

    pub async fn watch_all_model_summaries(&self) -> Result<String> {
        let response = self
            .rpc
            .call(
                "Controller",
                CONTROLLER_VERSION,
                "WatchAllModelSummaries",
                Value::Null,
            )
            .await?;
        response
            .get("watcher-id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::unspecified("watcher response missing watcher-id"))
    }

    /// Block until the next batch of abstracts; indefinite-wait by design.
    pub async fn model_summary_watcher_next(&self, watcher_id: &str) -> Result<Vec<ModelAbstract>> {
        let response = self
            .rpc
            .call(
                SUMMARY_WATCHER_FACADE,
                WATCHER_VERSION,
                "Next",
                json!({ "watcher-id": watcher_id }),
            )
            .await?;
        let models = response.get("models").cloned().unwrap_or_else(|| json!([]));
        decode(models, "summary batch")
    }

    pub async fn model_summary_watcher_stop(&self, watcher_id: &str) -> Result<()> {
        self.rpc
            .call(
                SUMMARY_WATCHER_FACADE,
                WATCHER_VERSION,
                "Stop",
                json!({ "watcher-id": watcher_id }),
            )
            .await?;
        Ok(())
    }

    pub async fn ping(&self) -> Result<()> {
        self.rpc
            .call("Pinger", PINGER_VERSION, "Ping", Value::Null)
            .await?;
        Ok(())
    }
}

/// Grants that are already in place are a success; the backends phrase
/// this both as a structured code and as an "already has" message.
fn swallow_already_granted(result: Result<Value>) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.is_already_exists() || e.message().contains("already has") => Ok(()),
        Err(e) => Err(e),
    }
}

// ── Dialer ───────────────────────────────────────────────────────────────

/// Produces connected API clients.
pub trait Dialer: Send + Sync + 'static {
    fn dial(
        &self,
        target: &ControllerTarget,
    ) -> Pin<Box<dyn Future<Output = Result<ApiClient>> + Send + '_>>;
}

/// The production dialer: WSS to `/api`, then an admin login.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsDialer;

impl WsDialer {
    async fn dial_inner(&self, target: ControllerTarget) -> Result<ApiClient> {
        let stream = connect_websocket(&target, "api", &http::HeaderMap::new()).await?;
        let conn = Connection::start(stream);

        let response = conn
            .call(
                "Admin",
                ADMIN_VERSION,
                "Login",
                json!({
                    "auth-tag": format!("user-{}", target.username),
                    "credentials": target.password,
                }),
            )
            .await?;
        let mut facades = HashSet::new();
        if let Some(list) = response.get("facades").and_then(Value::as_array) {
            for facade in list {
                if let Some(name) = facade.get("name").and_then(Value::as_str) {
                    facades.insert(name.to_string());
                }
            }
        }
        Ok(ApiClient::new(Arc::new(conn), facades))
    }
}

impl Dialer for WsDialer {
    fn dial(
        &self,
        target: &ControllerTarget,
    ) -> Pin<Box<dyn Future<Output = Result<ApiClient>> + Send + '_>> {
        let target = target.clone();
        Box::pin(self.dial_inner(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Rpc stub answering from a table of (facade, method) → response.
    struct TableRpc {
        answers: HashMap<(String, String), Result<Value>>,
    }

    impl TableRpc {
        fn new() -> Self {
            Self {
                answers: HashMap::new(),
            }
        }

        fn answer(mut self, facade: &str, method: &str, response: Result<Value>) -> Self {
            self.answers
                .insert((facade.to_string(), method.to_string()), response);
            self
        }
    }

    impl Rpc for TableRpc {
        fn call(
            &self,
            facade: &str,
            _version: u32,
            method: &str,
            _params: Value,
        ) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + '_>> {
            let response = self
                .answers
                .get(&(facade.to_string(), method.to_string()))
                .cloned()
                .unwrap_or_else(|| Err(Error::not_found(format!("no answer for {facade}.{method}"))));
            Box::pin(async move { response })
        }
    }

    fn client(rpc: TableRpc, facades: &[&str]) -> ApiClient {
        ApiClient::new(
            Arc::new(rpc),
            facades.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[tokio::test]
    async fn grant_already_has_is_success() {
        let rpc = TableRpc::new().answer(
            "Cloud",
            "ModifyCloudAccess",
            Err(Error::unspecified("user already has 'add-model' access")),
        );
        client(rpc, &[])
            .grant_cloud_access("test-cloud", "user-everyone@external", "add-model")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn backend_codes_surface_verbatim() {
        let rpc = TableRpc::new().answer(
            "ModelManager",
            "CreateModel",
            Err(Error::new(
                manifold_core::ErrorKind::Remote("upgrade-in-progress".to_string()),
                "busy",
            )),
        );
        let err = client(rpc, &[])
            .create_model(CreateModelArgs::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "upgrade-in-progress");
    }

    #[tokio::test]
    async fn watcher_support_follows_facades() {
        assert!(client(TableRpc::new(), &[SUMMARY_WATCHER_FACADE]).supports_model_summary_watcher());
        assert!(!client(TableRpc::new(), &[]).supports_model_summary_watcher());
    }

    #[tokio::test]
    async fn migration_errors_are_per_model() {
        let rpc = TableRpc::new().answer(
            "Controller",
            "InitiateMigration",
            Ok(json!({ "results": [{
                "error": "target prechecks failed: model with same UUID already exists (m-1)",
            }]})),
        );
        let err = client(rpc, &[])
            .initiate_migration(MigrationSpec::default())
            .await
            .unwrap_err();
        assert!(err.message().contains("target prechecks failed"));
    }
}
