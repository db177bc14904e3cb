//! Typed request and response bodies of the controller RPC surface.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Summary of the controller's own model, read during add-controller.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ControllerModelSummary {
    pub name: String,
    pub uuid: String,
    #[serde(rename = "cloud-tag")]
    pub cloud_tag: String,
    #[serde(rename = "cloud-region", default)]
    pub cloud_region: String,
    #[serde(rename = "agent-version", default)]
    pub agent_version: String,
}

/// A cloud as a controller reports it.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CloudSpec {
    #[serde(rename = "type", default)]
    pub cloud_type: String,
    #[serde(rename = "host-cloud-region", default)]
    pub host_cloud_region: String,
    #[serde(default)]
    pub regions: Vec<CloudRegionSpec>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CloudRegionSpec {
    pub name: String,
}

/// Model information as returned by a controller.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub uuid: String,
    #[serde(rename = "owner-tag", default)]
    pub owner_tag: String,
    #[serde(rename = "cloud-tag", default)]
    pub cloud_tag: String,
    #[serde(rename = "cloud-region", default)]
    pub cloud_region: String,
    #[serde(rename = "cloud-credential-tag", default)]
    pub cloud_credential_tag: String,
    #[serde(default)]
    pub life: String,
    #[serde(rename = "agent-version", default)]
    pub agent_version: String,
}

/// Arguments for creating a model on a controller.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CreateModelArgs {
    pub name: String,
    #[serde(rename = "owner-tag")]
    pub owner_tag: String,
    #[serde(rename = "cloud-tag")]
    pub cloud_tag: String,
    #[serde(rename = "cloud-region", default, skip_serializing_if = "String::is_empty")]
    pub cloud_region: String,
    #[serde(
        rename = "cloud-credential-tag",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub cloud_credential_tag: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub config: HashMap<String, Value>,
}

/// An application offer as a controller reports it.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OfferDetails {
    #[serde(rename = "offer-uuid")]
    pub offer_uuid: String,
    #[serde(rename = "offer-name")]
    pub offer_name: String,
    #[serde(rename = "offer-url")]
    pub offer_url: String,
}

/// One model abstract in a summary-watcher batch.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ModelAbstract {
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub admins: Vec<String>,
    #[serde(default)]
    pub cloud: String,
    #[serde(default)]
    pub region: String,
    /// Unstructured counts (applications, machines, units).
    #[serde(default)]
    pub counts: HashMap<String, i64>,
}

/// A migration target plus the models to move there.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MigrationSpec {
    #[serde(rename = "model-tag")]
    pub model_tag: String,
    #[serde(rename = "target-info")]
    pub target_info: MigrationTargetInfo,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MigrationTargetInfo {
    #[serde(rename = "controller-tag")]
    pub controller_tag: String,
    #[serde(default)]
    pub addrs: Vec<String>,
    #[serde(rename = "ca-cert", default)]
    pub ca_cert: String,
    #[serde(rename = "auth-tag", default)]
    pub auth_tag: String,
    #[serde(default)]
    pub password: String,
}

/// Validity report for a credential, per model that uses it.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CredentialModelResult {
    #[serde(rename = "model-uuid")]
    pub model_uuid: String,
    #[serde(rename = "model-name", default)]
    pub model_name: String,
    #[serde(default)]
    pub errors: Vec<String>,
}
