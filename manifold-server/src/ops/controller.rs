//! Controller lifecycle: federating a backend controller into the plane,
//! listing, deprecating, removing.

use serde::{Deserialize, Serialize};

use manifold_client::ControllerTarget;
use manifold_core::{Error, Relation, Result, Tag};
use manifold_policy::RelationTuple;
use manifold_store::{Cloud, CloudRegion, Controller, ControllerCredentials};
use manifold_store::{PRIORITY_DEPLOYED, PRIORITY_SUPPORTED};

use crate::app::{App, AuthenticatedUser};
use crate::ops::ensure_admin;

/// The controller-info document an administrator feeds to add-controller.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AddControllerRequest {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uuid: String,
    #[serde(rename = "public-address", default, skip_serializing_if = "String::is_empty")]
    pub public_address: String,
    #[serde(rename = "api-addresses", default)]
    pub api_addresses: Vec<String>,
    #[serde(rename = "ca-certificate", default, skip_serializing_if = "String::is_empty")]
    pub ca_certificate: String,
    pub username: String,
    pub password: String,
    #[serde(rename = "tls-hostname", default, skip_serializing_if = "String::is_empty")]
    pub tls_hostname: String,
}

/// What listings and add-controller report about a controller.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ControllerInfo {
    pub name: String,
    pub uuid: String,
    #[serde(rename = "public-address", default)]
    pub public_address: String,
    #[serde(rename = "api-addresses", default)]
    pub api_addresses: Vec<String>,
    #[serde(rename = "agent-version", default)]
    pub agent_version: String,
    #[serde(rename = "unavailable-since", default)]
    pub unavailable_since: Option<String>,
    #[serde(default)]
    pub deprecated: bool,
}

impl ControllerInfo {
    pub fn from_store(controller: &Controller) -> Self {
        Self {
            name: controller.name.clone(),
            uuid: controller.uuid.clone(),
            public_address: controller.public_address.clone(),
            api_addresses: controller.addresses.clone(),
            agent_version: controller.agent_version.clone(),
            unavailable_since: controller.unavailable_since.map(|micros| {
                chrono::DateTime::from_timestamp_micros(micros)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default()
            }),
            deprecated: controller.deprecated,
        }
    }
}

/// Federate a new backend controller into the plane.
///
/// Dials the candidate, discovers its clouds and regions, assigns
/// priorities (`deployed` for the controller's own region, `supported`
/// elsewhere) and persists everything in one transaction. The follow-up
/// policy writes are advisory: a degraded policy store must not wedge
/// controller addition.
pub async fn add_controller(
    app: &App,
    user: &AuthenticatedUser,
    req: AddControllerRequest,
) -> Result<ControllerInfo> {
    const OP: &str = "add-controller";
    ensure_admin(user)?;
    if req.name.is_empty() || req.api_addresses.is_empty() && req.public_address.is_empty() {
        return Err(Error::bad_request("controller name and addresses are required").op(OP));
    }

    let target = ControllerTarget {
        name: req.name.clone(),
        uuid: req.uuid.clone(),
        public_address: req.public_address.clone(),
        addresses: req.api_addresses.clone(),
        ca_cert: req.ca_certificate.clone(),
        tls_hostname: req.tls_hostname.clone(),
        username: req.username.clone(),
        password: req.password.clone(),
    };
    let api = app.dialer.dial(&target).await.map_err(|e| e.op(OP))?;

    let summary = api.controller_model_summary().await.map_err(|e| e.op(OP))?;
    let own_cloud = summary
        .cloud_tag
        .strip_prefix("cloud-")
        .unwrap_or(&summary.cloud_tag)
        .to_string();
    let own_region = summary.cloud_region.clone();
    let uuid = if !summary.uuid.is_empty() {
        summary.uuid.clone()
    } else if !req.uuid.is_empty() {
        req.uuid.clone()
    } else {
        return Err(Error::bad_request("controller reports no uuid").op(OP));
    };

    // Discover the controller's clouds; existing rows are reused.
    let clouds = api.clouds().await.map_err(|e| e.op(OP))?;
    let mut priorities: Vec<(String, i32)> = Vec::new();
    let mut cloud_names: Vec<String> = Vec::new();
    for (tag, spec) in &clouds {
        let cloud_name = tag.strip_prefix("cloud-").unwrap_or(tag).to_string();
        let cloud = Cloud {
            name: cloud_name.clone(),
            cloud_type: spec.cloud_type.clone(),
            host_cloud_region: spec.host_cloud_region.clone(),
            regions: spec
                .regions
                .iter()
                .map(|r| CloudRegion {
                    name: r.name.clone(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };
        match app.db.add_cloud(&cloud).await {
            Ok(()) => {}
            Err(e) if e.is_already_exists() => {}
            Err(e) => return Err(e.op(OP)),
        }
        for region in &spec.regions {
            let region_id = app.db.add_cloud_region(&cloud_name, &region.name).await?;
            let priority = if cloud_name == own_cloud && region.name == own_region {
                PRIORITY_DEPLOYED
            } else {
                PRIORITY_SUPPORTED
            };
            priorities.push((region_id, priority));
        }
        cloud_names.push(cloud_name);
    }

    let controller = Controller {
        uuid: uuid.clone(),
        name: req.name.clone(),
        public_address: req.public_address.clone(),
        addresses: req.api_addresses.clone(),
        ca_cert: req.ca_certificate.clone(),
        tls_hostname: req.tls_hostname.clone(),
        unavailable_since: None,
        deprecated: false,
        agent_version: summary.agent_version.clone(),
    };
    app.db.add_controller(&controller, &priorities).await?;

    app.vault
        .put_controller_credentials(
            &req.name,
            &ControllerCredentials {
                username: req.username.clone(),
                password: req.password.clone(),
            },
        )
        .await?;

    // Advisory policy writes: log and continue on failure.
    let everyone = RelationTuple::new(
        Tag::everyone(),
        Relation::CanAddModel,
        Tag::cloud(&own_cloud),
    );
    if let Err(e) = app.policy.add_relations(&[everyone]).await {
        tracing::warn!(cloud = %own_cloud, error = %e, "could not open the controller cloud to everyone");
    }
    let mut links = vec![RelationTuple::new(
        app.resolver.plane_controller_tag(),
        Relation::Controller,
        Tag::controller(&uuid),
    )];
    for cloud_name in &cloud_names {
        links.push(RelationTuple::new(
            Tag::controller(&uuid),
            Relation::Controller,
            Tag::cloud(cloud_name),
        ));
    }
    if let Err(e) = app.policy.add_relations(&links).await {
        tracing::warn!(controller = %req.name, error = %e, "could not record controller relations");
    }

    Ok(ControllerInfo::from_store(&controller))
}

pub async fn list_controllers(app: &App, user: &AuthenticatedUser) -> Result<Vec<ControllerInfo>> {
    ensure_admin(user)?;
    let controllers = app.db.for_each_controller().await?;
    Ok(controllers.iter().map(ControllerInfo::from_store).collect())
}

pub async fn controller_info(
    app: &App,
    user: &AuthenticatedUser,
    name: &str,
) -> Result<ControllerInfo> {
    ensure_admin(user)?;
    let controller = app.db.get_controller_by_name(name).await?;
    Ok(ControllerInfo::from_store(&controller))
}

/// Remove a controller. Refused while it still hosts models.
pub async fn remove_controller(app: &App, user: &AuthenticatedUser, name: &str) -> Result<()> {
    const OP: &str = "remove-controller";
    ensure_admin(user)?;
    let controller = app.db.get_controller_by_name(name).await.map_err(|e| e.op(OP))?;
    app.db.remove_controller(&controller.uuid).await?;
    app.policy.remove_controller(&controller.uuid).await?;
    Ok(())
}

/// Mark a controller deprecated so model placement avoids it.
pub async fn set_controller_deprecated(
    app: &App,
    user: &AuthenticatedUser,
    name: &str,
    deprecated: bool,
) -> Result<()> {
    ensure_admin(user)?;
    let mut controller = app.db.get_controller_by_name(name).await?;
    controller.deprecated = deprecated;
    app.db.update_controller(&controller).await
}
