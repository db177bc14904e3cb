//! Hosted clouds: adding a Kubernetes-substrate cloud on top of a hosted
//! region, attaching cloud definitions to controllers, removal.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use manifold_client::params::{CloudRegionSpec, CloudSpec};
use manifold_core::{names, Error, ErrorKind, Relation, Result, Tag};
use manifold_policy::RelationTuple;
use manifold_store::{Cloud, CloudRegion, Controller, PRIORITY_SUPPORTED};

use crate::app::{App, AuthenticatedUser};
use crate::ops::ensure_admin;

/// A cloud definition as supplied by the caller.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CloudDefinition {
    #[serde(rename = "type", default)]
    pub cloud_type: String,
    #[serde(rename = "host-cloud-region", default)]
    pub host_cloud_region: String,
    #[serde(default)]
    pub regions: Vec<String>,
}

impl CloudDefinition {
    fn to_spec(&self) -> CloudSpec {
        CloudSpec {
            cloud_type: self.cloud_type.clone(),
            host_cloud_region: self.host_cloud_region.clone(),
            regions: self
                .regions
                .iter()
                .map(|name| CloudRegionSpec { name: name.clone() })
                .collect(),
        }
    }

    fn to_store(&self, name: &str) -> Cloud {
        Cloud {
            name: name.to_string(),
            cloud_type: self.cloud_type.clone(),
            host_cloud_region: self.host_cloud_region.clone(),
            regions: self
                .regions
                .iter()
                .map(|r| CloudRegion {
                    name: r.clone(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }
}

/// Validate a new hosted-cloud definition and resolve the controller that
/// will host it.
async fn validate_and_pick_host(
    app: &App,
    name: &str,
    definition: &CloudDefinition,
) -> Result<Controller> {
    if names::is_reserved_cloud_name(name) {
        return Err(Error::bad_request(format!(
            "cloud name {name:?} is reserved for a public cloud"
        )));
    }
    if definition.cloud_type != "kubernetes" {
        return Err(Error::new(
            ErrorKind::IncompatibleClouds,
            format!("cloud type {:?} cannot be hosted", definition.cloud_type),
        ));
    }
    if definition.host_cloud_region.is_empty() {
        return Err(Error::new(
            ErrorKind::CloudRegionRequired,
            "a hosted cloud requires a host cloud region",
        ));
    }

    let (host_cloud_name, host_region_name) =
        match definition.host_cloud_region.split_once('/') {
            Some((cloud, region)) => (cloud.to_string(), Some(region.to_string())),
            None => (definition.host_cloud_region.clone(), None),
        };
    let host_cloud = app.db.get_cloud(&host_cloud_name).await?;
    if !host_cloud.host_cloud_region.is_empty() {
        return Err(Error::new(
            ErrorKind::IncompatibleClouds,
            format!("cloud {host_cloud_name:?} is itself hosted"),
        ));
    }
    let host_region = match host_region_name {
        Some(region_name) => host_cloud.region(&region_name).cloned().ok_or_else(|| {
            Error::not_found(format!(
                "region {region_name:?} not found on cloud {host_cloud_name:?}"
            ))
        })?,
        None => {
            if host_cloud.regions.len() != 1 {
                return Err(Error::new(
                    ErrorKind::CloudRegionRequired,
                    format!("cloud {host_cloud_name:?} has more than one region"),
                ));
            }
            host_cloud.regions[0].clone()
        }
    };

    host_region
        .controllers
        .iter()
        .filter(|p| !p.controller.deprecated)
        .max_by_key(|p| p.priority)
        .map(|p| p.controller.clone())
        .ok_or_else(|| {
            Error::bad_request(format!(
                "no controller serves {}/{}",
                host_cloud.name, host_region.name
            ))
        })
}

async fn deploy_cloud_to_controller(
    app: &App,
    user: &AuthenticatedUser,
    controller: &Controller,
    name: &str,
    definition: &CloudDefinition,
) -> Result<()> {
    const OP: &str = "add-cloud-to-controller";

    // Persisting the skeleton first reserves the name.
    app.db.add_cloud(&definition.to_store(name)).await?;

    let api = match app.dial_controller(controller).await {
        Ok(api) => api,
        Err(e) => {
            let _ = app.db.remove_cloud(name).await;
            return Err(e.op(OP));
        }
    };
    if let Err(e) = api.add_cloud(name, &definition.to_spec()).await {
        let _ = app.db.remove_cloud(name).await;
        return Err(e.op(OP));
    }

    // Learn the final definition from the controller. The remote add
    // already succeeded; a failed re-fetch leaks the remote cloud rather
    // than destabilizing it with a rollback.
    match api.cloud(name).await {
        Ok(remote) => {
            for region in &remote.regions {
                let region_id = app.db.add_cloud_region(name, &region.name).await?;
                app.db
                    .upsert_region_priority(&region_id, &controller.uuid, PRIORITY_SUPPORTED)
                    .await?;
            }
        }
        Err(e) => {
            tracing::warn!(cloud = name, error = %e, "cloud added remotely but could not be re-read");
            for region in &definition.regions {
                let region_id = app.db.add_cloud_region(name, region).await?;
                app.db
                    .upsert_region_priority(&region_id, &controller.uuid, PRIORITY_SUPPORTED)
                    .await?;
            }
        }
    }

    app.policy
        .add_relations(&[
            RelationTuple::new(user.tag(), Relation::Administrator, Tag::cloud(name)),
            RelationTuple::new(
                Tag::controller(&controller.uuid),
                Relation::Controller,
                Tag::cloud(name),
            ),
        ])
        .await?;
    Ok(())
}

/// Add a hosted (Kubernetes-substrate) cloud; the hosting controller is
/// inferred from the host cloud region.
pub async fn add_hosted_cloud(
    app: &App,
    user: &AuthenticatedUser,
    name: &str,
    definition: CloudDefinition,
) -> Result<()> {
    let controller = validate_and_pick_host(app, name, &definition).await?;
    deploy_cloud_to_controller(app, user, &controller, name, &definition).await
}

/// Add a cloud definition to a named controller.
pub async fn add_cloud_to_controller(
    app: &App,
    user: &AuthenticatedUser,
    controller_name: &str,
    name: &str,
    definition: CloudDefinition,
) -> Result<()> {
    // Validation mirrors the hosted-cloud path.
    validate_and_pick_host(app, name, &definition).await?;
    let controller = app.db.get_controller_by_name(controller_name).await?;
    if !user.admin {
        let probe = RelationTuple::new(
            user.tag(),
            Relation::Administrator,
            Tag::controller(&controller.uuid),
        );
        if !app.policy.check(&probe).await? {
            return Err(Error::unauthorized(format!(
                "{} does not administer controller {controller_name:?}",
                user.identity.name
            )));
        }
    }
    deploy_cloud_to_controller(app, user, &controller, name, &definition).await
}

/// Remove a cloud from the plane and, best-effort, from the controllers
/// serving it. Refused while models reference the cloud.
pub async fn remove_cloud(app: &App, user: &AuthenticatedUser, name: &str) -> Result<()> {
    const OP: &str = "remove-cloud";
    let cloud = app.db.get_cloud(name).await.map_err(|e| e.op(OP))?;
    if !user.admin {
        let probe =
            RelationTuple::new(user.tag(), Relation::Administrator, Tag::cloud(name));
        if !app.policy.check(&probe).await? {
            return Err(Error::unauthorized(format!(
                "{} does not administer cloud {name:?}",
                user.identity.name
            )));
        }
    }

    let mut notified: Vec<String> = Vec::new();
    for region in &cloud.regions {
        for priority in &region.controllers {
            if notified.contains(&priority.controller.uuid) {
                continue;
            }
            notified.push(priority.controller.uuid.clone());
            match app.dial_controller(&priority.controller).await {
                Ok(api) => {
                    if let Err(e) = api.remove_cloud(name).await {
                        tracing::warn!(cloud = name, controller = %priority.controller.name,
                            error = %e, "could not remove cloud from controller");
                    }
                }
                Err(e) => {
                    tracing::warn!(cloud = name, controller = %priority.controller.name,
                        error = %e, "could not dial controller for cloud removal");
                }
            }
        }
    }

    app.db.remove_cloud(name).await?;
    app.policy.remove_cloud(name).await?;
    Ok(())
}

/// Replace model-config defaults on a cloud or one of its regions.
pub async fn set_cloud_defaults(
    app: &App,
    user: &AuthenticatedUser,
    cloud: &str,
    region: Option<&str>,
    defaults: HashMap<String, serde_json::Value>,
) -> Result<()> {
    ensure_admin(user)?;
    match region {
        None => app.db.set_cloud_defaults(cloud, &defaults).await,
        Some(region_name) => {
            let region_id = app
                .db
                .region_id(cloud, region_name)
                .await?
                .ok_or_else(|| {
                    Error::not_found(format!("region {region_name:?} not found on {cloud:?}"))
                })?;
            app.db.set_region_defaults(&region_id, &defaults).await
        }
    }
}
