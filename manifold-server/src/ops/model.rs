//! Model lifecycle across the federation: creation with controller
//! selection, import, migration, destruction, listing.

use std::collections::HashMap;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use manifold_client::params::{CreateModelArgs, MigrationSpec, MigrationTargetInfo};
use manifold_core::{names, Error, Kind, Relation, Result, Tag};
use manifold_policy::RelationTuple;
use manifold_store::{
    ApplicationOffer, CloudCredential, CloudRegion, Controller, Life, Model,
    RegionControllerPriority,
};

use crate::app::{App, AuthenticatedUser};
use crate::ops::{ensure_admin, ensure_model_relation};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AddModelRequest {
    pub name: String,
    /// Defaults to the caller; only administrators may set another owner.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub owner: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cloud: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub region: String,
    /// Credential name on the chosen cloud; the first valid credential of
    /// the owner is used when omitted.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub credential: String,
    #[serde(default)]
    pub config: HashMap<String, Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelSummary {
    pub name: String,
    pub uuid: String,
    pub owner: String,
    pub cloud: String,
    pub region: String,
    pub controller: String,
    pub life: String,
}

impl ModelSummary {
    fn from_store(model: &Model) -> Self {
        Self {
            name: model.name.clone(),
            uuid: model.uuid.clone().unwrap_or_default(),
            owner: model.owner.name.clone(),
            cloud: model.cloud_region.cloud_name.clone(),
            region: model.cloud_region.name.clone(),
            controller: model.controller.name.clone(),
            life: model.life.as_str().to_string(),
        }
    }
}

/// Pick a controller for a region: shuffle, then stable-sort by priority
/// descending, so `deployed` wins and equal priorities tie-break
/// uniformly at random.
fn select_controller(candidates: &[RegionControllerPriority]) -> Option<Controller> {
    let mut candidates: Vec<&RegionControllerPriority> = candidates
        .iter()
        .filter(|p| !p.controller.deprecated)
        .collect();
    candidates.shuffle(&mut rand::thread_rng());
    candidates.sort_by_key(|p| std::cmp::Reverse(p.priority));
    candidates.first().map(|p| p.controller.clone())
}

/// The Juju-style credential tag for a catalog credential.
fn credential_tag(credential: &CloudCredential) -> String {
    format!(
        "cloudcred-{}_{}_{}",
        credential.cloud_name, credential.owner_name, credential.name
    )
}

pub async fn add_model(
    app: &App,
    user: &AuthenticatedUser,
    req: AddModelRequest,
) -> Result<ModelSummary> {
    const OP: &str = "add-model";
    if req.name.is_empty() {
        return Err(Error::bad_request("model name is required").op(OP));
    }

    // Only an administrator may create on behalf of another identity.
    let owner_name = if req.owner.is_empty() || req.owner == user.identity.name {
        user.identity.name.clone()
    } else {
        ensure_admin(user)?;
        req.owner.clone()
    };
    let owner = app.db.ensure_identity(&owner_name).await?;

    // Resolve the cloud: explicit, or implicit when exactly one is open
    // to the caller.
    let cloud_name = if req.cloud.is_empty() {
        let visible = app
            .policy
            .list_objects(&user.tag(), Relation::CanAddModel, Kind::Cloud, &[])
            .await?;
        match visible.as_slice() {
            [only] => only.id.clone(),
            [] => return Err(Error::unauthorized("no cloud is open to you").op(OP)),
            _ => return Err(Error::bad_request("multiple clouds available, specify one").op(OP)),
        }
    } else {
        req.cloud.clone()
    };
    let cloud = app.db.get_cloud(&cloud_name).await.map_err(|e| e.op(OP))?;

    // The caller needs can_addmodel; the hierarchy derives it from
    // administrator.
    let probe = RelationTuple::new(user.tag(), Relation::CanAddModel, Tag::cloud(&cloud_name));
    if !user.admin && !app.policy.check(&probe).await? {
        return Err(Error::unauthorized(format!(
            "{} cannot add models on cloud {cloud_name:?}",
            user.identity.name
        ))
        .op(OP));
    }

    // Pick the region: the named one, or the first with a controller.
    let region: &CloudRegion = if req.region.is_empty() {
        cloud
            .regions
            .iter()
            .find(|r| !r.controllers.is_empty())
            .ok_or_else(|| Error::bad_request("unsupported cloud region").op(OP))?
    } else {
        let region = cloud
            .region(&req.region)
            .ok_or_else(|| Error::bad_request("unsupported cloud region").op(OP))?;
        if region.controllers.is_empty() {
            return Err(Error::bad_request("unsupported cloud region").op(OP));
        }
        region
    };

    // Pick the credential: explicit name, or the owner's first that is
    // not known-invalid.
    let credential = if req.credential.is_empty() {
        app.db
            .cloud_credentials_for(&owner_name, &cloud_name)
            .await?
            .into_iter()
            .find(|c| c.valid != Some(false))
            .ok_or_else(|| {
                Error::bad_request(format!(
                    "no valid credential for {owner_name} on cloud {cloud_name:?}"
                ))
                .op(OP)
            })?
    } else {
        app.db
            .get_cloud_credential(&owner_name, &cloud_name, &req.credential)
            .await
            .map_err(|e| e.op(OP))?
    };

    // Merge config: cloud defaults, then region defaults, then the
    // caller's values.
    let mut config = cloud.defaults.clone();
    config.extend(region.defaults.clone());
    config.extend(req.config.clone());

    let controller = select_controller(&region.controllers)
        .ok_or_else(|| Error::bad_request("unsupported cloud region").op(OP))?;

    // Reserve the (owner, name) pair before talking to the controller.
    let mut model = Model {
        name: req.name.clone(),
        owner: owner.clone(),
        controller: controller.clone(),
        cloud_region: region.clone(),
        credential: credential.clone(),
        life: Life::Alive,
        ..Default::default()
    };
    app.db.add_model(&mut model).await?;

    let created = async {
        let api = app.dial_controller(&controller).await?;
        let info = api
            .create_model(CreateModelArgs {
                name: req.name.clone(),
                owner_tag: format!("user-{owner_name}"),
                cloud_tag: format!("cloud-{cloud_name}"),
                cloud_region: region.name.clone(),
                cloud_credential_tag: credential_tag(&credential),
                config,
            })
            .await?;
        Ok::<_, Error>((api, info))
    }
    .await;

    let (api, info) = match created {
        Ok(pair) => pair,
        Err(e) => {
            // The placeholder must not survive a failed creation.
            if let Err(cleanup) = app.db.delete_model(&model.id).await {
                tracing::error!(model = %req.name, error = %cleanup, "could not remove placeholder model");
            }
            return Err(e.op(OP));
        }
    };

    let target = app.dial_target(&controller).await;
    if !target.username.is_empty() {
        if let Err(e) = api
            .grant_model_admin(&info.uuid, &format!("user-{}", target.username))
            .await
        {
            tracing::warn!(model = %info.uuid, error = %e, "could not grant the plane admin on the new model");
        }
    }

    model.uuid = Some(info.uuid.clone());
    if !info.life.is_empty() {
        model.life = Life::parse(&info.life)?;
    }
    app.db.update_model(&model).await?;

    app.policy
        .add_relations(&[
            RelationTuple::new(
                Tag::controller(&controller.uuid),
                Relation::Controller,
                Tag::model(&info.uuid),
            ),
            RelationTuple::new(
                Tag::user(&owner_name),
                Relation::Administrator,
                Tag::model(&info.uuid),
            ),
        ])
        .await?;

    Ok(ModelSummary::from_store(&model))
}

/// Models the caller can read, resolved through the policy store.
pub async fn list_models(app: &App, user: &AuthenticatedUser) -> Result<Vec<ModelSummary>> {
    let readable = app
        .policy
        .list_objects(&user.tag(), Relation::Reader, Kind::Model, &[])
        .await?;
    let mut out = Vec::with_capacity(readable.len());
    for tag in readable {
        match app.db.get_model(&tag.id).await {
            Ok(model) => out.push(ModelSummary::from_store(&model)),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
    }
    out.sort_by(|a, b| (&a.owner, &a.name).cmp(&(&b.owner, &b.name)));
    Ok(out)
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ImportModelRequest {
    pub controller: String,
    #[serde(rename = "model-uuid")]
    pub model_uuid: String,
    /// Switch ownership to this external identity.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub owner: String,
}

/// Import a model that already lives on one of the federated controllers.
pub async fn import_model(
    app: &App,
    user: &AuthenticatedUser,
    req: ImportModelRequest,
) -> Result<ModelSummary> {
    const OP: &str = "import-model";
    ensure_admin(user)?;

    let controller = app
        .db
        .get_controller_by_name(&req.controller)
        .await
        .map_err(|e| e.op(OP))?;
    let api = app.dial_controller(&controller).await.map_err(|e| e.op(OP))?;
    let info = api.model_info(&req.model_uuid).await.map_err(|e| e.op(OP))?;

    let original_owner = info
        .owner_tag
        .strip_prefix("user-")
        .unwrap_or(&info.owner_tag)
        .to_string();
    let owner_name = if req.owner.is_empty() {
        if !names::is_external_principal(&original_owner) {
            return Err(Error::bad_request(format!(
                "model owner {original_owner:?} is a local user, set an owner explicitly"
            ))
            .op(OP));
        }
        original_owner.clone()
    } else {
        if !names::is_external_principal(&req.owner) {
            return Err(Error::bad_request(format!(
                "owner {:?} is not an external identity",
                req.owner
            ))
            .op(OP));
        }
        req.owner.clone()
    };
    let owner = app.db.ensure_identity(&owner_name).await?;

    let cloud_name = info
        .cloud_tag
        .strip_prefix("cloud-")
        .unwrap_or(&info.cloud_tag)
        .to_string();
    let cloud = app.db.get_cloud(&cloud_name).await.map_err(|e| e.op(OP))?;
    let region = cloud
        .region(&info.cloud_region)
        .cloned()
        .ok_or_else(|| {
            Error::not_found(format!(
                "region {:?} of cloud {cloud_name:?} is not known here",
                info.cloud_region
            ))
            .op(OP)
        })?;

    let credential = app
        .db
        .cloud_credentials_for(&owner_name, &cloud_name)
        .await?
        .into_iter()
        .find(|c| c.valid != Some(false))
        .ok_or_else(|| {
            Error::bad_request(format!(
                "{owner_name} has no usable credential on cloud {cloud_name:?}"
            ))
            .op(OP)
        })?;

    let offers = api
        .list_application_offers(&original_owner, &info.name)
        .await
        .map_err(|e| e.op(OP))?;

    let mut model = Model {
        uuid: Some(info.uuid.clone()),
        name: info.name.clone(),
        owner,
        controller: controller.clone(),
        cloud_region: region,
        credential,
        life: if info.life.is_empty() {
            Life::Alive
        } else {
            Life::parse(&info.life)?
        },
        ..Default::default()
    };
    app.db.add_model(&mut model).await?;

    let mut tuples = vec![
        RelationTuple::new(
            Tag::controller(&controller.uuid),
            Relation::Controller,
            Tag::model(&info.uuid),
        ),
        RelationTuple::new(
            Tag::user(&owner_name),
            Relation::Administrator,
            Tag::model(&info.uuid),
        ),
    ];
    for offer in &offers {
        let record = ApplicationOffer {
            uuid: offer.offer_uuid.clone(),
            model_id: model.id.clone(),
            name: offer.offer_name.clone(),
            url: offer.offer_url.clone(),
        };
        app.db.add_application_offer(&record).await?;
        tuples.push(RelationTuple::new(
            Tag::model(&info.uuid),
            Relation::Model,
            Tag::application_offer(&offer.offer_uuid),
        ));
        tuples.push(RelationTuple::new(
            Tag::user(&owner_name),
            Relation::Administrator,
            Tag::application_offer(&offer.offer_uuid),
        ));
    }
    app.policy.add_relations(&tuples).await?;

    model.offers = app.db.offers_for_model(&model.id).await?;
    Ok(ModelSummary::from_store(&model))
}

/// Point an already-migrated model at its new controller.
pub async fn update_migrated_model(
    app: &App,
    user: &AuthenticatedUser,
    model_uuid: &str,
    target_controller: &str,
) -> Result<()> {
    const OP: &str = "update-migrated-model";
    ensure_admin(user)?;

    let mut model = app.db.get_model(model_uuid).await.map_err(|e| e.op(OP))?;
    let controller = app
        .db
        .get_controller_by_name(target_controller)
        .await
        .map_err(|e| e.op(OP))?;

    // The target must actually know the model.
    let api = app.dial_controller(&controller).await.map_err(|e| e.op(OP))?;
    api.model_info(model_uuid).await.map_err(|e| e.op(OP))?;

    let old_controller = model.controller.uuid.clone();
    model.controller = controller.clone();
    app.db.update_model(&model).await?;

    app.policy
        .remove_relations(&[RelationTuple::new(
            Tag::controller(&old_controller),
            Relation::Controller,
            Tag::model(model_uuid),
        )])
        .await?;
    app.policy
        .add_relations(&[RelationTuple::new(
            Tag::controller(&controller.uuid),
            Relation::Controller,
            Tag::model(model_uuid),
        )])
        .await?;
    Ok(())
}

/// Ask the model's controller to begin migrating it to another federated
/// controller. Reports the backend's migration id.
pub async fn initiate_migration(
    app: &App,
    user: &AuthenticatedUser,
    model_uuid: &str,
    target_controller: &str,
) -> Result<String> {
    const OP: &str = "initiate-migration";
    ensure_model_relation(app, user, model_uuid, Relation::Administrator).await?;

    let model = app.db.get_model(model_uuid).await.map_err(|e| e.op(OP))?;
    let target = app
        .db
        .get_controller_by_name(target_controller)
        .await
        .map_err(|e| e.op(OP))?;
    let target_dial = app.dial_target(&target).await;

    let api = app
        .dial_controller(&model.controller)
        .await
        .map_err(|e| e.op(OP))?;
    let spec = MigrationSpec {
        model_tag: format!("model-{model_uuid}"),
        target_info: MigrationTargetInfo {
            controller_tag: format!("controller-{}", target.uuid),
            addrs: target_dial.candidates(),
            ca_cert: target.ca_cert.clone(),
            auth_tag: format!("user-{}", target_dial.username),
            password: target_dial.password.clone(),
        },
    };
    api.initiate_migration(spec).await
}

/// Mark a model dying and ask its controller to destroy it. The row is
/// deleted later, by the dying-model sweeper, once the backend reports
/// the model gone.
pub async fn destroy_model(app: &App, user: &AuthenticatedUser, model_uuid: &str) -> Result<()> {
    const OP: &str = "destroy-model";
    ensure_model_relation(app, user, model_uuid, Relation::Administrator).await?;

    let model = app.db.get_model(model_uuid).await.map_err(|e| e.op(OP))?;
    app.db.set_model_life(&model.id, Life::Dying).await?;

    let destroyed = async {
        let api = app.dial_controller(&model.controller).await?;
        api.destroy_model(model_uuid).await
    }
    .await;
    if let Err(e) = destroyed {
        app.db.set_model_life(&model.id, Life::Alive).await?;
        return Err(e.op(OP));
    }
    Ok(())
}
