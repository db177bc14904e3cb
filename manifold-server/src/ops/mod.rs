//! The federated operations behind the RPC surface.
//!
//! Every operation takes the shared [`App`](crate::app::App), the
//! authenticated caller, and a typed request; checks capability against
//! the policy store; and coordinates the catalog, the policy engine and
//! the controller clients.

pub mod access;
pub mod audit;
pub mod cloud;
pub mod controller;
pub mod group;
pub mod model;
pub mod serviceaccount;

use manifold_core::{Error, Relation, Result};
use manifold_policy::RelationTuple;

use crate::app::{App, AuthenticatedUser};

/// Operations reserved for plane administrators.
pub(crate) fn ensure_admin(user: &AuthenticatedUser) -> Result<()> {
    if user.admin {
        Ok(())
    } else {
        Err(Error::unauthorized(format!(
            "{} is not a plane administrator",
            user.identity.name
        )))
    }
}

/// Does the caller hold `relation` on the model, directly or through the
/// relation hierarchy? Plane administrators hold everything.
pub(crate) async fn has_model_relation(
    app: &App,
    user: &AuthenticatedUser,
    model_uuid: &str,
    relation: Relation,
) -> Result<bool> {
    if user.admin {
        return Ok(true);
    }
    let probe = RelationTuple::new(
        user.tag(),
        relation,
        manifold_core::Tag::model(model_uuid),
    );
    app.policy.check(&probe).await
}

pub(crate) async fn ensure_model_relation(
    app: &App,
    user: &AuthenticatedUser,
    model_uuid: &str,
    relation: Relation,
) -> Result<()> {
    if has_model_relation(app, user, model_uuid, relation).await? {
        Ok(())
    } else {
        Err(Error::unauthorized(format!(
            "{} does not hold {relation} on the model",
            user.identity.name
        )))
    }
}
