//! Granting and revoking access.
//!
//! Model access speaks the `admin`/`write`/`read` vocabulary and
//! canonicalizes to relations; generic relation management goes through
//! the tag resolver so callers may use name forms throughout.

use manifold_core::{Error, Kind, Relation, Result, Tag, EVERYONE_USER};
use manifold_policy::RelationTuple;

use crate::access::{access_levels, relation_for_access};
use crate::app::{App, AuthenticatedUser};
use crate::ops::{ensure_admin, ensure_model_relation};

/// A user principal as it appears in access requests; `everyone` maps to
/// the wildcard.
fn subject_tag(principal: &str) -> Tag {
    if principal == EVERYONE_USER || principal == "everyone" {
        Tag::everyone()
    } else {
        Tag::user(principal)
    }
}

/// Grant `access` on a model. Granting a level the user already holds is
/// a silent success.
pub async fn grant_model_access(
    app: &App,
    user: &AuthenticatedUser,
    model_uuid: &str,
    principal: &str,
    access: &str,
) -> Result<()> {
    ensure_model_relation(app, user, model_uuid, Relation::Administrator).await?;
    let relation = relation_for_access(Kind::Model, access)?;
    app.policy
        .add_relations(&[RelationTuple::new(
            subject_tag(principal),
            relation,
            Tag::model(model_uuid),
        )])
        .await
}

/// Revoke `access` on a model.
///
/// Revoking a level also removes every stronger one, so revoking `read`
/// leaves nothing behind. A user may always revoke their own access: the
/// permission needed for self-revocation is `read` rather than `admin`.
pub async fn revoke_model_access(
    app: &App,
    user: &AuthenticatedUser,
    model_uuid: &str,
    principal: &str,
    access: &str,
) -> Result<()> {
    let self_revocation = principal == user.identity.name;
    let required = if self_revocation {
        Relation::Reader
    } else {
        Relation::Administrator
    };
    ensure_model_relation(app, user, model_uuid, required).await?;

    let levels = access_levels(Kind::Model);
    let index = levels
        .iter()
        .position(|(name, _)| *name == access)
        .ok_or_else(|| Error::bad_request(format!("unknown access {access:?} for model")))?;
    let tuples: Vec<RelationTuple> = levels[..=index]
        .iter()
        .map(|(_, relation)| {
            RelationTuple::new(subject_tag(principal), *relation, Tag::model(model_uuid))
        })
        .collect();
    app.policy.remove_relations(&tuples).await
}

/// Add an arbitrary relation, with both endpoints given in tag form
/// (name or id). Administrators only.
pub async fn grant_relation(
    app: &App,
    user: &AuthenticatedUser,
    object: &str,
    relation: &str,
    target: &str,
) -> Result<()> {
    ensure_admin(user)?;
    let tuple = resolve_tuple(app, object, relation, target).await?;
    app.policy.add_relations(&[tuple]).await
}

/// Remove an arbitrary relation. Administrators only; removing an absent
/// relation is a silent success.
pub async fn revoke_relation(
    app: &App,
    user: &AuthenticatedUser,
    object: &str,
    relation: &str,
    target: &str,
) -> Result<()> {
    ensure_admin(user)?;
    let tuple = resolve_tuple(app, object, relation, target).await?;
    app.policy.remove_relations(&[tuple]).await
}

async fn resolve_tuple(
    app: &App,
    object: &str,
    relation: &str,
    target: &str,
) -> Result<RelationTuple> {
    let object = app.resolver.resolve(object).await?;
    let target = app.resolver.resolve(target).await?;
    if target.relation.is_some() {
        return Err(Error::bad_request(format!(
            "target {target} must not carry a relation"
        )));
    }
    Ok(RelationTuple::new(object, relation.parse()?, target))
}
