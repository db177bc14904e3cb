//! Service-account administration.

use manifold_core::{names, Error, Relation, Result, Tag};
use manifold_policy::RelationTuple;

use crate::app::{App, AuthenticatedUser};

/// Claim administration of a service account. The first caller becomes
/// its administrator; later calls by an existing administrator are silent
/// successes, anyone else is refused.
pub async fn add_service_account(
    app: &App,
    user: &AuthenticatedUser,
    client_id: &str,
) -> Result<()> {
    let bare = client_id
        .strip_suffix("@serviceaccount")
        .unwrap_or(client_id);
    if !names::is_valid_client_id(bare) {
        return Err(Error::bad_request(format!(
            "invalid service account id {client_id:?}"
        )));
    }
    let id = names::ensure_serviceaccount_suffix(bare);
    let target = Tag::service_account(&id);

    // Claimed already?
    let (owners, _) = app
        .policy
        .read_related_objects(
            &manifold_policy::TupleFilter {
                relation: Some(Relation::Administrator),
                target: Some(target.clone()),
                ..Default::default()
            },
            1,
            None,
        )
        .await?;
    if !owners.is_empty() {
        let probe = RelationTuple::new(user.tag(), Relation::Administrator, target.clone());
        if !app.policy.check(&probe).await? {
            return Err(Error::unauthorized(format!(
                "service account {id} is already owned"
            )));
        }
        return Ok(());
    }

    app.policy
        .add_relations(&[RelationTuple::new(
            user.tag(),
            Relation::Administrator,
            target,
        )])
        .await
}
