//! Tag resolver — bridges the human-readable name forms and the id forms
//! the policy store works with.
//!
//! Name forms look like `model-alice@example.com/prod#administrator`;
//! id forms carry a UUID trailer. A bare kind (`model`) is the blank tag
//! used for capability listings.

use manifold_core::{names, tag, Error, ErrorKind, Kind, Relation, Result, Tag};
use manifold_store::Database;

/// Resolves tags against the catalog. The plane itself appears as the
/// controller named in the configuration.
#[derive(Clone)]
pub struct TagResolver {
    db: Database,
    plane_name: String,
    plane_uuid: String,
}

impl TagResolver {
    pub fn new(db: Database, plane_name: impl Into<String>, plane_uuid: impl Into<String>) -> Self {
        Self {
            db,
            plane_name: plane_name.into(),
            plane_uuid: plane_uuid.into(),
        }
    }

    pub fn plane_controller_tag(&self) -> Tag {
        Tag::controller(&self.plane_uuid)
    }

    /// Parse and resolve a string tag of the form
    /// `<kind>[-<trailer>][#<relation>]` into an id-form [`Tag`].
    pub async fn resolve(&self, s: &str) -> Result<Tag> {
        let (head, relation) = match s.split_once('#') {
            Some((head, relation)) => (head, Some(relation.parse::<Relation>()?)),
            None => (s, None),
        };
        let (kind, trailer) = match head.split_once('-') {
            Some((kind, trailer)) => (kind.parse::<Kind>()?, trailer),
            None => {
                // Blank-kind tag.
                let kind = head.parse::<Kind>()?;
                let mut tag = Tag::new(kind, "");
                tag.relation = relation;
                return Ok(tag);
            }
        };
        if trailer.is_empty() {
            return Err(Error::new(
                ErrorKind::FailedToParseTupleKey,
                format!("tag {s:?} has an empty trailer"),
            ));
        }

        let mut resolved = if tag::is_uuid(trailer) {
            Tag::new(kind, trailer)
        } else {
            self.resolve_name(kind, trailer).await?
        };
        resolved.relation = relation;
        Ok(resolved)
    }

    async fn resolve_name(&self, kind: Kind, trailer: &str) -> Result<Tag> {
        match kind {
            Kind::User => {
                if trailer == tag::EVERYONE_USER {
                    return Ok(Tag::everyone());
                }
                if !names::is_external_principal(trailer) || !names::is_valid_principal(trailer) {
                    return Err(Error::new(
                        ErrorKind::FailedToResolveTupleResource,
                        format!("invalid user principal {trailer:?}"),
                    ));
                }
                Ok(Tag::user(trailer))
            }
            Kind::ServiceAccount => {
                let id = names::ensure_serviceaccount_suffix(trailer);
                if !names::is_service_account(&id) {
                    return Err(Error::new(
                        ErrorKind::FailedToResolveTupleResource,
                        format!("invalid service account id {trailer:?}"),
                    ));
                }
                Ok(Tag::service_account(id))
            }
            Kind::Controller => {
                if trailer == self.plane_name {
                    return Ok(Tag::controller(&self.plane_uuid));
                }
                let controller = self
                    .db
                    .get_controller_by_name(trailer)
                    .await
                    .map_err(|e| resolve_err(e, "controller", trailer))?;
                Ok(Tag::controller(controller.uuid))
            }
            Kind::Model => {
                let (owner, name) = trailer.split_once('/').ok_or_else(|| {
                    Error::new(
                        ErrorKind::FailedToResolveTupleResource,
                        format!("model tag {trailer:?} is not of the form owner/name"),
                    )
                })?;
                let model = self
                    .db
                    .get_model_by_name(owner, name)
                    .await
                    .map_err(|e| resolve_err(e, "model", trailer))?;
                let uuid = model.uuid.ok_or_else(|| {
                    Error::new(
                        ErrorKind::FailedToResolveTupleResource,
                        format!("model {trailer} is still being created"),
                    )
                })?;
                Ok(Tag::model(uuid))
            }
            Kind::ApplicationOffer => {
                let offer = self
                    .db
                    .get_application_offer_by_url(trailer)
                    .await
                    .map_err(|e| resolve_err(e, "application offer", trailer))?;
                Ok(Tag::application_offer(offer.uuid))
            }
            Kind::Cloud => {
                let cloud = self
                    .db
                    .get_cloud(trailer)
                    .await
                    .map_err(|e| resolve_err(e, "cloud", trailer))?;
                Ok(Tag::cloud(cloud.name))
            }
            Kind::Group => {
                let group = self
                    .db
                    .get_group_by_name(trailer)
                    .await
                    .map_err(|e| resolve_err(e, "group", trailer))?;
                Ok(Tag::group(group.uuid))
            }
            Kind::Role => {
                let role = self
                    .db
                    .get_role_by_name(trailer)
                    .await
                    .map_err(|e| resolve_err(e, "role", trailer))?;
                Ok(Tag::role(role.uuid))
            }
        }
    }

    /// Format an id-form tag for display. With `resolve_uuids`, UUID
    /// trailers are replaced by their name forms; a UUID that no longer
    /// resolves yields `not-found`, which the orphan sweeper relies on.
    pub async fn to_jaas_tag(&self, tag: &Tag, resolve_uuids: bool) -> Result<String> {
        let mut out = if resolve_uuids {
            format!("{}-{}", tag.kind, self.display_trailer(tag).await?)
        } else {
            let id = if tag.is_wildcard_user() {
                tag::EVERYONE_USER
            } else {
                tag.id.as_str()
            };
            format!("{}-{id}", tag.kind)
        };
        if let Some(relation) = tag.relation {
            out.push('#');
            out.push_str(relation.as_str());
        }
        Ok(out)
    }

    async fn display_trailer(&self, tag: &Tag) -> Result<String> {
        match tag.kind {
            Kind::User => Ok(if tag.is_wildcard_user() {
                tag::EVERYONE_USER.to_string()
            } else {
                tag.id.clone()
            }),
            Kind::ServiceAccount => Ok(tag.id.clone()),
            Kind::Cloud => Ok(tag.id.clone()),
            Kind::Controller => {
                if tag.id == self.plane_uuid {
                    return Ok(self.plane_name.clone());
                }
                Ok(self.db.get_controller(&tag.id).await?.name)
            }
            Kind::Model => {
                let model = self.db.get_model(&tag.id).await?;
                Ok(format!("{}/{}", model.owner.name, model.name))
            }
            Kind::ApplicationOffer => Ok(self.db.get_application_offer(&tag.id).await?.url),
            Kind::Group => Ok(self.db.get_group(&tag.id).await?.name),
            Kind::Role => Ok(self.db.get_role(&tag.id).await?.name),
        }
    }
}

fn resolve_err(e: Error, what: &str, trailer: &str) -> Error {
    if e.is_not_found() {
        Error::new(
            ErrorKind::NotFound,
            format!("{what} {trailer:?} not found"),
        )
    } else {
        e
    }
}
