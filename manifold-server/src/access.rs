//! Access-level vocabulary and the bridge between access strings and
//! policy relations.
//!
//! The RPC surface and minted tokens speak access strings (`admin`,
//! `write`, `read`); the policy store speaks relations. Granting a strong
//! relation subsumes the weaker ones through the engine's hierarchy, so
//! these tables always consult strongest-first.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use manifold_core::{Error, Kind, Relation, Result, Tag};
use manifold_policy::{PolicyEngine, RelationTuple};

use crate::resolver::TagResolver;

/// Access strings per kind, strongest first.
pub fn access_levels(kind: Kind) -> &'static [(&'static str, Relation)] {
    match kind {
        Kind::Model => &[
            ("admin", Relation::Administrator),
            ("write", Relation::Writer),
            ("read", Relation::Reader),
        ],
        Kind::Controller => &[
            ("superuser", Relation::Administrator),
            ("audit-log-viewer", Relation::AuditLogViewer),
        ],
        Kind::Cloud => &[
            ("admin", Relation::Administrator),
            ("add-model", Relation::CanAddModel),
        ],
        Kind::ApplicationOffer => &[
            ("admin", Relation::Administrator),
            ("consume", Relation::Consumer),
            ("read", Relation::Reader),
        ],
        Kind::ServiceAccount => &[("admin", Relation::Administrator)],
        Kind::Group => &[("member", Relation::Member)],
        Kind::Role => &[("assignee", Relation::Assignee)],
        Kind::User => &[],
    }
}

/// The relation an access string canonicalizes to on the given kind.
pub fn relation_for_access(kind: Kind, access: &str) -> Result<Relation> {
    access_levels(kind)
        .iter()
        .find(|(name, _)| *name == access)
        .map(|(_, relation)| *relation)
        .ok_or_else(|| {
            Error::bad_request(format!("unknown access {access:?} for {kind}"))
        })
}

/// The strongest access string a user holds on a target, if any.
pub async fn strongest_access(
    policy: &PolicyEngine,
    user: &Tag,
    target: &Tag,
) -> Result<Option<String>> {
    for (name, relation) in access_levels(target.kind) {
        let probe = RelationTuple::new(user.clone(), *relation, target.clone());
        if policy.check(&probe).await? {
            return Ok(Some((*name).to_string()));
        }
    }
    Ok(None)
}

// ── Minter bridge ────────────────────────────────────────────────────────

/// [`manifold_auth::AccessResolver`] over the policy engine: answers the
/// minter's access questions for JAAS-form tags.
pub struct PolicyAccessResolver {
    policy: PolicyEngine,
    resolver: TagResolver,
}

impl PolicyAccessResolver {
    pub fn new(policy: PolicyEngine, resolver: TagResolver) -> Self {
        Self { policy, resolver }
    }

    async fn access_inner(&self, user: &str, tag: &str) -> Result<Option<String>> {
        let user = self.user_tag(user)?;
        let target = self.resolver.resolve(tag).await?;
        if target.kind == Kind::Controller {
            // Every authenticated user may log in to a controller; only
            // administrators get superuser.
            let admin = RelationTuple::new(
                user.clone(),
                Relation::Administrator,
                target.without_relation(),
            );
            let level = if self.policy.check(&admin).await? {
                "superuser"
            } else {
                "login"
            };
            return Ok(Some(level.to_string()));
        }
        strongest_access(&self.policy, &user, &target.without_relation()).await
    }

    async fn check_inner(&self, user: &str, access: &str, tag: &str) -> Result<bool> {
        let user = self.user_tag(user)?;
        let target = self.resolver.resolve(tag).await?;
        if target.kind == Kind::Controller && access == "login" {
            return Ok(true);
        }
        let relation = relation_for_access(target.kind, access)?;
        let probe = RelationTuple::new(user, relation, target.without_relation());
        self.policy.check(&probe).await
    }

    fn user_tag(&self, user: &str) -> Result<Tag> {
        let name = user
            .strip_prefix("user-")
            .ok_or_else(|| Error::bad_request(format!("not a user tag: {user:?}")))?;
        Ok(Tag::user(name))
    }
}

impl manifold_auth::AccessResolver for PolicyAccessResolver {
    fn access<'a>(
        &'a self,
        user: &'a str,
        tag: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>>> + Send + 'a>> {
        Box::pin(self.access_inner(user, tag))
    }

    fn check<'a>(
        &'a self,
        user: &'a str,
        access: &'a str,
        tag: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
        Box::pin(self.check_inner(user, access, tag))
    }
}

/// Shared constructor used by the proxy: a resolver the minter can own.
pub fn minter_resolver(
    policy: PolicyEngine,
    resolver: TagResolver,
) -> Arc<dyn manifold_auth::AccessResolver> {
    Arc::new(PolicyAccessResolver::new(policy, resolver))
}
