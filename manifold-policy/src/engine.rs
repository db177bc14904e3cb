//! The policy decision engine.
//!
//! Wraps a [`TupleStore`] and evaluates the authorization model in
//! [`crate::schema`]: direct tuples, wildcard users, group/role usersets,
//! implied (stronger) relations, and authority pulled in from linked
//! entities. Callers assert the weakest relation they need.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use manifold_core::{Error, ErrorKind, Kind, Relation, Result, Tag, EVERYONE_USER};

use crate::schema::{relation_def, SubjectType};
use crate::store::{TupleStore, TuplePage};
use crate::tuple::{RelationTuple, TupleFilter};

/// Cap on recursion through usersets and linked entities. Deep nesting
/// beyond this is treated as "no access" rather than an error.
const MAX_DEPTH: usize = 24;

/// Page size for the cascaded removals.
const REMOVE_PAGE: usize = 100;

/// Page size used when walking tuples during a check.
const READ_PAGE: usize = 200;

/// Clonable handle to the policy engine.
#[derive(Clone)]
pub struct PolicyEngine {
    store: Arc<dyn TupleStore>,
}

impl PolicyEngine {
    pub fn new(store: Arc<dyn TupleStore>) -> Self {
        Self { store }
    }

    /// Engine plus an in-memory store, for tests.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(crate::store::MemoryStore::new()))
    }

    // ── Writes ─────────────────────────────────────────────────────────

    /// Add relationship tuples. Tuples that already exist are not an error.
    pub async fn add_relations(&self, tuples: &[RelationTuple]) -> Result<()> {
        for tuple in tuples {
            validate_tuple(tuple)?;
        }
        self.store.add(tuples).await?;
        for tuple in tuples {
            tracing::debug!(%tuple, "added relation");
        }
        Ok(())
    }

    /// Remove relationship tuples. Tuples that do not exist are not an error.
    pub async fn remove_relations(&self, tuples: &[RelationTuple]) -> Result<()> {
        self.store.remove(tuples).await?;
        for tuple in tuples {
            tracing::debug!(%tuple, "removed relation");
        }
        Ok(())
    }

    // ── Checks ─────────────────────────────────────────────────────────

    /// Does `tuple.object` hold `tuple.relation` on `tuple.target`?
    pub async fn check(&self, tuple: &RelationTuple) -> Result<bool> {
        self.check_with_context(tuple, &[]).await
    }

    /// Like [`check`](Self::check), additionally treating `context` tuples
    /// as if they were stored.
    pub async fn check_with_context(
        &self,
        tuple: &RelationTuple,
        context: &[RelationTuple],
    ) -> Result<bool> {
        self.check_depth(
            tuple.object.clone(),
            tuple.relation,
            tuple.target.without_relation(),
            context,
            0,
        )
        .await
    }

    fn check_depth<'a>(
        &'a self,
        subject: Tag,
        relation: Relation,
        target: Tag,
        context: &'a [RelationTuple],
        depth: usize,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
        Box::pin(async move {
            if depth > MAX_DEPTH {
                tracing::warn!(%subject, %relation, %target, "relation graph too deep");
                return Ok(false);
            }
            let Some(def) = relation_def(target.kind, relation) else {
                return Ok(false);
            };

            // Relations implied by a stronger one on the same target.
            for implied in def.implied_by {
                if self
                    .check_depth(subject.clone(), *implied, target.clone(), context, depth + 1)
                    .await?
                {
                    return Ok(true);
                }
            }

            // Direct tuples on the target.
            let edges = self.edges(relation, &target, context).await?;
            for edge in &edges {
                if edge.object == subject {
                    return Ok(true);
                }
                if edge.object.is_wildcard_user()
                    && subject.kind == Kind::User
                    && subject.relation.is_none()
                {
                    return Ok(true);
                }
                if let Some(subject_relation) = edge.object.relation {
                    let allowed = def.direct.iter().any(|st| {
                        matches!(st, SubjectType::Userset(kind, rel)
                            if *kind == edge.object.kind && *rel == subject_relation)
                    });
                    if allowed
                        && self
                            .check_depth(
                                subject.clone(),
                                subject_relation,
                                edge.object.without_relation(),
                                context,
                                depth + 1,
                            )
                            .await?
                    {
                        return Ok(true);
                    }
                }
            }

            // Authority from linked entities.
            for rule in def.via {
                let links = self.edges(rule.link, &target, context).await?;
                for link in links {
                    if link.object.kind != rule.source || link.object.relation.is_some() {
                        continue;
                    }
                    if self
                        .check_depth(
                            subject.clone(),
                            rule.relation,
                            link.object.clone(),
                            context,
                            depth + 1,
                        )
                        .await?
                    {
                        return Ok(true);
                    }
                }
            }

            Ok(false)
        })
    }

    /// All stored and contextual tuples `(_, relation, target)`.
    async fn edges(
        &self,
        relation: Relation,
        target: &Tag,
        context: &[RelationTuple],
    ) -> Result<Vec<RelationTuple>> {
        let filter = TupleFilter {
            object: None,
            relation: Some(relation),
            target: Some(target.clone()),
        };
        let mut out: Vec<RelationTuple> = context
            .iter()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        let mut token: Option<String> = None;
        loop {
            let (page, next) = self
                .store
                .read(&filter, READ_PAGE, token.as_deref())
                .await?;
            out.extend(page);
            match next {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(out)
    }

    // ── Listing ────────────────────────────────────────────────────────

    /// Which targets of `kind` does `user` hold `relation` on?
    ///
    /// Unpaginated and potentially expensive: every entity of the kind that
    /// appears in any tuple is a candidate and is checked individually.
    pub async fn list_objects(
        &self,
        user: &Tag,
        relation: Relation,
        kind: Kind,
        context: &[RelationTuple],
    ) -> Result<Vec<Tag>> {
        let mut candidates = std::collections::BTreeSet::new();
        let mut token: Option<String> = None;
        loop {
            let (page, next) = self
                .store
                .read(&TupleFilter::default(), READ_PAGE, token.as_deref())
                .await?;
            for tuple in page {
                if tuple.target.kind == kind {
                    candidates.insert(tuple.target.id.clone());
                }
            }
            match next {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        for tuple in context {
            if tuple.target.kind == kind {
                candidates.insert(tuple.target.id.clone());
            }
        }

        let mut out = Vec::new();
        for id in candidates {
            let target = Tag::new(kind, id);
            let probe = RelationTuple::new(user.clone(), relation, target.clone());
            if self.check_with_context(&probe, context).await? {
                out.push(target);
            }
        }
        Ok(out)
    }

    /// Read stored tuples matching any subset of (object, relation, target).
    ///
    /// The wildcard user is surfaced as the `everyone` identity.
    pub async fn read_related_objects(
        &self,
        filter: &TupleFilter,
        page_size: usize,
        token: Option<&str>,
    ) -> Result<TuplePage> {
        // Callers name the everyone user; the store keeps the wildcard.
        let mut filter = filter.clone();
        if let Some(object) = &mut filter.object {
            if object.kind == Kind::User && object.id == EVERYONE_USER {
                object.id = manifold_core::WILDCARD_USER.to_string();
            }
        }
        let (mut page, next) = self.store.read(&filter, page_size, token).await?;
        for tuple in &mut page {
            if tuple.object.is_wildcard_user() {
                tuple.object.id = EVERYONE_USER.to_string();
            }
        }
        Ok((page, next))
    }

    // ── Cascaded removals ──────────────────────────────────────────────

    /// Remove every tuple in which the group appears, as the membership
    /// target or as a `group#member` userset object.
    pub async fn remove_group(&self, uuid: &str) -> Result<()> {
        self.remove_matching(TupleFilter {
            target: Some(Tag::group(uuid)),
            ..Default::default()
        })
        .await?;
        self.remove_matching(TupleFilter {
            object: Some(Tag::group(uuid).with_relation(Relation::Member)),
            ..Default::default()
        })
        .await
    }

    /// Remove every tuple in which the role appears.
    pub async fn remove_role(&self, uuid: &str) -> Result<()> {
        self.remove_matching(TupleFilter {
            target: Some(Tag::role(uuid)),
            ..Default::default()
        })
        .await?;
        self.remove_matching(TupleFilter {
            object: Some(Tag::role(uuid).with_relation(Relation::Assignee)),
            ..Default::default()
        })
        .await
    }

    /// Remove every tuple in which the cloud appears.
    pub async fn remove_cloud(&self, name: &str) -> Result<()> {
        self.remove_matching(TupleFilter {
            target: Some(Tag::cloud(name)),
            ..Default::default()
        })
        .await
    }

    /// Remove every tuple in which the model appears, including its link
    /// tuples to offers.
    pub async fn remove_model(&self, uuid: &str) -> Result<()> {
        self.remove_matching(TupleFilter {
            target: Some(Tag::model(uuid)),
            ..Default::default()
        })
        .await?;
        self.remove_matching(TupleFilter {
            object: Some(Tag::model(uuid)),
            ..Default::default()
        })
        .await
    }

    /// Remove every tuple in which the application offer appears.
    pub async fn remove_application_offer(&self, uuid: &str) -> Result<()> {
        self.remove_matching(TupleFilter {
            target: Some(Tag::application_offer(uuid)),
            ..Default::default()
        })
        .await
    }

    /// Remove every tuple in which the controller appears.
    pub async fn remove_controller(&self, uuid: &str) -> Result<()> {
        self.remove_matching(TupleFilter {
            target: Some(Tag::controller(uuid)),
            ..Default::default()
        })
        .await?;
        self.remove_matching(TupleFilter {
            object: Some(Tag::controller(uuid)),
            ..Default::default()
        })
        .await
    }

    async fn remove_matching(&self, filter: TupleFilter) -> Result<()> {
        loop {
            // Always read from the start: the page just removed no longer
            // occupies positions in the iteration order.
            let (page, next) = self.store.read(&filter, REMOVE_PAGE, None).await?;
            if page.is_empty() {
                return Ok(());
            }
            self.store.remove(&page).await?;
            if next.is_none() {
                return Ok(());
            }
        }
    }
}

/// Reject tuples the authorization model does not admit.
fn validate_tuple(tuple: &RelationTuple) -> Result<()> {
    let def = relation_def(tuple.target.kind, tuple.relation).ok_or_else(|| {
        Error::new(
            ErrorKind::OpenFgaRequestFailed,
            format!(
                "relation {} is not defined on {}",
                tuple.relation,
                tuple.target.kind
            ),
        )
    })?;
    let object = &tuple.object;
    let admitted = def.direct.iter().any(|st| match st {
        SubjectType::Plain(kind) => {
            object.kind == *kind && object.relation.is_none() && !object.is_wildcard_user()
        }
        SubjectType::Wildcard(kind) => object.kind == *kind && object.id == manifold_core::WILDCARD_USER,
        SubjectType::Userset(kind, rel) => {
            object.kind == *kind && object.relation == Some(*rel)
        }
    });
    if admitted {
        Ok(())
    } else {
        Err(Error::new(
            ErrorKind::OpenFgaRequestFailed,
            format!("tuple {tuple} is not admitted by the authorization model"),
        ))
    }
}
