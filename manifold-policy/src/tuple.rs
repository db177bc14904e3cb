//! Relationship tuples — the facts the policy store holds.

use std::fmt;

use manifold_core::{Error, ErrorKind, Relation, Result, Tag};

/// A single `(object, relation, target)` fact.
///
/// The object is the subject of the edge and may carry a subject relation
/// (`group:g#member` means "every member of g"). The target never carries
/// a relation.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RelationTuple {
    pub object: Tag,
    pub relation: Relation,
    pub target: Tag,
}

impl RelationTuple {
    pub fn new(object: Tag, relation: Relation, target: Tag) -> Self {
        Self {
            object,
            relation,
            target,
        }
    }

    /// Parse a tuple from its three string forms.
    pub fn parse(object: &str, relation: &str, target: &str) -> Result<Self> {
        let target = Tag::parse(target)?;
        if target.relation.is_some() {
            return Err(Error::new(
                ErrorKind::FailedToParseTupleKey,
                format!("target {target} must not carry a relation"),
            ));
        }
        Ok(Self {
            object: Tag::parse(object)?,
            relation: relation.parse()?,
            target,
        })
    }

    /// Canonical string key, also the iteration order of the store.
    pub fn key(&self) -> String {
        format!("{} {} {}", self.target, self.relation, self.object)
    }
}

impl fmt::Display for RelationTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.object, self.relation, self.target)
    }
}

/// A partial match over stored tuples. `None` fields match anything; the
/// object field matches exactly, including its subject relation.
#[derive(Clone, Debug, Default)]
pub struct TupleFilter {
    pub object: Option<Tag>,
    pub relation: Option<Relation>,
    pub target: Option<Tag>,
}

impl TupleFilter {
    pub fn matches(&self, tuple: &RelationTuple) -> bool {
        if let Some(object) = &self.object {
            if object != &tuple.object {
                return false;
            }
        }
        if let Some(relation) = self.relation {
            if relation != tuple.relation {
                return false;
            }
        }
        if let Some(target) = &self.target {
            if target != &tuple.target {
                return false;
            }
        }
        true
    }
}
