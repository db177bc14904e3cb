//! Entity tags — the typed references the policy store and the catalog share.
//!
//! A [`Tag`] is `(kind, id)` with an optional relation suffix. Its canonical
//! string form is the tuple-key form used by the policy store:
//! `model:0f9e...` or `group:37ab...#member`. The human-readable name form
//! (`model-alice@example.com/prod`) is handled by the tag resolver, which
//! needs catalog lookups and therefore lives with the server.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, ErrorKind, Result};

/// The wildcard user id, matching any user in a tuple object position.
pub const WILDCARD_USER: &str = "*";

/// The identity that represents "everyone" at the system boundary.
///
/// Stored in the policy store as `user:*`; translated back to this name on
/// every read.
pub const EVERYONE_USER: &str = "everyone@external";

// ── Kind ─────────────────────────────────────────────────────────────────

/// The kinds of entity a tag may reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    User,
    Group,
    Role,
    Controller,
    Model,
    Cloud,
    ApplicationOffer,
    ServiceAccount,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::User => "user",
            Kind::Group => "group",
            Kind::Role => "role",
            Kind::Controller => "controller",
            Kind::Model => "model",
            Kind::Cloud => "cloud",
            Kind::ApplicationOffer => "applicationoffer",
            Kind::ServiceAccount => "serviceaccount",
        }
    }

    /// All kinds, in the order used for capability listings.
    pub const ALL: [Kind; 8] = [
        Kind::User,
        Kind::Group,
        Kind::Role,
        Kind::Controller,
        Kind::Model,
        Kind::Cloud,
        Kind::ApplicationOffer,
        Kind::ServiceAccount,
    ];
}

impl FromStr for Kind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Kind::User),
            "group" => Ok(Kind::Group),
            "role" => Ok(Kind::Role),
            "controller" => Ok(Kind::Controller),
            "model" => Ok(Kind::Model),
            "cloud" => Ok(Kind::Cloud),
            "applicationoffer" => Ok(Kind::ApplicationOffer),
            "serviceaccount" => Ok(Kind::ServiceAccount),
            other => Err(Error::new(
                ErrorKind::FailedToParseTupleKey,
                format!("unknown entity kind {other:?}"),
            )),
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Relation ─────────────────────────────────────────────────────────────

/// Relations understood by the policy engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Relation {
    Member,
    Assignee,
    Administrator,
    AuditLogViewer,
    Writer,
    Reader,
    Consumer,
    CanAddModel,
    /// Links a controller to the entities it serves.
    Controller,
    /// Links a model to the offers it owns.
    Model,
}

impl Relation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::Member => "member",
            Relation::Assignee => "assignee",
            Relation::Administrator => "administrator",
            Relation::AuditLogViewer => "audit_log_viewer",
            Relation::Writer => "writer",
            Relation::Reader => "reader",
            Relation::Consumer => "consumer",
            Relation::CanAddModel => "can_addmodel",
            Relation::Controller => "controller",
            Relation::Model => "model",
        }
    }
}

impl FromStr for Relation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "member" => Ok(Relation::Member),
            "assignee" => Ok(Relation::Assignee),
            "administrator" => Ok(Relation::Administrator),
            "audit_log_viewer" => Ok(Relation::AuditLogViewer),
            "writer" => Ok(Relation::Writer),
            "reader" => Ok(Relation::Reader),
            "consumer" => Ok(Relation::Consumer),
            "can_addmodel" => Ok(Relation::CanAddModel),
            "controller" => Ok(Relation::Controller),
            "model" => Ok(Relation::Model),
            other => Err(Error::bad_request(format!("unknown relation {other:?}"))),
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Tag ──────────────────────────────────────────────────────────────────

/// A typed entity reference, optionally carrying a relation suffix.
///
/// The id may be empty: a blank tag (`model`) stands for the kind itself and
/// is used for capability listings.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Tag {
    pub kind: Kind,
    pub id: String,
    pub relation: Option<Relation>,
}

impl Tag {
    pub fn new(kind: Kind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            relation: None,
        }
    }

    pub fn with_relation(mut self, relation: Relation) -> Self {
        self.relation = Some(relation);
        self
    }

    /// The `user:*` wildcard matching every user.
    pub fn everyone() -> Self {
        Tag::new(Kind::User, WILDCARD_USER)
    }

    pub fn user(id: impl Into<String>) -> Self {
        Tag::new(Kind::User, id)
    }

    pub fn group(id: impl Into<String>) -> Self {
        Tag::new(Kind::Group, id)
    }

    pub fn role(id: impl Into<String>) -> Self {
        Tag::new(Kind::Role, id)
    }

    pub fn controller(id: impl Into<String>) -> Self {
        Tag::new(Kind::Controller, id)
    }

    pub fn model(id: impl Into<String>) -> Self {
        Tag::new(Kind::Model, id)
    }

    pub fn cloud(id: impl Into<String>) -> Self {
        Tag::new(Kind::Cloud, id)
    }

    pub fn application_offer(id: impl Into<String>) -> Self {
        Tag::new(Kind::ApplicationOffer, id)
    }

    pub fn service_account(id: impl Into<String>) -> Self {
        Tag::new(Kind::ServiceAccount, id)
    }

    pub fn is_blank(&self) -> bool {
        self.id.is_empty()
    }

    pub fn is_wildcard_user(&self) -> bool {
        self.kind == Kind::User && self.id == WILDCARD_USER
    }

    /// Strip the relation suffix.
    pub fn without_relation(&self) -> Tag {
        Tag::new(self.kind, self.id.clone())
    }

    /// Parse the canonical tuple-key form `kind:id[#relation]`.
    pub fn parse(s: &str) -> Result<Tag> {
        let (head, relation) = match s.split_once('#') {
            Some((head, rel)) => (head, Some(rel.parse::<Relation>()?)),
            None => (s, None),
        };
        let (kind, id) = head.split_once(':').ok_or_else(|| {
            Error::new(
                ErrorKind::FailedToParseTupleKey,
                format!("malformed tuple key {s:?}"),
            )
        })?;
        if id.is_empty() {
            return Err(Error::new(
                ErrorKind::FailedToParseTupleKey,
                format!("empty id in tuple key {s:?}"),
            ));
        }
        Ok(Tag {
            kind: kind.parse()?,
            id: id.to_string(),
            relation,
        })
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.id.is_empty() {
            write!(f, "{}:", self.kind)?;
        } else {
            write!(f, "{}:{}", self.kind, self.id)?;
        }
        if let Some(relation) = self.relation {
            write!(f, "#{relation}")?;
        }
        Ok(())
    }
}

/// Returns true when `s` parses as a UUID.
pub fn is_uuid(s: &str) -> bool {
    uuid::Uuid::parse_str(s).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_parse_plain() {
        let tag = Tag::parse("model:0000aaaa").unwrap();
        assert_eq!(tag.kind, Kind::Model);
        assert_eq!(tag.id, "0000aaaa");
        assert_eq!(tag.relation, None);
    }

    #[test]
    fn tag_parse_with_relation() {
        let tag = Tag::parse("group:g1#member").unwrap();
        assert_eq!(tag.kind, Kind::Group);
        assert_eq!(tag.relation, Some(Relation::Member));
    }

    #[test]
    fn tag_parse_rejects_malformed() {
        assert!(Tag::parse("modelabc").is_err());
        assert!(Tag::parse("model:").is_err());
        assert!(Tag::parse("spaceship:x").is_err());
        assert!(Tag::parse("model:x#pilot").is_err());
    }

    #[test]
    fn tag_display_round_trips() {
        for s in ["user:alice@example.com", "group:g#member", "user:*"] {
            assert_eq!(Tag::parse(s).unwrap().to_string(), s);
        }
    }

    #[test]
    fn wildcard_user_detected() {
        assert!(Tag::everyone().is_wildcard_user());
        assert!(!Tag::user("alice@example.com").is_wildcard_user());
    }
}
