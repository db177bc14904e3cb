//! The authorization model.
//!
//! Each entity kind declares its relations; each relation names the subject
//! types that may be assigned directly, the stronger relations that imply
//! it, and the userset rules that pull authority in from a linked entity
//! (an administrator of a controller administers every model the
//! controller serves). Callers assert the weakest relation they need and
//! the engine derives the rest.

use manifold_core::{Kind, Relation};

/// A subject type admissible in the object position of a direct tuple.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubjectType {
    /// A plain entity of the given kind, e.g. `user:alice@example.com`.
    Plain(Kind),
    /// The wildcard form `user:*`, matching every user.
    Wildcard(Kind),
    /// A userset, e.g. `group:g#member`.
    Userset(Kind, Relation),
}

/// Authority flowing in from an entity linked by another relation on the
/// same target: "`relation` of whatever `link` points at".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UsersetRule {
    /// The relation on the target that names the linked entity.
    pub link: Relation,
    /// The kind the linked entity must have.
    pub source: Kind,
    /// The relation evaluated on the linked entity.
    pub relation: Relation,
}

/// Definition of one relation on one entity kind.
#[derive(Clone, Copy, Debug)]
pub struct RelationDef {
    pub relation: Relation,
    pub direct: &'static [SubjectType],
    /// Stronger relations on the same target that imply this one.
    pub implied_by: &'static [Relation],
    pub via: &'static [UsersetRule],
}

/// Subject types assignable wherever people (directly or through groups
/// and roles) hold authority.
const ASSIGNABLE: &[SubjectType] = &[
    SubjectType::Plain(Kind::User),
    SubjectType::Wildcard(Kind::User),
    SubjectType::Userset(Kind::Group, Relation::Member),
    SubjectType::Userset(Kind::Role, Relation::Assignee),
];

/// Subject types for group membership and role assignment themselves.
const MEMBERSHIP: &[SubjectType] = &[
    SubjectType::Plain(Kind::User),
    SubjectType::Wildcard(Kind::User),
    SubjectType::Userset(Kind::Group, Relation::Member),
];

const FROM_CONTROLLER: &[UsersetRule] = &[UsersetRule {
    link: Relation::Controller,
    source: Kind::Controller,
    relation: Relation::Administrator,
}];

const FROM_MODEL: &[UsersetRule] = &[UsersetRule {
    link: Relation::Model,
    source: Kind::Model,
    relation: Relation::Administrator,
}];

const GROUP_RELATIONS: &[RelationDef] = &[RelationDef {
    relation: Relation::Member,
    direct: MEMBERSHIP,
    implied_by: &[],
    via: &[],
}];

const ROLE_RELATIONS: &[RelationDef] = &[RelationDef {
    relation: Relation::Assignee,
    direct: MEMBERSHIP,
    implied_by: &[],
    via: &[],
}];

const CONTROLLER_RELATIONS: &[RelationDef] = &[
    RelationDef {
        relation: Relation::Controller,
        direct: &[SubjectType::Plain(Kind::Controller)],
        implied_by: &[],
        via: &[],
    },
    RelationDef {
        relation: Relation::Administrator,
        direct: ASSIGNABLE,
        implied_by: &[],
        via: FROM_CONTROLLER,
    },
    RelationDef {
        relation: Relation::AuditLogViewer,
        direct: ASSIGNABLE,
        implied_by: &[Relation::Administrator],
        via: &[],
    },
];

const MODEL_RELATIONS: &[RelationDef] = &[
    RelationDef {
        relation: Relation::Controller,
        direct: &[SubjectType::Plain(Kind::Controller)],
        implied_by: &[],
        via: &[],
    },
    RelationDef {
        relation: Relation::Administrator,
        direct: ASSIGNABLE,
        implied_by: &[],
        via: FROM_CONTROLLER,
    },
    RelationDef {
        relation: Relation::Writer,
        direct: ASSIGNABLE,
        implied_by: &[Relation::Administrator],
        via: &[],
    },
    RelationDef {
        relation: Relation::Reader,
        direct: ASSIGNABLE,
        implied_by: &[Relation::Writer],
        via: &[],
    },
];

const OFFER_RELATIONS: &[RelationDef] = &[
    RelationDef {
        relation: Relation::Model,
        direct: &[SubjectType::Plain(Kind::Model)],
        implied_by: &[],
        via: &[],
    },
    RelationDef {
        relation: Relation::Administrator,
        direct: ASSIGNABLE,
        implied_by: &[],
        via: FROM_MODEL,
    },
    RelationDef {
        relation: Relation::Consumer,
        direct: ASSIGNABLE,
        implied_by: &[Relation::Administrator],
        via: &[],
    },
    RelationDef {
        relation: Relation::Reader,
        direct: ASSIGNABLE,
        implied_by: &[Relation::Consumer],
        via: &[],
    },
];

const CLOUD_RELATIONS: &[RelationDef] = &[
    RelationDef {
        relation: Relation::Controller,
        direct: &[SubjectType::Plain(Kind::Controller)],
        implied_by: &[],
        via: &[],
    },
    RelationDef {
        relation: Relation::Administrator,
        direct: ASSIGNABLE,
        implied_by: &[],
        via: FROM_CONTROLLER,
    },
    RelationDef {
        relation: Relation::CanAddModel,
        direct: ASSIGNABLE,
        implied_by: &[Relation::Administrator],
        via: &[],
    },
];

const SERVICEACCOUNT_RELATIONS: &[RelationDef] = &[RelationDef {
    relation: Relation::Administrator,
    direct: ASSIGNABLE,
    implied_by: &[],
    via: &[],
}];

/// Relations defined on the given entity kind.
pub fn relations_of(kind: Kind) -> &'static [RelationDef] {
    match kind {
        Kind::User => &[],
        Kind::Group => GROUP_RELATIONS,
        Kind::Role => ROLE_RELATIONS,
        Kind::Controller => CONTROLLER_RELATIONS,
        Kind::Model => MODEL_RELATIONS,
        Kind::ApplicationOffer => OFFER_RELATIONS,
        Kind::Cloud => CLOUD_RELATIONS,
        Kind::ServiceAccount => SERVICEACCOUNT_RELATIONS,
    }
}

/// Look up the definition of `relation` on `kind`.
pub fn relation_def(kind: Kind, relation: Relation) -> Option<&'static RelationDef> {
    relations_of(kind).iter().find(|def| def.relation == relation)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_implied_by_exists_on_the_same_kind() {
        for kind in Kind::ALL {
            for def in relations_of(kind) {
                for implied in def.implied_by {
                    assert!(
                        relation_def(kind, *implied).is_some(),
                        "{kind}.{} implied by undefined {implied}",
                        def.relation
                    );
                }
            }
        }
    }

    #[test]
    fn userset_rules_reference_defined_relations() {
        for kind in Kind::ALL {
            for def in relations_of(kind) {
                for rule in def.via {
                    assert!(relation_def(kind, rule.link).is_some());
                    assert!(relation_def(rule.source, rule.relation).is_some());
                }
            }
        }
    }

    #[test]
    fn reader_is_weaker_than_writer() {
        let def = relation_def(Kind::Model, Relation::Reader).unwrap();
        assert_eq!(def.implied_by, &[Relation::Writer]);
    }
}
