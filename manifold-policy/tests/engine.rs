//! End-to-end checks of the policy engine against the authorization model.

use manifold_core::{Kind, Relation, Tag, EVERYONE_USER};
use manifold_policy::{PolicyEngine, RelationTuple, TupleFilter};

fn tuple(object: &str, relation: Relation, target: &str) -> RelationTuple {
    RelationTuple::new(
        Tag::parse(object).unwrap(),
        relation,
        Tag::parse(target).unwrap(),
    )
}

const MODEL: &str = "model:00000000-0000-0000-0000-000000000001";

#[tokio::test]
async fn reader_grant_does_not_imply_writer() {
    let engine = PolicyEngine::in_memory();
    let bob = "user:bob@example.com";

    assert!(!engine.check(&tuple(bob, Relation::Reader, MODEL)).await.unwrap());

    engine
        .add_relations(&[tuple(bob, Relation::Reader, MODEL)])
        .await
        .unwrap();
    assert!(engine.check(&tuple(bob, Relation::Reader, MODEL)).await.unwrap());
    assert!(!engine.check(&tuple(bob, Relation::Writer, MODEL)).await.unwrap());

    engine
        .add_relations(&[tuple(bob, Relation::Administrator, MODEL)])
        .await
        .unwrap();
    for relation in [Relation::Reader, Relation::Writer, Relation::Administrator] {
        assert!(
            engine.check(&tuple(bob, relation, MODEL)).await.unwrap(),
            "administrator should imply {relation}"
        );
    }
}

#[tokio::test]
async fn group_membership_cascade() {
    let engine = PolicyEngine::in_memory();
    let g = uuid::Uuid::new_v4().to_string();
    let alice = "user:alice@example.com";
    let controller = "controller:11111111-1111-1111-1111-111111111111";

    engine
        .add_relations(&[
            tuple(alice, Relation::Member, &format!("group:{g}")),
            tuple(
                &format!("group:{g}#member"),
                Relation::Administrator,
                controller,
            ),
        ])
        .await
        .unwrap();
    assert!(engine
        .check(&tuple(alice, Relation::Administrator, controller))
        .await
        .unwrap());

    engine.remove_group(&g).await.unwrap();
    assert!(!engine
        .check(&tuple(alice, Relation::Administrator, controller))
        .await
        .unwrap());

    let (page, _) = engine
        .read_related_objects(&TupleFilter::default(), 50, None)
        .await
        .unwrap();
    assert!(page.is_empty(), "no tuple mentioning the group survives");
}

#[tokio::test]
async fn controller_administrator_reaches_models_and_clouds() {
    let engine = PolicyEngine::in_memory();
    let alice = "user:alice@example.com";
    let controller = "controller:c1";

    engine
        .add_relations(&[
            tuple(alice, Relation::Administrator, controller),
            tuple(controller, Relation::Controller, MODEL),
            tuple(controller, Relation::Controller, "cloud:test-cloud"),
        ])
        .await
        .unwrap();

    assert!(engine
        .check(&tuple(alice, Relation::Administrator, MODEL))
        .await
        .unwrap());
    assert!(engine
        .check(&tuple(alice, Relation::Reader, MODEL))
        .await
        .unwrap());
    assert!(engine
        .check(&tuple(alice, Relation::CanAddModel, "cloud:test-cloud"))
        .await
        .unwrap());
    assert!(!engine
        .check(&tuple("user:mallory@example.com", Relation::Reader, MODEL))
        .await
        .unwrap());
}

#[tokio::test]
async fn offer_authority_flows_from_model() {
    let engine = PolicyEngine::in_memory();
    let alice = "user:alice@example.com";
    let offer = "applicationoffer:o1";

    engine
        .add_relations(&[
            tuple(alice, Relation::Administrator, MODEL),
            tuple(MODEL, Relation::Model, offer),
        ])
        .await
        .unwrap();

    assert!(engine
        .check(&tuple(alice, Relation::Administrator, offer))
        .await
        .unwrap());
    assert!(engine
        .check(&tuple(alice, Relation::Consumer, offer))
        .await
        .unwrap());
    assert!(engine
        .check(&tuple(alice, Relation::Reader, offer))
        .await
        .unwrap());
}

#[tokio::test]
async fn wildcard_user_matches_any_user() {
    let engine = PolicyEngine::in_memory();
    engine
        .add_relations(&[tuple("user:*", Relation::CanAddModel, "cloud:test-cloud")])
        .await
        .unwrap();

    assert!(engine
        .check(&tuple(
            "user:someone@example.com",
            Relation::CanAddModel,
            "cloud:test-cloud"
        ))
        .await
        .unwrap());
}

#[tokio::test]
async fn everyone_surfaces_in_reads() {
    let engine = PolicyEngine::in_memory();
    engine
        .add_relations(&[tuple("user:*", Relation::CanAddModel, "cloud:test-cloud")])
        .await
        .unwrap();

    let (page, _) = engine
        .read_related_objects(&TupleFilter::default(), 10, None)
        .await
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].object.id, EVERYONE_USER);

    // And the everyone id in a filter reads the stored wildcard.
    let filter = TupleFilter {
        object: Some(Tag::user(EVERYONE_USER)),
        ..Default::default()
    };
    let (page, _) = engine.read_related_objects(&filter, 10, None).await.unwrap();
    assert_eq!(page.len(), 1);
}

#[tokio::test]
async fn add_and_grant_are_idempotent() {
    let engine = PolicyEngine::in_memory();
    let t = tuple("user:bob@example.com", Relation::Reader, MODEL);
    engine.add_relations(&[t.clone()]).await.unwrap();
    engine.add_relations(&[t.clone()]).await.unwrap();

    let filter = TupleFilter {
        target: Some(Tag::parse(MODEL).unwrap()),
        ..Default::default()
    };
    let (page, _) = engine.read_related_objects(&filter, 10, None).await.unwrap();
    assert_eq!(page.len(), 1);

    engine.remove_relations(&[t.clone()]).await.unwrap();
    engine.remove_relations(&[t]).await.unwrap();
}

#[tokio::test]
async fn list_objects_respects_hierarchy() {
    let engine = PolicyEngine::in_memory();
    let alice = Tag::user("alice@example.com");

    engine
        .add_relations(&[
            tuple("user:alice@example.com", Relation::Writer, "model:m1"),
            tuple("user:alice@example.com", Relation::Administrator, "model:m2"),
            tuple("user:bob@example.com", Relation::Reader, "model:m3"),
        ])
        .await
        .unwrap();

    let mut readable = engine
        .list_objects(&alice, Relation::Reader, Kind::Model, &[])
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.id)
        .collect::<Vec<_>>();
    readable.sort();
    assert_eq!(readable, vec!["m1".to_string(), "m2".to_string()]);
}

#[tokio::test]
async fn invalid_tuples_are_rejected() {
    let engine = PolicyEngine::in_memory();
    // A controller cannot be a group member.
    let bad = tuple("controller:c1", Relation::Member, "group:g1");
    let err = engine.add_relations(&[bad]).await.unwrap_err();
    assert_eq!(err.code(), "openfga-request-failed");
}

#[tokio::test]
async fn nested_groups_resolve() {
    let engine = PolicyEngine::in_memory();
    engine
        .add_relations(&[
            tuple("user:alice@example.com", Relation::Member, "group:inner"),
            tuple("group:inner#member", Relation::Member, "group:outer"),
            tuple("group:outer#member", Relation::Reader, MODEL),
        ])
        .await
        .unwrap();

    assert!(engine
        .check(&tuple("user:alice@example.com", Relation::Reader, MODEL))
        .await
        .unwrap());
}

#[tokio::test]
async fn contextual_tuples_participate() {
    let engine = PolicyEngine::in_memory();
    let probe = tuple("user:alice@example.com", Relation::Reader, MODEL);
    assert!(!engine.check(&probe).await.unwrap());
    let context = vec![tuple("user:alice@example.com", Relation::Writer, MODEL)];
    assert!(engine.check_with_context(&probe, &context).await.unwrap());
}
