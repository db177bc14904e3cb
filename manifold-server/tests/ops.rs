//! Federated-operation tests against a mock controller backend.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use manifold_client::params::{
    CloudRegionSpec, CloudSpec, ControllerModelSummary, ModelAbstract, ModelInfo,
};
use manifold_client::{ApiClient, ControllerTarget, Dialer, Rpc, SUMMARY_WATCHER_FACADE};
use manifold_core::{Error, Relation, Result, Tag};
use manifold_policy::{RelationTuple, TupleFilter};
use manifold_server::config::Config;
use manifold_server::{app::App, ops, sweep};
use manifold_store::{Controller, PRIORITY_DEPLOYED, PRIORITY_SUPPORTED};

const PLANE_UUID: &str = "6d4f7c43-854c-4091-8e16-d6ce4945c25c";

// ── Mock backend ─────────────────────────────────────────────────────────

#[derive(Default)]
struct MockState {
    summary: ControllerModelSummary,
    clouds: HashMap<String, CloudSpec>,
    create_error: Option<Error>,
    destroy_error: Option<Error>,
    migration_error: Option<String>,
    /// Models the backend admits knowing, by uuid.
    model_infos: HashMap<String, ModelInfo>,
    /// One batch the summary watcher will deliver, then block.
    summary_batch: Vec<ModelAbstract>,
    summary_delivered: bool,
    created: Vec<String>,
}

struct MockRpc {
    state: Arc<Mutex<MockState>>,
}

impl Rpc for MockRpc {
    fn call(
        &self,
        facade: &str,
        _version: u32,
        method: &str,
        params: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + '_>> {
        let mut state = self.state.lock().unwrap();
        let response: Result<Value> = match (facade, method) {
            ("Controller", "ControllerModelSummary") => {
                Ok(serde_json::to_value(&state.summary).unwrap())
            }
            ("Cloud", "Clouds") => Ok(json!({ "clouds": state.clouds })),
            ("Cloud", "Cloud") => {
                let tag = params["cloud-tag"].as_str().unwrap_or_default();
                match state.clouds.get(tag) {
                    Some(spec) => Ok(serde_json::to_value(spec).unwrap()),
                    None => Err(Error::not_found(format!("no cloud {tag}"))),
                }
            }
            ("Cloud", "AddCloud" | "RemoveClouds" | "UpdateCloud" | "ModifyCloudAccess") => {
                Ok(json!({}))
            }
            ("ModelManager", "CreateModel") => {
                if let Some(e) = &state.create_error {
                    Err(e.clone())
                } else {
                    let name = params["name"].as_str().unwrap_or_default().to_string();
                    let uuid = uuid::Uuid::new_v4().to_string();
                    state.created.push(name.clone());
                    let info = ModelInfo {
                        name,
                        uuid: uuid.clone(),
                        owner_tag: params["owner-tag"].as_str().unwrap_or_default().to_string(),
                        cloud_tag: params["cloud-tag"].as_str().unwrap_or_default().to_string(),
                        cloud_region: params["cloud-region"].as_str().unwrap_or_default().to_string(),
                        life: "alive".to_string(),
                        ..Default::default()
                    };
                    state.model_infos.insert(uuid, info.clone());
                    Ok(serde_json::to_value(info).unwrap())
                }
            }
            ("ModelManager", "ModelInfo") => {
                let uuid = params["model-tag"]
                    .as_str()
                    .unwrap_or_default()
                    .trim_start_matches("model-")
                    .to_string();
                match state.model_infos.get(&uuid) {
                    Some(info) => Ok(serde_json::to_value(info).unwrap()),
                    None => Err(Error::not_found(format!("model {uuid} not found"))),
                }
            }
            ("ModelManager", "ModifyModelAccess") => Ok(json!({})),
            ("ModelManager", "DestroyModels") => match &state.destroy_error {
                Some(e) => Err(e.clone()),
                None => Ok(json!({})),
            },
            ("ApplicationOffers", "ListApplicationOffers") => Ok(json!({ "results": [] })),
            ("Controller", "InitiateMigration") => match &state.migration_error {
                Some(message) => Ok(json!({ "results": [{ "error": message }] })),
                None => Ok(json!({ "results": [{ "migration-id": "mig-1" }] })),
            },
            ("Controller", "WatchAllModelSummaries") => Ok(json!({ "watcher-id": "w1" })),
            (SUMMARY_WATCHER_FACADE, "Next") => {
                if state.summary_delivered {
                    // Block like a real long poll; the worker exits via
                    // cancellation.
                    drop(state);
                    return Box::pin(std::future::pending::<Result<Value>>());
                }
                state.summary_delivered = true;
                Ok(json!({ "models": state.summary_batch }))
            }
            (SUMMARY_WATCHER_FACADE, "Stop") => Ok(json!({})),
            (facade, method) => Err(Error::not_supported(format!(
                "mock has no {facade}.{method}"
            ))),
        };
        Box::pin(async move { response })
    }
}

struct MockDialer {
    state: Arc<Mutex<MockState>>,
    dialed: Arc<Mutex<Vec<String>>>,
    fail_dial: bool,
}

impl Dialer for MockDialer {
    fn dial(
        &self,
        target: &ControllerTarget,
    ) -> Pin<Box<dyn Future<Output = Result<ApiClient>> + Send + '_>> {
        self.dialed.lock().unwrap().push(target.uuid.clone());
        if self.fail_dial {
            return Box::pin(async { Err(Error::connection_failed("mock dial refused")) });
        }
        let rpc = Arc::new(MockRpc {
            state: self.state.clone(),
        });
        let facades: HashSet<String> = [SUMMARY_WATCHER_FACADE.to_string()].into();
        Box::pin(async move { Ok(ApiClient::new(rpc, facades)) })
    }
}

// ── Harness ──────────────────────────────────────────────────────────────

struct Harness {
    app: Arc<App>,
    state: Arc<Mutex<MockState>>,
    dialed: Arc<Mutex<Vec<String>>>,
}

async fn harness() -> Harness {
    let state = Arc::new(Mutex::new(MockState::default()));
    let dialed = Arc::new(Mutex::new(Vec::new()));
    let dialer = MockDialer {
        state: state.clone(),
        dialed: dialed.clone(),
        fail_dial: false,
    };
    let config = Config {
        listen: "127.0.0.1:0".to_string(),
        dsn: "sqlite::memory:".to_string(),
        controller_name: "manifold".to_string(),
        controller_uuid: PLANE_UUID.to_string(),
        public_hostname: String::new(),
        oidc: None,
        admin_identities: vec!["admin@example.com".to_string()],
        watch_interval_secs: 1,
        sweep_interval_secs: 1,
        audit_retention_days: 0,
        session_ttl_hours: 1,
    };
    let app = App::new(config, Arc::new(dialer), None).await.unwrap();
    Harness { app, state, dialed }
}

impl Harness {
    async fn admin(&self) -> manifold_server::AuthenticatedUser {
        self.app
            .authenticate_principal("admin@example.com")
            .await
            .unwrap()
    }

    async fn user(&self, name: &str) -> manifold_server::AuthenticatedUser {
        self.app.authenticate_principal(name).await.unwrap()
    }

    /// Seed a cloud with one region and `n` controllers at the given
    /// priority; returns the controller uuids.
    async fn seed_placement(&self, priorities: &[i32]) -> Vec<String> {
        self.app
            .db
            .add_cloud(&manifold_store::Cloud {
                name: "test-cloud".to_string(),
                cloud_type: "kubernetes".to_string(),
                regions: vec![manifold_store::CloudRegion {
                    name: "test-region".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            })
            .await
            .unwrap();
        let region_id = self
            .app
            .db
            .region_id("test-cloud", "test-region")
            .await
            .unwrap()
            .unwrap();
        let mut uuids = Vec::new();
        for (i, priority) in priorities.iter().enumerate() {
            let controller = Controller {
                uuid: uuid::Uuid::new_v4().to_string(),
                name: format!("controller-{i}"),
                addresses: vec![format!("10.0.0.{i}:17070")],
                ..Default::default()
            };
            self.app
                .db
                .add_controller(&controller, &[(region_id.clone(), *priority)])
                .await
                .unwrap();
            uuids.push(controller.uuid);
        }
        uuids
    }

    async fn seed_credential(&self, owner: &str) {
        self.app.db.ensure_identity(owner).await.unwrap();
        let mut credential = manifold_store::CloudCredential {
            owner_name: owner.to_string(),
            cloud_name: "test-cloud".to_string(),
            name: "default".to_string(),
            auth_type: "userpass".to_string(),
            ..Default::default()
        };
        credential.id = self
            .app
            .db
            .upsert_cloud_credential(&credential)
            .await
            .unwrap();
    }

    async fn grant_addmodel(&self, principal: &str) {
        self.app
            .policy
            .add_relations(&[RelationTuple::new(
                Tag::user(principal),
                Relation::CanAddModel,
                Tag::cloud("test-cloud"),
            )])
            .await
            .unwrap();
    }
}

// ── Add controller (dedup + priorities) ──────────────────────────────────

#[tokio::test]
async fn add_controller_reuses_existing_clouds_and_assigns_priorities() {
    let h = harness().await;
    // The cloud and its region exist before the controller arrives.
    h.app
        .db
        .add_cloud(&manifold_store::Cloud {
            name: "test-cloud".to_string(),
            regions: vec![manifold_store::CloudRegion {
                name: "test-region".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        })
        .await
        .unwrap();

    let controller_uuid = uuid::Uuid::new_v4().to_string();
    {
        let mut state = h.state.lock().unwrap();
        state.summary = ControllerModelSummary {
            name: "controller".to_string(),
            uuid: controller_uuid.clone(),
            cloud_tag: "cloud-test-cloud".to_string(),
            cloud_region: "test-region".to_string(),
            agent_version: "3.5.0".to_string(),
        };
        state.clouds.insert(
            "cloud-test-cloud".to_string(),
            CloudSpec {
                cloud_type: "kubernetes".to_string(),
                regions: vec![
                    CloudRegionSpec {
                        name: "test-region".to_string(),
                    },
                    CloudRegionSpec {
                        name: "other-region".to_string(),
                    },
                ],
                ..Default::default()
            },
        );
    }

    let admin = h.admin().await;
    let info = ops::controller::add_controller(
        &h.app,
        &admin,
        ops::controller::AddControllerRequest {
            name: "alpha".to_string(),
            public_address: "alpha.example.com:17070".to_string(),
            username: "admin".to_string(),
            password: "hunter2".to_string(),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(info.uuid, controller_uuid);

    // No duplicate cloud row; both regions exist exactly once.
    let clouds = h.app.db.for_each_cloud().await.unwrap();
    assert_eq!(clouds.len(), 1);
    let cloud = &clouds[0];
    assert_eq!(cloud.regions.len(), 2);

    // Own region deployed, the rest supported.
    let own = cloud.region("test-region").unwrap();
    assert_eq!(own.controllers[0].priority, PRIORITY_DEPLOYED);
    let other = cloud.region("other-region").unwrap();
    assert_eq!(other.controllers[0].priority, PRIORITY_SUPPORTED);

    // Everyone may add models on the controller's own cloud.
    let anyone = RelationTuple::new(
        Tag::user("random@example.com"),
        Relation::CanAddModel,
        Tag::cloud("test-cloud"),
    );
    assert!(h.app.policy.check(&anyone).await.unwrap());

    // The plane administers the new controller through the link tuple.
    let derived = RelationTuple::new(
        Tag::user("admin@example.com"),
        Relation::Administrator,
        Tag::controller(&controller_uuid),
    );
    assert!(h.app.policy.check(&derived).await.unwrap());
}

// ── Add model (selection fairness + failure cleanup) ─────────────────────

#[tokio::test]
async fn add_model_tie_break_is_fair_across_equal_priorities() {
    let h = harness().await;
    let controllers = h.seed_placement(&[PRIORITY_SUPPORTED, PRIORITY_SUPPORTED]).await;
    h.seed_credential("alice@example.com").await;
    h.grant_addmodel("alice@example.com").await;
    let alice = h.user("alice@example.com").await;

    for i in 0..50 {
        ops::model::add_model(
            &h.app,
            &alice,
            ops::model::AddModelRequest {
                name: format!("m{i}"),
                cloud: "test-cloud".to_string(),
                region: "test-region".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    }

    let dialed = h.dialed.lock().unwrap();
    for controller in &controllers {
        assert!(
            dialed.contains(controller),
            "controller {controller} never selected over 50 trials"
        );
    }
}

#[tokio::test]
async fn deployed_priority_always_wins() {
    let h = harness().await;
    let controllers = h
        .seed_placement(&[PRIORITY_SUPPORTED, PRIORITY_DEPLOYED])
        .await;
    h.seed_credential("alice@example.com").await;
    h.grant_addmodel("alice@example.com").await;
    let alice = h.user("alice@example.com").await;

    for i in 0..10 {
        ops::model::add_model(
            &h.app,
            &alice,
            ops::model::AddModelRequest {
                name: format!("m{i}"),
                cloud: "test-cloud".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    }
    let dialed = h.dialed.lock().unwrap();
    assert!(dialed.iter().all(|uuid| uuid == &controllers[1]));
}

#[tokio::test]
async fn add_model_without_controllers_is_unsupported_region() {
    let h = harness().await;
    h.app
        .db
        .add_cloud(&manifold_store::Cloud {
            name: "test-cloud".to_string(),
            regions: vec![manifold_store::CloudRegion {
                name: "empty-region".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        })
        .await
        .unwrap();
    h.seed_credential("alice@example.com").await;
    h.grant_addmodel("alice@example.com").await;
    let alice = h.user("alice@example.com").await;

    let err = ops::model::add_model(
        &h.app,
        &alice,
        ops::model::AddModelRequest {
            name: "m".to_string(),
            cloud: "test-cloud".to_string(),
            region: "empty-region".to_string(),
            ..Default::default()
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), "bad-request");
    assert!(err.message().contains("unsupported cloud region"));
}

#[tokio::test]
async fn failed_creation_removes_the_placeholder() {
    let h = harness().await;
    h.seed_placement(&[PRIORITY_DEPLOYED]).await;
    h.seed_credential("alice@example.com").await;
    h.grant_addmodel("alice@example.com").await;
    h.state.lock().unwrap().create_error =
        Some(Error::already_exists("model already exists on the controller"));
    let alice = h.user("alice@example.com").await;

    let err = ops::model::add_model(
        &h.app,
        &alice,
        ops::model::AddModelRequest {
            name: "m".to_string(),
            cloud: "test-cloud".to_string(),
            ..Default::default()
        },
    )
    .await
    .unwrap_err();
    // The backend's code survives, and the placeholder is gone.
    assert_eq!(err.code(), "already-exists");
    assert_eq!(h.app.db.count_models().await.unwrap(), 0);
}

// ── Destroy model and the dying sweep ────────────────────────────────────

#[tokio::test]
async fn destroy_model_marks_dying_and_sweeper_reaps_it() {
    let h = harness().await;
    h.seed_placement(&[PRIORITY_DEPLOYED]).await;
    h.seed_credential("alice@example.com").await;
    h.grant_addmodel("alice@example.com").await;
    let alice = h.user("alice@example.com").await;

    let summary = ops::model::add_model(
        &h.app,
        &alice,
        ops::model::AddModelRequest {
            name: "m".to_string(),
            cloud: "test-cloud".to_string(),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    ops::model::destroy_model(&h.app, &alice, &summary.uuid)
        .await
        .unwrap();
    let model = h.app.db.get_model(&summary.uuid).await.unwrap();
    assert_eq!(model.life, manifold_store::Life::Dying);

    // While the backend still knows the model the sweeper leaves it be.
    assert_eq!(sweep::sweep_dying_models(&h.app).await.unwrap(), 0);

    // Once the backend reports not-found, the record and its tuples go.
    h.state.lock().unwrap().model_infos.remove(&summary.uuid);
    assert_eq!(sweep::sweep_dying_models(&h.app).await.unwrap(), 1);
    assert!(h.app.db.get_model(&summary.uuid).await.unwrap_err().is_not_found());
    let probe = RelationTuple::new(
        Tag::user("alice@example.com"),
        Relation::Reader,
        Tag::model(&summary.uuid),
    );
    assert!(!h.app.policy.check(&probe).await.unwrap());
}

#[tokio::test]
async fn failed_destroy_reverts_to_alive() {
    let h = harness().await;
    h.seed_placement(&[PRIORITY_DEPLOYED]).await;
    h.seed_credential("alice@example.com").await;
    h.grant_addmodel("alice@example.com").await;
    let alice = h.user("alice@example.com").await;

    let summary = ops::model::add_model(
        &h.app,
        &alice,
        ops::model::AddModelRequest {
            name: "m".to_string(),
            cloud: "test-cloud".to_string(),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    h.state.lock().unwrap().destroy_error = Some(Error::unspecified("backend exploded"));
    ops::model::destroy_model(&h.app, &alice, &summary.uuid)
        .await
        .unwrap_err();
    let model = h.app.db.get_model(&summary.uuid).await.unwrap();
    assert_eq!(model.life, manifold_store::Life::Alive);
}

// ── Migration prechecks ──────────────────────────────────────────────────

#[tokio::test]
async fn migrate_to_the_hosting_controller_reports_precheck_failure() {
    let h = harness().await;
    h.seed_placement(&[PRIORITY_DEPLOYED]).await;
    h.seed_credential("alice@example.com").await;
    h.grant_addmodel("alice@example.com").await;
    let alice = h.user("alice@example.com").await;

    let summary = ops::model::add_model(
        &h.app,
        &alice,
        ops::model::AddModelRequest {
            name: "m".to_string(),
            cloud: "test-cloud".to_string(),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    h.state.lock().unwrap().migration_error = Some(format!(
        "target prechecks failed: model with same UUID already exists ({})",
        summary.uuid
    ));
    let err = ops::model::initiate_migration(&h.app, &alice, &summary.uuid, "controller-0")
        .await
        .unwrap_err();
    assert!(err
        .message()
        .contains("model with same UUID already exists"));
}

// ── Access grants ────────────────────────────────────────────────────────

#[tokio::test]
async fn grant_and_revoke_follow_the_hierarchy() {
    let h = harness().await;
    h.seed_placement(&[PRIORITY_DEPLOYED]).await;
    h.seed_credential("alice@example.com").await;
    h.grant_addmodel("alice@example.com").await;
    let alice = h.user("alice@example.com").await;

    let summary = ops::model::add_model(
        &h.app,
        &alice,
        ops::model::AddModelRequest {
            name: "m".to_string(),
            cloud: "test-cloud".to_string(),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    let model_uuid = summary.uuid.clone();

    // Double grant leaves one tuple.
    ops::access::grant_model_access(&h.app, &alice, &model_uuid, "bob@example.com", "read")
        .await
        .unwrap();
    ops::access::grant_model_access(&h.app, &alice, &model_uuid, "bob@example.com", "read")
        .await
        .unwrap();
    let filter = TupleFilter {
        object: Some(Tag::user("bob@example.com")),
        ..Default::default()
    };
    let (page, _) = h
        .app
        .policy
        .read_related_objects(&filter, 10, None)
        .await
        .unwrap();
    assert_eq!(page.len(), 1);

    let bob = h.user("bob@example.com").await;
    let carol = h.user("carol@example.com").await;

    // Bob cannot revoke someone else's access...
    let err =
        ops::access::revoke_model_access(&h.app, &bob, &model_uuid, "alice@example.com", "read")
            .await
            .unwrap_err();
    assert_eq!(err.code(), "unauthorized");
    // ...nor can carol touch bob's.
    let err =
        ops::access::revoke_model_access(&h.app, &carol, &model_uuid, "bob@example.com", "read")
            .await
            .unwrap_err();
    assert_eq!(err.code(), "unauthorized");

    // But bob may always revoke his own.
    ops::access::revoke_model_access(&h.app, &bob, &model_uuid, "bob@example.com", "read")
        .await
        .unwrap();
    let probe = RelationTuple::new(
        Tag::user("bob@example.com"),
        Relation::Reader,
        Tag::model(&model_uuid),
    );
    assert!(!h.app.policy.check(&probe).await.unwrap());

    // Revoking read on an admin leaves nothing behind.
    ops::access::grant_model_access(&h.app, &alice, &model_uuid, "bob@example.com", "admin")
        .await
        .unwrap();
    ops::access::revoke_model_access(&h.app, &alice, &model_uuid, "bob@example.com", "read")
        .await
        .unwrap();
    let admin_probe = RelationTuple::new(
        Tag::user("bob@example.com"),
        Relation::Administrator,
        Tag::model(&model_uuid),
    );
    assert!(!h.app.policy.check(&admin_probe).await.unwrap());
}

// ── Orphan sweep ─────────────────────────────────────────────────────────

#[tokio::test]
async fn orphan_sweep_removes_dangling_tuples_only() {
    let h = harness().await;
    let group = h.app.db.add_group("engineering").await.unwrap();

    let live = RelationTuple::new(
        Tag::user("alice@example.com"),
        Relation::Member,
        Tag::group(&group.uuid),
    );
    let orphan = RelationTuple::new(
        Tag::user("alice@example.com"),
        Relation::Reader,
        Tag::model("aaaaaaaa-0000-0000-0000-000000000001"),
    );
    h.app
        .policy
        .add_relations(&[live.clone(), orphan])
        .await
        .unwrap();

    let cancel = tokio_util::sync::CancellationToken::new();
    let removed = sweep::sweep_orphaned_tuples(&h.app, &cancel).await.unwrap();
    assert_eq!(removed, 1);

    let (page, _) = h
        .app
        .policy
        .read_related_objects(&TupleFilter::default(), 50, None)
        .await
        .unwrap();
    // Only the membership tuple (plus the bootstrap admin tuple) survive.
    assert!(page.iter().any(|t| t == &live));
    assert!(page.iter().all(|t| t.target.kind != manifold_core::Kind::Model));
}

// ── Summary watcher ──────────────────────────────────────────────────────

#[tokio::test]
async fn summary_watcher_filters_local_admins_and_unknown_models() {
    let h = harness().await;
    h.seed_placement(&[PRIORITY_DEPLOYED]).await;
    h.seed_credential("alice@example.com").await;
    h.grant_addmodel("alice@example.com").await;
    let alice = h.user("alice@example.com").await;
    let summary = ops::model::add_model(
        &h.app,
        &alice,
        ops::model::AddModelRequest {
            name: "m".to_string(),
            cloud: "test-cloud".to_string(),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    {
        let mut state = h.state.lock().unwrap();
        state.summary_batch = vec![
            ModelAbstract {
                uuid: summary.uuid.clone(),
                name: "m".to_string(),
                admins: vec!["alice@canonical.com".to_string(), "bob".to_string()],
                ..Default::default()
            },
            ModelAbstract {
                uuid: "99999999-9999-9999-9999-999999999999".to_string(),
                name: "ghost".to_string(),
                ..Default::default()
            },
        ];
    }

    let (_, mut rx) = h.app.hub.subscribe(None);
    let cancel = tokio_util::sync::CancellationToken::new();
    let watcher = tokio::spawn(manifold_server::watcher::run_summary_watcher(
        h.app.clone(),
        cancel.clone(),
        None,
    ));

    let (uuid, event) = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
        .await
        .expect("no summary published")
        .expect("hub closed");
    assert_eq!(uuid, summary.uuid);
    // The local admin was filtered out; the external one kept.
    assert_eq!(event.admins, vec!["alice@canonical.com".to_string()]);

    // The unknown model was dropped entirely.
    assert!(rx.try_recv().is_err());

    cancel.cancel();
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), watcher).await;
}

// ── Hosted clouds ────────────────────────────────────────────────────────

#[tokio::test]
async fn hosted_cloud_validation_rejects_bad_definitions() {
    let h = harness().await;
    h.seed_placement(&[PRIORITY_DEPLOYED]).await;
    let admin = h.admin().await;

    // Reserved public-cloud names are refused outright.
    let err = ops::cloud::add_hosted_cloud(
        &h.app,
        &admin,
        "aws",
        ops::cloud::CloudDefinition {
            cloud_type: "kubernetes".to_string(),
            host_cloud_region: "test-cloud/test-region".to_string(),
            ..Default::default()
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), "bad-request");

    // Only Kubernetes-substrate clouds can be hosted.
    let err = ops::cloud::add_hosted_cloud(
        &h.app,
        &admin,
        "my-cloud",
        ops::cloud::CloudDefinition {
            cloud_type: "openstack".to_string(),
            host_cloud_region: "test-cloud/test-region".to_string(),
            ..Default::default()
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), "incompatible-clouds");

    // A host region is mandatory.
    let err = ops::cloud::add_hosted_cloud(
        &h.app,
        &admin,
        "my-cloud",
        ops::cloud::CloudDefinition {
            cloud_type: "kubernetes".to_string(),
            ..Default::default()
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), "cloud-region-required");
}

#[tokio::test]
async fn hosted_cloud_lands_on_the_host_region_controller() {
    let h = harness().await;
    h.seed_placement(&[PRIORITY_DEPLOYED]).await;
    // The remote controller reports the final cloud definition on
    // re-fetch.
    h.state.lock().unwrap().clouds.insert(
        "cloud-my-k8s".to_string(),
        CloudSpec {
            cloud_type: "kubernetes".to_string(),
            host_cloud_region: "test-cloud/test-region".to_string(),
            regions: vec![CloudRegionSpec {
                name: "default".to_string(),
            }],
        },
    );
    let alice = h.user("alice@example.com").await;
    // Hosted-cloud creation is open to any user with a resolvable host
    // region; the caller becomes the cloud's administrator.
    ops::cloud::add_hosted_cloud(
        &h.app,
        &alice,
        "my-k8s",
        ops::cloud::CloudDefinition {
            cloud_type: "kubernetes".to_string(),
            host_cloud_region: "test-cloud".to_string(),
            regions: vec!["default".to_string()],
        },
    )
    .await
    .unwrap();

    let cloud = h.app.db.get_cloud("my-k8s").await.unwrap();
    assert_eq!(cloud.host_cloud_region, "test-cloud");
    assert_eq!(cloud.regions.len(), 1);
    assert_eq!(cloud.regions[0].controllers.len(), 1);
    assert_eq!(cloud.regions[0].controllers[0].priority, PRIORITY_SUPPORTED);

    let probe = RelationTuple::new(
        Tag::user("alice@example.com"),
        Relation::Administrator,
        Tag::cloud("my-k8s"),
    );
    assert!(h.app.policy.check(&probe).await.unwrap());

    // A duplicate name is refused by the local reservation.
    let err = ops::cloud::add_hosted_cloud(
        &h.app,
        &alice,
        "my-k8s",
        ops::cloud::CloudDefinition {
            cloud_type: "kubernetes".to_string(),
            host_cloud_region: "test-cloud".to_string(),
            regions: vec!["default".to_string()],
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), "already-exists");
}

// ── Import ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn import_model_adopts_an_existing_backend_model() {
    let h = harness().await;
    h.seed_placement(&[PRIORITY_DEPLOYED]).await;
    h.seed_credential("alice@example.com").await;
    let admin = h.admin().await;

    let model_uuid = uuid::Uuid::new_v4().to_string();
    h.state.lock().unwrap().model_infos.insert(
        model_uuid.clone(),
        ModelInfo {
            name: "adopted".to_string(),
            uuid: model_uuid.clone(),
            owner_tag: "user-alice@example.com".to_string(),
            cloud_tag: "cloud-test-cloud".to_string(),
            cloud_region: "test-region".to_string(),
            life: "alive".to_string(),
            ..Default::default()
        },
    );

    let summary = ops::model::import_model(
        &h.app,
        &admin,
        ops::model::ImportModelRequest {
            controller: "controller-0".to_string(),
            model_uuid: model_uuid.clone(),
            owner: String::new(),
        },
    )
    .await
    .unwrap();
    assert_eq!(summary.owner, "alice@example.com");
    assert_eq!(summary.uuid, model_uuid);

    // The owner administers the imported model.
    let probe = RelationTuple::new(
        Tag::user("alice@example.com"),
        Relation::Administrator,
        Tag::model(&model_uuid),
    );
    assert!(h.app.policy.check(&probe).await.unwrap());
}

#[tokio::test]
async fn import_model_refuses_local_owners_without_override() {
    let h = harness().await;
    h.seed_placement(&[PRIORITY_DEPLOYED]).await;
    h.seed_credential("alice@example.com").await;
    let admin = h.admin().await;

    let model_uuid = uuid::Uuid::new_v4().to_string();
    h.state.lock().unwrap().model_infos.insert(
        model_uuid.clone(),
        ModelInfo {
            name: "adopted".to_string(),
            uuid: model_uuid.clone(),
            owner_tag: "user-admin".to_string(),
            cloud_tag: "cloud-test-cloud".to_string(),
            cloud_region: "test-region".to_string(),
            ..Default::default()
        },
    );

    let err = ops::model::import_model(
        &h.app,
        &admin,
        ops::model::ImportModelRequest {
            controller: "controller-0".to_string(),
            model_uuid: model_uuid.clone(),
            owner: String::new(),
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), "bad-request");

    // With an explicit external owner the import proceeds.
    ops::model::import_model(
        &h.app,
        &admin,
        ops::model::ImportModelRequest {
            controller: "controller-0".to_string(),
            model_uuid,
            owner: "alice@example.com".to_string(),
        },
    )
    .await
    .unwrap();
}

// ── Groups through the operation layer ───────────────────────────────────

#[tokio::test]
async fn group_removal_cascades_through_the_policy_store() {
    let h = harness().await;
    h.seed_placement(&[PRIORITY_DEPLOYED]).await;
    let admin = h.admin().await;

    let group = ops::group::add_group(&h.app, &admin, "ops-team").await.unwrap();
    ops::access::grant_relation(
        &h.app,
        &admin,
        "user-dana@example.com",
        "member",
        "group-ops-team",
    )
    .await
    .unwrap();
    ops::access::grant_relation(
        &h.app,
        &admin,
        &format!("group-{}#member", group.name),
        "administrator",
        "controller-controller-0",
    )
    .await
    .unwrap();

    let controller = h.app.db.get_controller_by_name("controller-0").await.unwrap();
    let probe = RelationTuple::new(
        Tag::user("dana@example.com"),
        Relation::Administrator,
        Tag::controller(&controller.uuid),
    );
    assert!(h.app.policy.check(&probe).await.unwrap());

    ops::group::remove_group(&h.app, &admin, "ops-team").await.unwrap();
    assert!(!h.app.policy.check(&probe).await.unwrap());

    // A second removal is not-found and changes nothing.
    let err = ops::group::remove_group(&h.app, &admin, "ops-team")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn non_admins_cannot_manage_groups() {
    let h = harness().await;
    let alice = h.user("alice@example.com").await;
    let err = ops::group::add_group(&h.app, &alice, "g").await.unwrap_err();
    assert_eq!(err.code(), "unauthorized");
}

// ── Audit flow ───────────────────────────────────────────────────────────

#[tokio::test]
async fn audit_listing_is_gated_and_purgeable() {
    let h = harness().await;
    let admin = h.admin().await;
    let alice = h.user("alice@example.com").await;

    h.app
        .db
        .append_audit_entry(&manifold_store::AuditLogEntry {
            time: manifold_store::now_micros(),
            conversation_id: "c1".to_string(),
            message_id: 1,
            identity_tag: "user-alice@example.com".to_string(),
            facade_method: "Manifold.AddModel".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    // A plain user may not read the log.
    let err = ops::audit::list_audit_events(&h.app, &alice, &Default::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "unauthorized");

    // Granting audit-log-viewer on the plane opens it up.
    ops::access::grant_relation(
        &h.app,
        &admin,
        "user-alice@example.com",
        "audit_log_viewer",
        "controller-manifold",
    )
    .await
    .unwrap();
    let events = ops::audit::list_audit_events(&h.app, &alice, &Default::default())
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].facade_method, "Manifold.AddModel");

    // Purge everything older than now.
    let cutoff = chrono::Utc::now() + chrono::Duration::seconds(1);
    let deleted = ops::audit::purge_logs(&h.app, &admin, &cutoff.to_rfc3339())
        .await
        .unwrap();
    assert_eq!(deleted, 1);
}

// ── Tag round trips through the live catalog ─────────────────────────────

#[tokio::test]
async fn name_form_tags_round_trip() {
    let h = harness().await;
    h.seed_placement(&[PRIORITY_DEPLOYED]).await;
    h.seed_credential("alice@example.com").await;
    h.grant_addmodel("alice@example.com").await;
    let alice = h.user("alice@example.com").await;
    ops::model::add_model(
        &h.app,
        &alice,
        ops::model::AddModelRequest {
            name: "prod".to_string(),
            cloud: "test-cloud".to_string(),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    for name_form in [
        "controller-controller-0",
        "cloud-test-cloud",
        "model-alice@example.com/prod#administrator",
        "user-alice@example.com",
    ] {
        let tag = h.app.resolver.resolve(name_form).await.unwrap();
        let back = h.app.resolver.to_jaas_tag(&tag, true).await.unwrap();
        assert_eq!(back, name_form, "round trip of {name_form}");
    }
}
