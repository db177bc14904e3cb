//! # manifold-store — the catalog
//!
//! Durable record of everything the plane federates: identities, groups,
//! roles, clouds and their regions, controllers and their region
//! priorities, cloud credentials, models, application offers and the audit
//! log. One [`Database`] handle serves SQLite and Postgres through sqlx's
//! `Any` driver.
//!
//! Error contract: driver errors are mapped once at this crate's edge —
//! no rows → `not-found`, unique violations → `already-exists`, an
//! unconfigured handle → `server-configuration`, a mid-migration handle →
//! `upgrade-in-progress`.
//!
//! The crate also provides [`SqlTupleStore`], the persistent backend for
//! the policy engine, and [`Vault`], the typed face of the external
//! credential store.

mod audit;
mod cloud;
mod controller;
mod credential;
mod db;
mod error;
mod group;
mod identity;
mod model;
mod offer;
mod role;
mod tuples;
mod vault;

pub use audit::{AuditLogEntry, AuditLogFilter};
pub use cloud::{Cloud, CloudRegion, RegionControllerPriority, PRIORITY_DEPLOYED, PRIORITY_SUPPORTED};
pub use controller::Controller;
pub use credential::CloudCredential;
pub use db::{now_micros, Database};
pub use group::GroupEntry;
pub use identity::Identity;
pub use model::{Life, Model};
pub use offer::ApplicationOffer;
pub use role::RoleEntry;
pub use tuples::SqlTupleStore;
pub use vault::{ControllerCredentials, MemoryVault, Vault, VaultStore};

#[cfg(test)]
pub(crate) mod test_fixtures {
    //! Shared seeding helpers for the unit tests in this crate.

    use crate::cloud::{Cloud, CloudRegion, PRIORITY_DEPLOYED};
    use crate::controller::Controller;
    use crate::credential::CloudCredential;
    use crate::db::Database;
    use crate::model::Model;

    /// Ensure a cloud, region, controller, identity and credential exist
    /// and return an unsaved model aggregate placed on them.
    pub async fn seed_placement(db: &Database, owner: &str, model_name: &str) -> Model {
        let identity = db.ensure_identity(owner).await.unwrap();

        if db.get_cloud("test-cloud").await.is_err() {
            db.add_cloud(&Cloud {
                name: "test-cloud".to_string(),
                cloud_type: "kubernetes".to_string(),
                regions: vec![CloudRegion {
                    name: "test-region".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            })
            .await
            .unwrap();
        }
        let region_id = db
            .region_id("test-cloud", "test-region")
            .await
            .unwrap()
            .unwrap();

        let controller = match db.get_controller_by_name("seed-controller").await {
            Ok(controller) => controller,
            Err(_) => {
                let controller = Controller {
                    uuid: uuid::Uuid::new_v4().to_string(),
                    name: "seed-controller".to_string(),
                    addresses: vec!["10.0.0.1:17070".to_string()],
                    ..Default::default()
                };
                db.add_controller(&controller, &[(region_id.clone(), PRIORITY_DEPLOYED)])
                    .await
                    .unwrap();
                controller
            }
        };

        let mut credential = CloudCredential {
            owner_name: owner.to_string(),
            cloud_name: "test-cloud".to_string(),
            name: "default".to_string(),
            auth_type: "userpass".to_string(),
            ..Default::default()
        };
        credential.id = db.upsert_cloud_credential(&credential).await.unwrap();

        let cloud = db.get_cloud("test-cloud").await.unwrap();
        let mut region = cloud.regions[0].clone();
        region.controllers = Vec::new();

        Model {
            name: model_name.to_string(),
            owner: identity,
            controller,
            cloud_region: region,
            credential,
            ..Default::default()
        }
    }
}
