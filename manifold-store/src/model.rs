//! Model records — the central aggregate of the catalog.
//!
//! A fetched [`Model`] preloads its owner, controller, cloud region and
//! credential, plus its application offers. The owning cloud's name rides
//! on the region row. Iteration (`for_each_model`) deliberately resolves
//! each row through an individual `get`, trading round trips for complete
//! associations.

use sqlx::Row;

use manifold_core::{Error, Result};

use crate::cloud::CloudRegion;
use crate::controller::Controller;
use crate::credential::CloudCredential;
use crate::db::{new_id, now_micros, Database};
use crate::error::SqlxErrorExt;
use crate::identity::Identity;
use crate::offer::ApplicationOffer;

/// Model lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Life {
    #[default]
    Alive,
    Dying,
    Dead,
}

impl Life {
    pub fn as_str(&self) -> &'static str {
        match self {
            Life::Alive => "alive",
            Life::Dying => "dying",
            Life::Dead => "dead",
        }
    }

    pub fn parse(s: &str) -> Result<Life> {
        match s {
            "alive" => Ok(Life::Alive),
            "dying" => Ok(Life::Dying),
            "dead" => Ok(Life::Dead),
            other => Err(Error::bad_request(format!("unknown life {other:?}"))),
        }
    }
}

/// A model hosted on one of the federated controllers.
#[derive(Clone, Debug, Default)]
pub struct Model {
    /// Surrogate row id, assigned on insert.
    pub id: String,
    /// Backend UUID; absent on a placeholder row that has not completed
    /// creation on its controller yet.
    pub uuid: Option<String>,
    pub name: String,
    pub life: Life,
    pub owner: Identity,
    pub controller: Controller,
    /// Region the model is placed in; `controllers` is not populated here.
    pub cloud_region: CloudRegion,
    pub credential: CloudCredential,
    pub offers: Vec<ApplicationOffer>,
}

impl Model {
    /// The policy-store tag; requires the backend UUID to be known.
    pub fn tag(&self) -> Result<manifold_core::Tag> {
        match &self.uuid {
            Some(uuid) => Ok(manifold_core::Tag::model(uuid)),
            None => Err(Error::not_found(format!(
                "model {}/{} has no uuid yet",
                self.owner.name, self.name
            ))),
        }
    }
}

impl Database {
    /// Insert a model row, assigning its surrogate id.
    pub async fn add_model(&self, model: &mut Model) -> Result<()> {
        const OP: &str = "add-model";
        let pool = self.pool(OP)?;
        if model.id.is_empty() {
            model.id = new_id();
        }
        sqlx::query(
            "INSERT INTO models
             (id, uuid, name, owner_name, controller_uuid, region_id, credential_id, life, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(&model.id)
        .bind(model.uuid.as_deref())
        .bind(&model.name)
        .bind(&model.owner.name)
        .bind(&model.controller.uuid)
        .bind(&model.cloud_region.id)
        .bind(&model.credential.id)
        .bind(model.life.as_str())
        .bind(now_micros())
        .execute(pool)
        .await
        .map_err(|e| e.into_store_error(OP))?;
        Ok(())
    }

    /// Fetch a model by backend UUID with all associations preloaded.
    pub async fn get_model(&self, uuid: &str) -> Result<Model> {
        const OP: &str = "get-model";
        let pool = self.pool(OP)?;
        let row = sqlx::query("SELECT id FROM models WHERE uuid = $1")
            .bind(uuid)
            .fetch_one(pool)
            .await
            .map_err(|e| e.into_store_error(OP))?;
        let id: String = row.try_get("id").map_err(|e| e.into_store_error(OP))?;
        self.get_model_by_row_id(&id).await
    }

    /// Fetch a model by its surrogate row id.
    pub async fn get_model_by_row_id(&self, id: &str) -> Result<Model> {
        const OP: &str = "get-model";
        let pool = self.pool(OP)?;
        let row = sqlx::query(
            "SELECT id, uuid, name, owner_name, controller_uuid, region_id, credential_id, life
             FROM models WHERE id = $1",
        )
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(|e| e.into_store_error(OP))?;
        self.assemble_model(OP, &row).await
    }

    /// Fetch a model by `(owner, name)`.
    pub async fn get_model_by_name(&self, owner: &str, name: &str) -> Result<Model> {
        const OP: &str = "get-model";
        let pool = self.pool(OP)?;
        let row = sqlx::query(
            "SELECT id, uuid, name, owner_name, controller_uuid, region_id, credential_id, life
             FROM models WHERE owner_name = $1 AND name = $2",
        )
        .bind(owner)
        .bind(name)
        .fetch_one(pool)
        .await
        .map_err(|e| e.into_store_error(OP))?;
        self.assemble_model(OP, &row).await
    }

    /// Fetch a model by `(controller, uuid)`; used by the summary watcher
    /// to drop abstracts for models the plane does not track.
    pub async fn get_model_on_controller(
        &self,
        controller_uuid: &str,
        model_uuid: &str,
    ) -> Result<Model> {
        const OP: &str = "get-model";
        let pool = self.pool(OP)?;
        let row = sqlx::query(
            "SELECT id, uuid, name, owner_name, controller_uuid, region_id, credential_id, life
             FROM models WHERE controller_uuid = $1 AND uuid = $2",
        )
        .bind(controller_uuid)
        .bind(model_uuid)
        .fetch_one(pool)
        .await
        .map_err(|e| e.into_store_error(OP))?;
        self.assemble_model(OP, &row).await
    }

    async fn assemble_model(&self, op: &str, row: &sqlx::any::AnyRow) -> Result<Model> {
        let id: String = row.try_get("id").map_err(|e| e.into_store_error(op))?;
        let uuid: Option<String> = row.try_get("uuid").map_err(|e| e.into_store_error(op))?;
        let name: String = row.try_get("name").map_err(|e| e.into_store_error(op))?;
        let owner_name: String = row.try_get("owner_name").map_err(|e| e.into_store_error(op))?;
        let controller_uuid: String = row
            .try_get("controller_uuid")
            .map_err(|e| e.into_store_error(op))?;
        let region_id: String = row.try_get("region_id").map_err(|e| e.into_store_error(op))?;
        let credential_id: String = row
            .try_get("credential_id")
            .map_err(|e| e.into_store_error(op))?;
        let life: String = row.try_get("life").map_err(|e| e.into_store_error(op))?;

        let owner = self.get_identity(&owner_name).await?;
        let controller = self.get_controller(&controller_uuid).await?;
        let cloud_region = self.get_region(op, &region_id).await?;
        let credential = self.get_cloud_credential_by_id(&credential_id).await?;
        let offers = self.offers_for_model(&id).await?;

        Ok(Model {
            id,
            uuid,
            name,
            life: Life::parse(&life)?,
            owner,
            controller,
            cloud_region,
            credential,
            offers,
        })
    }

    async fn get_region(&self, op: &str, region_id: &str) -> Result<CloudRegion> {
        let pool = self.pool(op)?;
        let row = sqlx::query("SELECT id, cloud_name, name FROM cloud_regions WHERE id = $1")
            .bind(region_id)
            .fetch_one(pool)
            .await
            .map_err(|e| e.into_store_error(op))?;
        Ok(CloudRegion {
            id: row.try_get("id").map_err(|e| e.into_store_error(op))?,
            cloud_name: row.try_get("cloud_name").map_err(|e| e.into_store_error(op))?,
            name: row.try_get("name").map_err(|e| e.into_store_error(op))?,
            defaults: Default::default(),
            controllers: Vec::new(),
        })
    }

    /// Save the mutable columns of a model row.
    pub async fn update_model(&self, model: &Model) -> Result<()> {
        const OP: &str = "update-model";
        let pool = self.pool(OP)?;
        sqlx::query(
            "UPDATE models SET uuid = $1, name = $2, owner_name = $3, controller_uuid = $4,
             region_id = $5, credential_id = $6, life = $7 WHERE id = $8",
        )
        .bind(model.uuid.as_deref())
        .bind(&model.name)
        .bind(&model.owner.name)
        .bind(&model.controller.uuid)
        .bind(&model.cloud_region.id)
        .bind(&model.credential.id)
        .bind(model.life.as_str())
        .bind(&model.id)
        .execute(pool)
        .await
        .map_err(|e| e.into_store_error(OP))?;
        Ok(())
    }

    pub async fn set_model_life(&self, id: &str, life: Life) -> Result<()> {
        const OP: &str = "set-model-life";
        let pool = self.pool(OP)?;
        sqlx::query("UPDATE models SET life = $1 WHERE id = $2")
            .bind(life.as_str())
            .bind(id)
            .execute(pool)
            .await
            .map_err(|e| e.into_store_error(OP))?;
        Ok(())
    }

    /// Delete a model row and its offers.
    pub async fn delete_model(&self, id: &str) -> Result<()> {
        const OP: &str = "delete-model";
        let pool = self.pool(OP)?;
        let mut tx = pool.begin().await.map_err(|e| e.into_store_error(OP))?;
        sqlx::query("DELETE FROM application_offers WHERE model_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.into_store_error(OP))?;
        sqlx::query("DELETE FROM models WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.into_store_error(OP))?;
        tx.commit().await.map_err(|e| e.into_store_error(OP))
    }

    /// Walk every model, name ascending. Implemented as an id cursor
    /// followed by a full `get` per row so associations are complete;
    /// iteration cost is one round trip per model by design.
    pub async fn for_each_model(&self) -> Result<Vec<Model>> {
        const OP: &str = "for-each-model";
        let pool = self.pool(OP)?;
        let rows = sqlx::query("SELECT id FROM models ORDER BY name ASC")
            .fetch_all(pool)
            .await
            .map_err(|e| e.into_store_error(OP))?;
        let mut models = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id").map_err(|e| e.into_store_error(OP))?;
            models.push(self.get_model_by_row_id(&id).await?);
        }
        Ok(models)
    }

    /// Models currently in the given lifecycle state.
    pub async fn models_with_life(&self, life: Life) -> Result<Vec<Model>> {
        const OP: &str = "models-with-life";
        let pool = self.pool(OP)?;
        let rows = sqlx::query("SELECT id FROM models WHERE life = $1 ORDER BY name ASC")
            .bind(life.as_str())
            .fetch_all(pool)
            .await
            .map_err(|e| e.into_store_error(OP))?;
        let mut models = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id").map_err(|e| e.into_store_error(OP))?;
            models.push(self.get_model_by_row_id(&id).await?);
        }
        Ok(models)
    }

    pub async fn count_models(&self) -> Result<i64> {
        self.count("count-models", "SELECT COUNT(*) FROM models").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::PRIORITY_DEPLOYED;
    use crate::test_fixtures::seed_placement;

    #[tokio::test]
    async fn model_round_trip_preloads_associations() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let mut model = seed_placement(&db, "alice@example.com", "prod").await;
        model.uuid = Some(uuid::Uuid::new_v4().to_string());
        db.add_model(&mut model).await.unwrap();

        let got = db.get_model(model.uuid.as_deref().unwrap()).await.unwrap();
        assert_eq!(got.name, "prod");
        assert_eq!(got.owner.name, "alice@example.com");
        assert_eq!(got.cloud_region.cloud_name, "test-cloud");
        assert_eq!(got.credential.name, "default");
        assert_eq!(got.life, Life::Alive);
        assert!(got.offers.is_empty());

        let by_name = db.get_model_by_name("alice@example.com", "prod").await.unwrap();
        assert_eq!(by_name.id, got.id);
    }

    #[tokio::test]
    async fn owner_name_pair_is_unique() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let mut model = seed_placement(&db, "alice@example.com", "prod").await;
        db.add_model(&mut model).await.unwrap();

        let mut duplicate = model.clone();
        duplicate.id = String::new();
        duplicate.uuid = None;
        let err = db.add_model(&mut duplicate).await.unwrap_err();
        assert_eq!(err.code(), "already-exists");
    }

    #[tokio::test]
    async fn life_transitions_are_visible() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let mut model = seed_placement(&db, "alice@example.com", "prod").await;
        model.uuid = Some(uuid::Uuid::new_v4().to_string());
        db.add_model(&mut model).await.unwrap();

        db.set_model_life(&model.id, Life::Dying).await.unwrap();
        let dying = db.models_with_life(Life::Dying).await.unwrap();
        assert_eq!(dying.len(), 1);
        assert_eq!(dying[0].id, model.id);

        db.delete_model(&model.id).await.unwrap();
        assert_eq!(db.count_models().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn placeholder_rows_have_no_uuid() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let mut one = seed_placement(&db, "alice@example.com", "m1").await;
        db.add_model(&mut one).await.unwrap();
        // A second placeholder with no uuid must not trip the unique
        // constraint on uuid.
        let mut two = seed_placement(&db, "alice@example.com", "m2").await;
        two.id = String::new();
        db.add_model(&mut two).await.unwrap();
        assert_eq!(db.count_models().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn seeded_cloud_has_deployed_priority() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let _ = seed_placement(&db, "alice@example.com", "prod").await;
        let cloud = db.get_cloud("test-cloud").await.unwrap();
        assert_eq!(cloud.regions[0].controllers[0].priority, PRIORITY_DEPLOYED);
    }
}
