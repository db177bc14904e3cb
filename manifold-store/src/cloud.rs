//! Cloud and cloud-region records, including the per-region controller
//! priorities that drive model placement.

use std::collections::HashMap;

use sqlx::Row;

use manifold_core::{Error, Result};

use crate::controller::Controller;
use crate::db::{new_id, Database};
use crate::error::SqlxErrorExt;

fn decode_defaults(raw: &str, op: &str) -> Result<HashMap<String, serde_json::Value>> {
    if raw.is_empty() {
        return Ok(HashMap::new());
    }
    serde_json::from_str(raw)
        .map_err(|e| Error::unspecified(format!("decode config defaults: {e}")).op(op))
}

fn encode_defaults(defaults: &HashMap<String, serde_json::Value>, op: &str) -> Result<String> {
    if defaults.is_empty() {
        return Ok(String::new());
    }
    serde_json::to_string(defaults)
        .map_err(|e| Error::unspecified(format!("encode config defaults: {e}")).op(op))
}

/// Priority weight for a region the controller merely serves.
pub const PRIORITY_SUPPORTED: i32 = 1;
/// Priority weight for the region the controller itself runs in.
pub const PRIORITY_DEPLOYED: i32 = 10;

/// A cloud known to the plane.
#[derive(Clone, Debug, Default)]
pub struct Cloud {
    pub name: String,
    pub cloud_type: String,
    /// `<cloud>/<region>` this cloud is hosted on; empty for substrate
    /// clouds.
    pub host_cloud_region: String,
    /// Model-config defaults applied to every model on this cloud.
    pub defaults: HashMap<String, serde_json::Value>,
    /// Preloaded regions, with their controller priorities.
    pub regions: Vec<CloudRegion>,
}

impl Cloud {
    pub fn tag(&self) -> manifold_core::Tag {
        manifold_core::Tag::cloud(&self.name)
    }

    pub fn region(&self, name: &str) -> Option<&CloudRegion> {
        self.regions.iter().find(|r| r.name == name)
    }
}

/// A region of a cloud.
#[derive(Clone, Debug, Default)]
pub struct CloudRegion {
    pub id: String,
    pub cloud_name: String,
    pub name: String,
    /// Model-config defaults for models placed in this region; override
    /// the cloud-level defaults.
    pub defaults: HashMap<String, serde_json::Value>,
    /// Preloaded controllers serving this region, with priorities.
    pub controllers: Vec<RegionControllerPriority>,
}

/// A (controller, priority) edge on a region.
#[derive(Clone, Debug)]
pub struct RegionControllerPriority {
    pub controller: Controller,
    pub priority: i32,
}

impl Database {
    /// Create a cloud and its regions; `already-exists` when the name is
    /// taken. Reserved-name enforcement is the caller's concern.
    pub async fn add_cloud(&self, cloud: &Cloud) -> Result<()> {
        const OP: &str = "add-cloud";
        let pool = self.pool(OP)?;
        let mut tx = pool.begin().await.map_err(|e| e.into_store_error(OP))?;
        sqlx::query(
            "INSERT INTO clouds (name, cloud_type, host_cloud_region, defaults)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(&cloud.name)
        .bind(&cloud.cloud_type)
        .bind(&cloud.host_cloud_region)
        .bind(encode_defaults(&cloud.defaults, OP)?)
        .execute(&mut *tx)
        .await
        .map_err(|e| e.into_store_error(OP))?;
        for region in &cloud.regions {
            sqlx::query(
                "INSERT INTO cloud_regions (id, cloud_name, name, defaults)
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(new_id())
            .bind(&cloud.name)
            .bind(&region.name)
            .bind(encode_defaults(&region.defaults, OP)?)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.into_store_error(OP))?;
        }
        tx.commit().await.map_err(|e| e.into_store_error(OP))
    }

    /// Fetch a cloud with regions, their priorities and the controllers
    /// behind them preloaded.
    pub async fn get_cloud(&self, name: &str) -> Result<Cloud> {
        const OP: &str = "get-cloud";
        let pool = self.pool(OP)?;
        let row = sqlx::query(
            "SELECT name, cloud_type, host_cloud_region, defaults FROM clouds WHERE name = $1",
        )
        .bind(name)
        .fetch_one(pool)
        .await
        .map_err(|e| e.into_store_error(OP))?;
        let defaults: String = row.try_get("defaults").map_err(|e| e.into_store_error(OP))?;
        let mut cloud = Cloud {
            name: row.try_get("name").map_err(|e| e.into_store_error(OP))?,
            cloud_type: row.try_get("cloud_type").map_err(|e| e.into_store_error(OP))?,
            host_cloud_region: row
                .try_get("host_cloud_region")
                .map_err(|e| e.into_store_error(OP))?,
            defaults: decode_defaults(&defaults, OP)?,
            regions: Vec::new(),
        };
        cloud.regions = self.regions_of(OP, &cloud.name).await?;
        Ok(cloud)
    }

    async fn regions_of(&self, op: &str, cloud_name: &str) -> Result<Vec<CloudRegion>> {
        let pool = self.pool(op)?;
        let rows = sqlx::query(
            "SELECT id, cloud_name, name, defaults FROM cloud_regions WHERE cloud_name = $1
             ORDER BY name ASC",
        )
        .bind(cloud_name)
        .fetch_all(pool)
        .await
        .map_err(|e| e.into_store_error(op))?;
        let mut regions = Vec::with_capacity(rows.len());
        for row in rows {
            let defaults: String = row.try_get("defaults").map_err(|e| e.into_store_error(op))?;
            let mut region = CloudRegion {
                id: row.try_get("id").map_err(|e| e.into_store_error(op))?,
                cloud_name: row.try_get("cloud_name").map_err(|e| e.into_store_error(op))?,
                name: row.try_get("name").map_err(|e| e.into_store_error(op))?,
                defaults: decode_defaults(&defaults, op)?,
                controllers: Vec::new(),
            };
            region.controllers = self.region_priorities(op, &region.id).await?;
            regions.push(region);
        }
        Ok(regions)
    }

    async fn region_priorities(
        &self,
        op: &str,
        region_id: &str,
    ) -> Result<Vec<RegionControllerPriority>> {
        let pool = self.pool(op)?;
        let rows = sqlx::query(
            "SELECT controller_uuid, priority FROM cloud_region_controller_priorities
             WHERE region_id = $1 ORDER BY priority DESC",
        )
        .bind(region_id)
        .fetch_all(pool)
        .await
        .map_err(|e| e.into_store_error(op))?;
        let mut priorities = Vec::with_capacity(rows.len());
        for row in rows {
            let controller_uuid: String =
                row.try_get("controller_uuid").map_err(|e| e.into_store_error(op))?;
            let priority: i32 = row.try_get("priority").map_err(|e| e.into_store_error(op))?;
            priorities.push(RegionControllerPriority {
                controller: self.get_controller(&controller_uuid).await?,
                priority,
            });
        }
        Ok(priorities)
    }

    /// Add a region to an existing cloud, returning its id. Adding a
    /// region that already exists returns the existing id.
    pub async fn add_cloud_region(&self, cloud_name: &str, region_name: &str) -> Result<String> {
        const OP: &str = "add-cloud-region";
        let pool = self.pool(OP)?;
        if let Some(id) = self.region_id(cloud_name, region_name).await? {
            return Ok(id);
        }
        let id = new_id();
        let result = sqlx::query("INSERT INTO cloud_regions (id, cloud_name, name) VALUES ($1, $2, $3)")
            .bind(&id)
            .bind(cloud_name)
            .bind(region_name)
            .execute(pool)
            .await;
        match result {
            Ok(_) => Ok(id),
            Err(e) => {
                let err = e.into_store_error(OP);
                if err.is_already_exists() {
                    self.region_id(cloud_name, region_name).await?.ok_or(err)
                } else {
                    Err(err)
                }
            }
        }
    }

    /// The id of a region, if it exists.
    pub async fn region_id(&self, cloud_name: &str, region_name: &str) -> Result<Option<String>> {
        const OP: &str = "get-cloud-region";
        let pool = self.pool(OP)?;
        let row = sqlx::query("SELECT id FROM cloud_regions WHERE cloud_name = $1 AND name = $2")
            .bind(cloud_name)
            .bind(region_name)
            .fetch_optional(pool)
            .await
            .map_err(|e| e.into_store_error(OP))?;
        row.map(|r| r.try_get("id").map_err(|e| e.into_store_error(OP)))
            .transpose()
    }

    /// Create or update the priority of a (region, controller) edge.
    pub async fn upsert_region_priority(
        &self,
        region_id: &str,
        controller_uuid: &str,
        priority: i32,
    ) -> Result<()> {
        const OP: &str = "upsert-region-priority";
        let pool = self.pool(OP)?;
        let updated = sqlx::query(
            "UPDATE cloud_region_controller_priorities SET priority = $1
             WHERE region_id = $2 AND controller_uuid = $3",
        )
        .bind(priority)
        .bind(region_id)
        .bind(controller_uuid)
        .execute(pool)
        .await
        .map_err(|e| e.into_store_error(OP))?;
        if updated.rows_affected() > 0 {
            return Ok(());
        }
        sqlx::query(
            "INSERT INTO cloud_region_controller_priorities
             (id, region_id, controller_uuid, priority) VALUES ($1, $2, $3, $4)",
        )
        .bind(new_id())
        .bind(region_id)
        .bind(controller_uuid)
        .bind(priority)
        .execute(pool)
        .await
        .map_err(|e| e.into_store_error(OP))?;
        Ok(())
    }

    /// Replace the model-config defaults of a cloud.
    pub async fn set_cloud_defaults(
        &self,
        cloud: &str,
        defaults: &HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        const OP: &str = "set-cloud-defaults";
        let pool = self.pool(OP)?;
        let result = sqlx::query("UPDATE clouds SET defaults = $1 WHERE name = $2")
            .bind(encode_defaults(defaults, OP)?)
            .bind(cloud)
            .execute(pool)
            .await
            .map_err(|e| e.into_store_error(OP))?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("cloud {cloud:?} not found")).op(OP));
        }
        Ok(())
    }

    /// Replace the model-config defaults of a region.
    pub async fn set_region_defaults(
        &self,
        region_id: &str,
        defaults: &HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        const OP: &str = "set-region-defaults";
        let pool = self.pool(OP)?;
        let result = sqlx::query("UPDATE cloud_regions SET defaults = $1 WHERE id = $2")
            .bind(encode_defaults(defaults, OP)?)
            .bind(region_id)
            .execute(pool)
            .await
            .map_err(|e| e.into_store_error(OP))?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("region {region_id} not found")).op(OP));
        }
        Ok(())
    }

    /// Remove a cloud. Refused while models are placed in any of its
    /// regions; cascades regions and priority rows.
    pub async fn remove_cloud(&self, name: &str) -> Result<()> {
        const OP: &str = "remove-cloud";
        let pool = self.pool(OP)?;
        let row = sqlx::query(
            "SELECT COUNT(*) FROM models
             WHERE region_id IN (SELECT id FROM cloud_regions WHERE cloud_name = $1)",
        )
        .bind(name)
        .fetch_one(pool)
        .await
        .map_err(|e| e.into_store_error(OP))?;
        let models: i64 = row.try_get(0).map_err(|e| e.into_store_error(OP))?;
        if models > 0 {
            return Err(Error::bad_request(format!("cloud hosts {models} model(s)")).op(OP));
        }
        let mut tx = pool.begin().await.map_err(|e| e.into_store_error(OP))?;
        sqlx::query(
            "DELETE FROM cloud_region_controller_priorities
             WHERE region_id IN (SELECT id FROM cloud_regions WHERE cloud_name = $1)",
        )
        .bind(name)
        .execute(&mut *tx)
        .await
        .map_err(|e| e.into_store_error(OP))?;
        sqlx::query("DELETE FROM cloud_regions WHERE cloud_name = $1")
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.into_store_error(OP))?;
        let result = sqlx::query("DELETE FROM clouds WHERE name = $1")
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.into_store_error(OP))?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("cloud {name:?} not found")).op(OP));
        }
        tx.commit().await.map_err(|e| e.into_store_error(OP))
    }

    /// All clouds, ordered by name, fully preloaded.
    pub async fn for_each_cloud(&self) -> Result<Vec<Cloud>> {
        const OP: &str = "for-each-cloud";
        let pool = self.pool(OP)?;
        let rows = sqlx::query("SELECT name FROM clouds ORDER BY name ASC")
            .fetch_all(pool)
            .await
            .map_err(|e| e.into_store_error(OP))?;
        let mut clouds = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("name").map_err(|e| e.into_store_error(OP))?;
            clouds.push(self.get_cloud(&name).await?);
        }
        Ok(clouds)
    }
}
