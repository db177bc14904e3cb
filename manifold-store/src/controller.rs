//! Backend controller records.

use sqlx::Row;

use manifold_core::{Error, Result};

use crate::db::{new_id, Database};
use crate::error::SqlxErrorExt;

/// A backend controller federated into the plane.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Controller {
    pub uuid: String,
    pub name: String,
    /// Preferred dial address, tried before `addresses`.
    pub public_address: String,
    /// `host:port` pairs in declared order.
    pub addresses: Vec<String>,
    /// PEM text of the controller CA.
    pub ca_cert: String,
    /// Hostname to verify TLS against when dialing by IP.
    pub tls_hostname: String,
    /// Unix microseconds of the first failed dial; `None` while healthy.
    pub unavailable_since: Option<i64>,
    pub deprecated: bool,
    pub agent_version: String,
}

impl Controller {
    pub fn tag(&self) -> manifold_core::Tag {
        manifold_core::Tag::controller(&self.uuid)
    }
}

fn controller_from_row(row: &sqlx::any::AnyRow, op: &str) -> Result<Controller> {
    let addresses: String = row.try_get("addresses").map_err(|e| e.into_store_error(op))?;
    let addresses: Vec<String> = serde_json::from_str(&addresses)
        .map_err(|e| Error::unspecified(format!("decode controller addresses: {e}")).op(op))?;
    Ok(Controller {
        uuid: row.try_get("uuid").map_err(|e| e.into_store_error(op))?,
        name: row.try_get("name").map_err(|e| e.into_store_error(op))?,
        public_address: row
            .try_get("public_address")
            .map_err(|e| e.into_store_error(op))?,
        addresses,
        ca_cert: row.try_get("ca_cert").map_err(|e| e.into_store_error(op))?,
        tls_hostname: row
            .try_get("tls_hostname")
            .map_err(|e| e.into_store_error(op))?,
        unavailable_since: row
            .try_get("unavailable_since")
            .map_err(|e| e.into_store_error(op))?,
        deprecated: row.try_get("deprecated").map_err(|e| e.into_store_error(op))?,
        agent_version: row
            .try_get("agent_version")
            .map_err(|e| e.into_store_error(op))?,
    })
}

const CONTROLLER_COLUMNS: &str = "uuid, name, public_address, addresses, ca_cert, tls_hostname,
     unavailable_since, deprecated, agent_version";

impl Database {
    /// Persist a controller together with its cloud-region priority rows
    /// in one transaction.
    pub async fn add_controller(
        &self,
        controller: &Controller,
        priorities: &[(String, i32)],
    ) -> Result<()> {
        const OP: &str = "add-controller";
        let pool = self.pool(OP)?;
        let mut tx = pool.begin().await.map_err(|e| e.into_store_error(OP))?;
        let addresses = serde_json::to_string(&controller.addresses)
            .map_err(|e| Error::unspecified(format!("encode controller addresses: {e}")).op(OP))?;
        sqlx::query(
            "INSERT INTO controllers
             (uuid, name, public_address, addresses, ca_cert, tls_hostname,
              unavailable_since, deprecated, agent_version)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(&controller.uuid)
        .bind(&controller.name)
        .bind(&controller.public_address)
        .bind(addresses)
        .bind(&controller.ca_cert)
        .bind(&controller.tls_hostname)
        .bind(controller.unavailable_since)
        .bind(controller.deprecated)
        .bind(&controller.agent_version)
        .execute(&mut *tx)
        .await
        .map_err(|e| e.into_store_error(OP))?;

        for (region_id, priority) in priorities {
            sqlx::query(
                "INSERT INTO cloud_region_controller_priorities
                 (id, region_id, controller_uuid, priority)
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(new_id())
            .bind(region_id)
            .bind(&controller.uuid)
            .bind(*priority)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.into_store_error(OP))?;
        }
        tx.commit().await.map_err(|e| e.into_store_error(OP))
    }

    pub async fn get_controller(&self, uuid: &str) -> Result<Controller> {
        const OP: &str = "get-controller";
        let pool = self.pool(OP)?;
        let row = sqlx::query(&format!(
            "SELECT {CONTROLLER_COLUMNS} FROM controllers WHERE uuid = $1"
        ))
        .bind(uuid)
        .fetch_one(pool)
        .await
        .map_err(|e| e.into_store_error(OP))?;
        controller_from_row(&row, OP)
    }

    pub async fn get_controller_by_name(&self, name: &str) -> Result<Controller> {
        const OP: &str = "get-controller";
        let pool = self.pool(OP)?;
        let row = sqlx::query(&format!(
            "SELECT {CONTROLLER_COLUMNS} FROM controllers WHERE name = $1"
        ))
        .bind(name)
        .fetch_one(pool)
        .await
        .map_err(|e| e.into_store_error(OP))?;
        controller_from_row(&row, OP)
    }

    /// Save all columns of a controller.
    pub async fn update_controller(&self, controller: &Controller) -> Result<()> {
        const OP: &str = "update-controller";
        let pool = self.pool(OP)?;
        let addresses = serde_json::to_string(&controller.addresses)
            .map_err(|e| Error::unspecified(format!("encode controller addresses: {e}")).op(OP))?;
        sqlx::query(
            "UPDATE controllers SET name = $1, public_address = $2, addresses = $3,
             ca_cert = $4, tls_hostname = $5, unavailable_since = $6, deprecated = $7,
             agent_version = $8 WHERE uuid = $9",
        )
        .bind(&controller.name)
        .bind(&controller.public_address)
        .bind(addresses)
        .bind(&controller.ca_cert)
        .bind(&controller.tls_hostname)
        .bind(controller.unavailable_since)
        .bind(controller.deprecated)
        .bind(&controller.agent_version)
        .bind(&controller.uuid)
        .execute(pool)
        .await
        .map_err(|e| e.into_store_error(OP))?;
        Ok(())
    }

    /// Record or clear the time a controller became unreachable.
    pub async fn set_controller_unavailable_since(
        &self,
        uuid: &str,
        since: Option<i64>,
    ) -> Result<()> {
        const OP: &str = "set-controller-unavailable-since";
        let pool = self.pool(OP)?;
        sqlx::query("UPDATE controllers SET unavailable_since = $1 WHERE uuid = $2")
            .bind(since)
            .bind(uuid)
            .execute(pool)
            .await
            .map_err(|e| e.into_store_error(OP))?;
        Ok(())
    }

    /// Remove a controller and its priority rows. Refused while models
    /// still reference it.
    pub async fn remove_controller(&self, uuid: &str) -> Result<()> {
        const OP: &str = "remove-controller";
        let pool = self.pool(OP)?;
        let row = sqlx::query("SELECT COUNT(*) FROM models WHERE controller_uuid = $1")
            .bind(uuid)
            .fetch_one(pool)
            .await
            .map_err(|e| e.into_store_error(OP))?;
        let models: i64 = row.try_get(0).map_err(|e| e.into_store_error(OP))?;
        if models > 0 {
            return Err(Error::bad_request(format!(
                "controller hosts {models} model(s)"
            ))
            .op(OP));
        }
        let mut tx = pool.begin().await.map_err(|e| e.into_store_error(OP))?;
        sqlx::query("DELETE FROM cloud_region_controller_priorities WHERE controller_uuid = $1")
            .bind(uuid)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.into_store_error(OP))?;
        let result = sqlx::query("DELETE FROM controllers WHERE uuid = $1")
            .bind(uuid)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.into_store_error(OP))?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("controller {uuid} not found")).op(OP));
        }
        tx.commit().await.map_err(|e| e.into_store_error(OP))
    }

    /// All controllers, ordered by name.
    pub async fn for_each_controller(&self) -> Result<Vec<Controller>> {
        const OP: &str = "for-each-controller";
        let pool = self.pool(OP)?;
        let rows = sqlx::query(&format!(
            "SELECT {CONTROLLER_COLUMNS} FROM controllers ORDER BY name ASC"
        ))
        .fetch_all(pool)
        .await
        .map_err(|e| e.into_store_error(OP))?;
        rows.iter().map(|row| controller_from_row(row, OP)).collect()
    }

    pub async fn count_controllers(&self) -> Result<i64> {
        self.count("count-controllers", "SELECT COUNT(*) FROM controllers")
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(name: &str) -> Controller {
        Controller {
            uuid: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            public_address: format!("{name}.example.com:17070"),
            addresses: vec!["10.0.0.1:17070".to_string(), "10.0.0.2:17070".to_string()],
            ca_cert: "-----BEGIN CERTIFICATE-----".to_string(),
            agent_version: "3.5.0".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn round_trip_preserves_addresses() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let c = controller("alpha");
        db.add_controller(&c, &[]).await.unwrap();
        let got = db.get_controller_by_name("alpha").await.unwrap();
        assert_eq!(got, c);
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        db.add_controller(&controller("alpha"), &[]).await.unwrap();
        let err = db.add_controller(&controller("alpha"), &[]).await.unwrap_err();
        assert_eq!(err.code(), "already-exists");
    }

    #[tokio::test]
    async fn unavailable_since_toggles() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let c = controller("alpha");
        db.add_controller(&c, &[]).await.unwrap();

        db.set_controller_unavailable_since(&c.uuid, Some(123)).await.unwrap();
        assert_eq!(
            db.get_controller(&c.uuid).await.unwrap().unavailable_since,
            Some(123)
        );
        db.set_controller_unavailable_since(&c.uuid, None).await.unwrap();
        assert_eq!(db.get_controller(&c.uuid).await.unwrap().unavailable_since, None);
    }
}
