//! Cloud credential records.
//!
//! The catalog keeps the identity of a credential and its validity
//! tri-state; the secret attributes live in the credential store
//! (see [`crate::vault`]).

use sqlx::Row;

use manifold_core::Result;

use crate::db::{new_id, Database};
use crate::error::SqlxErrorExt;

/// A credential identified by `(owner, cloud, name)`.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct CloudCredential {
    pub id: String,
    pub owner_name: String,
    pub cloud_name: String,
    pub name: String,
    pub auth_type: String,
    /// `None` while validity is unknown.
    pub valid: Option<bool>,
}

impl CloudCredential {
    /// `owner/cloud/name`, the form used in RPC params.
    pub fn path(&self) -> String {
        format!("{}/{}/{}", self.cloud_name, self.owner_name, self.name)
    }
}

fn credential_from_row(row: &sqlx::any::AnyRow, op: &str) -> Result<CloudCredential> {
    Ok(CloudCredential {
        id: row.try_get("id").map_err(|e| e.into_store_error(op))?,
        owner_name: row.try_get("owner_name").map_err(|e| e.into_store_error(op))?,
        cloud_name: row.try_get("cloud_name").map_err(|e| e.into_store_error(op))?,
        name: row.try_get("name").map_err(|e| e.into_store_error(op))?,
        auth_type: row.try_get("auth_type").map_err(|e| e.into_store_error(op))?,
        valid: row.try_get("valid").map_err(|e| e.into_store_error(op))?,
    })
}

const CREDENTIAL_COLUMNS: &str = "id, owner_name, cloud_name, name, auth_type, valid";

impl Database {
    /// Insert or update a credential, returning its id.
    pub async fn upsert_cloud_credential(&self, credential: &CloudCredential) -> Result<String> {
        const OP: &str = "upsert-cloud-credential";
        let pool = self.pool(OP)?;
        if let Some(existing) = self
            .maybe_cloud_credential(
                &credential.owner_name,
                &credential.cloud_name,
                &credential.name,
            )
            .await?
        {
            sqlx::query("UPDATE cloud_credentials SET auth_type = $1, valid = $2 WHERE id = $3")
                .bind(&credential.auth_type)
                .bind(credential.valid)
                .bind(&existing.id)
                .execute(pool)
                .await
                .map_err(|e| e.into_store_error(OP))?;
            return Ok(existing.id);
        }
        let id = new_id();
        sqlx::query(
            "INSERT INTO cloud_credentials (id, owner_name, cloud_name, name, auth_type, valid)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&id)
        .bind(&credential.owner_name)
        .bind(&credential.cloud_name)
        .bind(&credential.name)
        .bind(&credential.auth_type)
        .bind(credential.valid)
        .execute(pool)
        .await
        .map_err(|e| e.into_store_error(OP))?;
        Ok(id)
    }

    pub async fn get_cloud_credential(
        &self,
        owner: &str,
        cloud: &str,
        name: &str,
    ) -> Result<CloudCredential> {
        const OP: &str = "get-cloud-credential";
        self.maybe_cloud_credential(owner, cloud, name)
            .await?
            .ok_or_else(|| {
                manifold_core::Error::not_found(format!(
                    "cloud credential {cloud}/{owner}/{name} not found"
                ))
                .op(OP)
            })
    }

    async fn maybe_cloud_credential(
        &self,
        owner: &str,
        cloud: &str,
        name: &str,
    ) -> Result<Option<CloudCredential>> {
        const OP: &str = "get-cloud-credential";
        let pool = self.pool(OP)?;
        let row = sqlx::query(&format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM cloud_credentials
             WHERE owner_name = $1 AND cloud_name = $2 AND name = $3"
        ))
        .bind(owner)
        .bind(cloud)
        .bind(name)
        .fetch_optional(pool)
        .await
        .map_err(|e| e.into_store_error(OP))?;
        row.as_ref().map(|r| credential_from_row(r, OP)).transpose()
    }

    pub async fn get_cloud_credential_by_id(&self, id: &str) -> Result<CloudCredential> {
        const OP: &str = "get-cloud-credential";
        let pool = self.pool(OP)?;
        let row = sqlx::query(&format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM cloud_credentials WHERE id = $1"
        ))
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(|e| e.into_store_error(OP))?;
        credential_from_row(&row, OP)
    }

    /// Credentials an owner holds for a cloud, ordered by name.
    pub async fn cloud_credentials_for(
        &self,
        owner: &str,
        cloud: &str,
    ) -> Result<Vec<CloudCredential>> {
        const OP: &str = "list-cloud-credentials";
        let pool = self.pool(OP)?;
        let rows = sqlx::query(&format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM cloud_credentials
             WHERE owner_name = $1 AND cloud_name = $2 ORDER BY name ASC"
        ))
        .bind(owner)
        .bind(cloud)
        .fetch_all(pool)
        .await
        .map_err(|e| e.into_store_error(OP))?;
        rows.iter().map(|row| credential_from_row(row, OP)).collect()
    }

    /// Record the outcome of a credential check against a backend.
    pub async fn set_cloud_credential_valid(&self, id: &str, valid: Option<bool>) -> Result<()> {
        const OP: &str = "set-cloud-credential-valid";
        let pool = self.pool(OP)?;
        sqlx::query("UPDATE cloud_credentials SET valid = $1 WHERE id = $2")
            .bind(valid)
            .bind(id)
            .execute(pool)
            .await
            .map_err(|e| e.into_store_error(OP))?;
        Ok(())
    }

    /// Number of models bound to a credential.
    pub async fn models_using_credential(&self, id: &str) -> Result<i64> {
        const OP: &str = "models-using-credential";
        let pool = self.pool(OP)?;
        let row = sqlx::query("SELECT COUNT(*) FROM models WHERE credential_id = $1")
            .bind(id)
            .fetch_one(pool)
            .await
            .map_err(|e| e.into_store_error(OP))?;
        row.try_get(0).map_err(|e| e.into_store_error(OP))
    }
}
