//! Role records. Structurally a mirror of groups with assignees instead
//! of members.

use sqlx::Row;

use manifold_core::Result;

use crate::db::{new_id, now_micros, Database};
use crate::error::SqlxErrorExt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoleEntry {
    pub uuid: String,
    pub name: String,
}

fn role_from_row(row: &sqlx::any::AnyRow, op: &str) -> Result<RoleEntry> {
    Ok(RoleEntry {
        uuid: row.try_get("uuid").map_err(|e| e.into_store_error(op))?,
        name: row.try_get("name").map_err(|e| e.into_store_error(op))?,
    })
}

impl Database {
    pub async fn add_role(&self, name: &str) -> Result<RoleEntry> {
        const OP: &str = "add-role";
        let pool = self.pool(OP)?;
        let entry = RoleEntry {
            uuid: new_id(),
            name: name.to_string(),
        };
        sqlx::query("INSERT INTO roles (uuid, name, created_at) VALUES ($1, $2, $3)")
            .bind(&entry.uuid)
            .bind(&entry.name)
            .bind(now_micros())
            .execute(pool)
            .await
            .map_err(|e| e.into_store_error(OP))?;
        Ok(entry)
    }

    pub async fn get_role(&self, uuid: &str) -> Result<RoleEntry> {
        const OP: &str = "get-role";
        let pool = self.pool(OP)?;
        let row = sqlx::query("SELECT uuid, name FROM roles WHERE uuid = $1")
            .bind(uuid)
            .fetch_one(pool)
            .await
            .map_err(|e| e.into_store_error(OP))?;
        role_from_row(&row, OP)
    }

    pub async fn get_role_by_name(&self, name: &str) -> Result<RoleEntry> {
        const OP: &str = "get-role";
        let pool = self.pool(OP)?;
        let row = sqlx::query("SELECT uuid, name FROM roles WHERE name = $1")
            .bind(name)
            .fetch_one(pool)
            .await
            .map_err(|e| e.into_store_error(OP))?;
        role_from_row(&row, OP)
    }

    pub async fn rename_role(&self, uuid: &str, new_name: &str) -> Result<()> {
        const OP: &str = "rename-role";
        let pool = self.pool(OP)?;
        let result = sqlx::query("UPDATE roles SET name = $1 WHERE uuid = $2")
            .bind(new_name)
            .bind(uuid)
            .execute(pool)
            .await
            .map_err(|e| e.into_store_error(OP))?;
        if result.rows_affected() == 0 {
            return Err(manifold_core::Error::not_found(format!("role {uuid} not found")).op(OP));
        }
        Ok(())
    }

    pub async fn remove_role(&self, uuid: &str) -> Result<()> {
        const OP: &str = "remove-role";
        let pool = self.pool(OP)?;
        let result = sqlx::query("DELETE FROM roles WHERE uuid = $1")
            .bind(uuid)
            .execute(pool)
            .await
            .map_err(|e| e.into_store_error(OP))?;
        if result.rows_affected() == 0 {
            return Err(manifold_core::Error::not_found(format!("role {uuid} not found")).op(OP));
        }
        Ok(())
    }

    pub async fn list_roles(
        &self,
        limit: i64,
        offset: i64,
        name_match: Option<&str>,
    ) -> Result<Vec<RoleEntry>> {
        const OP: &str = "list-roles";
        let pool = self.pool(OP)?;
        let rows = match name_match {
            Some(pattern) => {
                let like = format!("%{pattern}%");
                sqlx::query(
                    "SELECT uuid, name FROM roles
                     WHERE name LIKE $1 OR uuid LIKE $2
                     ORDER BY name ASC LIMIT $3 OFFSET $4",
                )
                .bind(like.clone())
                .bind(like)
                .bind(limit)
                .bind(offset)
                .fetch_all(pool)
                .await
            }
            None => {
                sqlx::query("SELECT uuid, name FROM roles ORDER BY name ASC LIMIT $1 OFFSET $2")
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(pool)
                    .await
            }
        }
        .map_err(|e| e.into_store_error(OP))?;
        rows.iter().map(|row| role_from_row(row, OP)).collect()
    }

    pub async fn count_roles(&self) -> Result<i64> {
        self.count("count-roles", "SELECT COUNT(*) FROM roles").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_removal_is_not_found() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let r = db.add_role("operator").await.unwrap();
        db.remove_role(&r.uuid).await.unwrap();
        assert_eq!(db.remove_role(&r.uuid).await.unwrap_err().code(), "not-found");
    }

    #[tokio::test]
    async fn list_window_positions() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        for name in ["r-c", "r-a", "r-e", "r-b", "r-d"] {
            db.add_role(name).await.unwrap();
        }
        let page = db.list_roles(2, 2, None).await.unwrap();
        let names: Vec<_> = page.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["r-c", "r-d"]);
    }
}
