//! Group records. Tuple cleanup on removal is the policy engine's job;
//! the catalog only owns the name → uuid mapping.

use sqlx::Row;

use manifold_core::Result;

use crate::db::{new_id, now_micros, Database};
use crate::error::SqlxErrorExt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupEntry {
    pub uuid: String,
    pub name: String,
}

fn group_from_row(row: &sqlx::any::AnyRow, op: &str) -> Result<GroupEntry> {
    Ok(GroupEntry {
        uuid: row.try_get("uuid").map_err(|e| e.into_store_error(op))?,
        name: row.try_get("name").map_err(|e| e.into_store_error(op))?,
    })
}

impl Database {
    /// Create a group; `already-exists` when the name is taken.
    pub async fn add_group(&self, name: &str) -> Result<GroupEntry> {
        const OP: &str = "add-group";
        let pool = self.pool(OP)?;
        let entry = GroupEntry {
            uuid: new_id(),
            name: name.to_string(),
        };
        sqlx::query("INSERT INTO groups (uuid, name, created_at) VALUES ($1, $2, $3)")
            .bind(&entry.uuid)
            .bind(&entry.name)
            .bind(now_micros())
            .execute(pool)
            .await
            .map_err(|e| e.into_store_error(OP))?;
        Ok(entry)
    }

    pub async fn get_group(&self, uuid: &str) -> Result<GroupEntry> {
        const OP: &str = "get-group";
        let pool = self.pool(OP)?;
        let row = sqlx::query("SELECT uuid, name FROM groups WHERE uuid = $1")
            .bind(uuid)
            .fetch_one(pool)
            .await
            .map_err(|e| e.into_store_error(OP))?;
        group_from_row(&row, OP)
    }

    pub async fn get_group_by_name(&self, name: &str) -> Result<GroupEntry> {
        const OP: &str = "get-group";
        let pool = self.pool(OP)?;
        let row = sqlx::query("SELECT uuid, name FROM groups WHERE name = $1")
            .bind(name)
            .fetch_one(pool)
            .await
            .map_err(|e| e.into_store_error(OP))?;
        group_from_row(&row, OP)
    }

    /// Rename a group; the uuid is stable across renames.
    pub async fn rename_group(&self, uuid: &str, new_name: &str) -> Result<()> {
        const OP: &str = "rename-group";
        let pool = self.pool(OP)?;
        let result = sqlx::query("UPDATE groups SET name = $1 WHERE uuid = $2")
            .bind(new_name)
            .bind(uuid)
            .execute(pool)
            .await
            .map_err(|e| e.into_store_error(OP))?;
        if result.rows_affected() == 0 {
            return Err(manifold_core::Error::not_found(format!("group {uuid} not found")).op(OP));
        }
        Ok(())
    }

    /// Delete a group; `not-found` when the uuid is unknown.
    pub async fn remove_group(&self, uuid: &str) -> Result<()> {
        const OP: &str = "remove-group";
        let pool = self.pool(OP)?;
        let result = sqlx::query("DELETE FROM groups WHERE uuid = $1")
            .bind(uuid)
            .execute(pool)
            .await
            .map_err(|e| e.into_store_error(OP))?;
        if result.rows_affected() == 0 {
            return Err(manifold_core::Error::not_found(format!("group {uuid} not found")).op(OP));
        }
        Ok(())
    }

    /// List groups ordered by name, with optional substring match over
    /// name and uuid.
    pub async fn list_groups(
        &self,
        limit: i64,
        offset: i64,
        name_match: Option<&str>,
    ) -> Result<Vec<GroupEntry>> {
        const OP: &str = "list-groups";
        let pool = self.pool(OP)?;
        let rows = match name_match {
            Some(pattern) => {
                let like = format!("%{pattern}%");
                sqlx::query(
                    "SELECT uuid, name FROM groups
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
                sqlx::query(
                    "SELECT uuid, name FROM groups ORDER BY name ASC LIMIT $1 OFFSET $2",
                )
                .bind(limit)
                .bind(offset)
                .fetch_all(pool)
                .await
            }
        }
        .map_err(|e| e.into_store_error(OP))?;
        rows.iter().map(|row| group_from_row(row, OP)).collect()
    }

    pub async fn count_groups(&self) -> Result<i64> {
        self.count("count-groups", "SELECT COUNT(*) FROM groups").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn group_lifecycle() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let g = db.add_group("engineering").await.unwrap();
        assert_eq!(db.get_group_by_name("engineering").await.unwrap(), g);

        db.rename_group(&g.uuid, "platform").await.unwrap();
        let renamed = db.get_group(&g.uuid).await.unwrap();
        assert_eq!(renamed.name, "platform");

        db.remove_group(&g.uuid).await.unwrap();
        let err = db.remove_group(&g.uuid).await.unwrap_err();
        assert_eq!(err.code(), "not-found");
    }

    #[tokio::test]
    async fn duplicate_name_is_already_exists() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        db.add_group("engineering").await.unwrap();
        let err = db.add_group("engineering").await.unwrap_err();
        assert_eq!(err.code(), "already-exists");
    }

    #[tokio::test]
    async fn listing_window_is_ordered_by_name() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        for name in ["delta", "alpha", "charlie", "bravo"] {
            db.add_group(name).await.unwrap();
        }
        let page = db.list_groups(2, 1, None).await.unwrap();
        let names: Vec<_> = page.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, ["bravo", "charlie"]);
        assert_eq!(db.count_groups().await.unwrap(), 4);
    }
}
