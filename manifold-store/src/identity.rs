//! Identity records.
//!
//! Identities are created lazily on first successful authentication and
//! never deleted.

use sqlx::Row;

use manifold_core::Result;

use crate::db::{now_micros, Database};
use crate::error::SqlxErrorExt;

/// A user or service-account identity known to the plane.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Identity {
    /// External principal, e.g. `alice@example.com` or
    /// `0001-...@serviceaccount`.
    pub name: String,
    pub display_name: String,
    /// Whether this identity administers the plane itself.
    pub admin: bool,
}

impl Identity {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let display_name = name.split('@').next().unwrap_or_default().to_string();
        Self {
            name,
            display_name,
            admin: false,
        }
    }

    /// The policy-store tag of this identity.
    pub fn tag(&self) -> manifold_core::Tag {
        manifold_core::Tag::user(&self.name)
    }
}

fn identity_from_row(row: &sqlx::any::AnyRow) -> Result<Identity> {
    Ok(Identity {
        name: row.try_get("name").map_err(|e| e.into_store_error("get-identity"))?,
        display_name: row
            .try_get("display_name")
            .map_err(|e| e.into_store_error("get-identity"))?,
        admin: row.try_get("admin").map_err(|e| e.into_store_error("get-identity"))?,
    })
}

impl Database {
    /// Fetch the identity, creating it if this is the first time the
    /// principal is seen.
    pub async fn ensure_identity(&self, name: &str) -> Result<Identity> {
        const OP: &str = "ensure-identity";
        if let Some(existing) = self.maybe_identity(name).await? {
            return Ok(existing);
        }
        let identity = Identity::new(name);
        let pool = self.pool(OP)?;
        let result = sqlx::query(
            "INSERT INTO identities (name, display_name, admin, created_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(&identity.name)
        .bind(&identity.display_name)
        .bind(identity.admin)
        .bind(now_micros())
        .execute(pool)
        .await;
        match result {
            Ok(_) => Ok(identity),
            Err(e) => {
                let err = e.into_store_error(OP);
                if err.is_already_exists() {
                    // Lost a race with a concurrent first login.
                    self.get_identity(name).await
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Fetch an identity; `not-found` when the principal is unknown.
    pub async fn get_identity(&self, name: &str) -> Result<Identity> {
        const OP: &str = "get-identity";
        let pool = self.pool(OP)?;
        let row = sqlx::query("SELECT name, display_name, admin FROM identities WHERE name = $1")
            .bind(name)
            .fetch_one(pool)
            .await
            .map_err(|e| e.into_store_error(OP))?;
        identity_from_row(&row)
    }

    async fn maybe_identity(&self, name: &str) -> Result<Option<Identity>> {
        const OP: &str = "get-identity";
        let pool = self.pool(OP)?;
        let row = sqlx::query("SELECT name, display_name, admin FROM identities WHERE name = $1")
            .bind(name)
            .fetch_optional(pool)
            .await
            .map_err(|e| e.into_store_error(OP))?;
        row.as_ref().map(identity_from_row).transpose()
    }

    /// Save all columns of an identity.
    pub async fn update_identity(&self, identity: &Identity) -> Result<()> {
        const OP: &str = "update-identity";
        let pool = self.pool(OP)?;
        sqlx::query("UPDATE identities SET display_name = $1, admin = $2 WHERE name = $3")
            .bind(&identity.display_name)
            .bind(identity.admin)
            .bind(&identity.name)
            .execute(pool)
            .await
            .map_err(|e| e.into_store_error(OP))?;
        Ok(())
    }

    /// List identities ordered by name, with optional substring match.
    pub async fn list_identities(
        &self,
        limit: i64,
        offset: i64,
        name_match: Option<&str>,
    ) -> Result<Vec<Identity>> {
        const OP: &str = "list-identities";
        let pool = self.pool(OP)?;
        let rows = match name_match {
            Some(pattern) => {
                sqlx::query(
                    "SELECT name, display_name, admin FROM identities
                     WHERE name LIKE $1 ORDER BY name ASC LIMIT $2 OFFSET $3",
                )
                .bind(format!("%{pattern}%"))
                .bind(limit)
                .bind(offset)
                .fetch_all(pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT name, display_name, admin FROM identities
                     ORDER BY name ASC LIMIT $1 OFFSET $2",
                )
                .bind(limit)
                .bind(offset)
                .fetch_all(pool)
                .await
            }
        }
        .map_err(|e| e.into_store_error(OP))?;
        rows.iter().map(identity_from_row).collect()
    }

    pub async fn count_identities(&self) -> Result<i64> {
        self.count("count-identities", "SELECT COUNT(*) FROM identities")
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ensure_identity_is_lazy_and_stable() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let first = db.ensure_identity("alice@example.com").await.unwrap();
        assert_eq!(first.display_name, "alice");
        assert!(!first.admin);

        let mut updated = first.clone();
        updated.admin = true;
        db.update_identity(&updated).await.unwrap();

        // A later ensure returns the stored record, not a fresh one.
        let again = db.ensure_identity("alice@example.com").await.unwrap();
        assert!(again.admin);
    }

    #[tokio::test]
    async fn unknown_identity_is_not_found() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let err = db.get_identity("ghost@example.com").await.unwrap_err();
        assert_eq!(err.code(), "not-found");
    }

    #[tokio::test]
    async fn listing_is_ordered_and_filtered() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        for name in ["carol@example.com", "alice@example.com", "bob@other.org"] {
            db.ensure_identity(name).await.unwrap();
        }
        let all = db.list_identities(10, 0, None).await.unwrap();
        let names: Vec<_> = all.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(
            names,
            ["alice@example.com", "bob@other.org", "carol@example.com"]
        );

        let filtered = db.list_identities(10, 0, Some("example.com")).await.unwrap();
        assert_eq!(filtered.len(), 2);
        assert_eq!(db.count_identities().await.unwrap(), 3);
    }
}
