//! Database handle and schema management.
//!
//! [`Database`] wraps an `sqlx::AnyPool` so the same code serves SQLite
//! (tests, single-node sites) and Postgres (production). All SQL in this
//! crate uses `$n` placeholders, each exactly once and in order, which both
//! drivers accept.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sqlx::any::AnyPoolOptions;
use sqlx::Row;
use sqlx::AnyPool;

use manifold_core::{Error, Result};

use crate::error::SqlxErrorExt;

/// Statements creating the catalog schema. Text surrogate keys keep the
/// DDL portable across SQLite and Postgres.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS identities (
        name TEXT PRIMARY KEY,
        display_name TEXT NOT NULL DEFAULT '',
        admin BOOLEAN NOT NULL DEFAULT FALSE,
        created_at BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS groups (
        uuid TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        created_at BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS roles (
        uuid TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        created_at BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS clouds (
        name TEXT PRIMARY KEY,
        cloud_type TEXT NOT NULL DEFAULT '',
        host_cloud_region TEXT NOT NULL DEFAULT '',
        defaults TEXT NOT NULL DEFAULT ''
    )",
    "CREATE TABLE IF NOT EXISTS cloud_regions (
        id TEXT PRIMARY KEY,
        cloud_name TEXT NOT NULL REFERENCES clouds(name),
        name TEXT NOT NULL,
        defaults TEXT NOT NULL DEFAULT '',
        UNIQUE (cloud_name, name)
    )",
    "CREATE TABLE IF NOT EXISTS controllers (
        uuid TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        public_address TEXT NOT NULL DEFAULT '',
        addresses TEXT NOT NULL DEFAULT '[]',
        ca_cert TEXT NOT NULL DEFAULT '',
        tls_hostname TEXT NOT NULL DEFAULT '',
        unavailable_since BIGINT,
        deprecated BOOLEAN NOT NULL DEFAULT FALSE,
        agent_version TEXT NOT NULL DEFAULT ''
    )",
    "CREATE TABLE IF NOT EXISTS cloud_region_controller_priorities (
        id TEXT PRIMARY KEY,
        region_id TEXT NOT NULL REFERENCES cloud_regions(id),
        controller_uuid TEXT NOT NULL REFERENCES controllers(uuid),
        priority INTEGER NOT NULL,
        UNIQUE (region_id, controller_uuid)
    )",
    "CREATE TABLE IF NOT EXISTS cloud_credentials (
        id TEXT PRIMARY KEY,
        owner_name TEXT NOT NULL REFERENCES identities(name),
        cloud_name TEXT NOT NULL REFERENCES clouds(name),
        name TEXT NOT NULL,
        auth_type TEXT NOT NULL DEFAULT '',
        valid BOOLEAN,
        UNIQUE (owner_name, cloud_name, name)
    )",
    "CREATE TABLE IF NOT EXISTS models (
        id TEXT PRIMARY KEY,
        uuid TEXT UNIQUE,
        name TEXT NOT NULL,
        owner_name TEXT NOT NULL REFERENCES identities(name),
        controller_uuid TEXT NOT NULL REFERENCES controllers(uuid),
        region_id TEXT NOT NULL REFERENCES cloud_regions(id),
        credential_id TEXT NOT NULL REFERENCES cloud_credentials(id),
        life TEXT NOT NULL DEFAULT 'alive',
        created_at BIGINT NOT NULL,
        UNIQUE (owner_name, name)
    )",
    "CREATE TABLE IF NOT EXISTS application_offers (
        uuid TEXT PRIMARY KEY,
        model_id TEXT NOT NULL REFERENCES models(id),
        name TEXT NOT NULL,
        url TEXT NOT NULL UNIQUE,
        UNIQUE (model_id, name)
    )",
    "CREATE TABLE IF NOT EXISTS audit_log (
        id TEXT PRIMARY KEY,
        time BIGINT NOT NULL,
        conversation_id TEXT NOT NULL DEFAULT '',
        message_id BIGINT NOT NULL DEFAULT 0,
        identity_tag TEXT NOT NULL DEFAULT '',
        model TEXT NOT NULL DEFAULT '',
        facade_method TEXT NOT NULL DEFAULT '',
        is_response BOOLEAN NOT NULL DEFAULT FALSE,
        params TEXT NOT NULL DEFAULT '',
        errors TEXT NOT NULL DEFAULT ''
    )",
    "CREATE INDEX IF NOT EXISTS idx_audit_log_time ON audit_log (time)",
    "CREATE TABLE IF NOT EXISTS relation_tuples (
        tuple_key TEXT PRIMARY KEY,
        object TEXT NOT NULL,
        relation TEXT NOT NULL,
        target TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_relation_tuples_target ON relation_tuples (target, relation)",
];

/// Shared handle to the catalog database.
///
/// Cheap to clone. A handle constructed with [`Database::unconfigured`]
/// answers every operation with `server-configuration`; while a migration
/// runs, every operation answers `upgrade-in-progress`.
#[derive(Clone)]
pub struct Database {
    pool: Option<AnyPool>,
    upgrading: Arc<AtomicBool>,
}

impl Database {
    /// A handle with no backing database.
    pub fn unconfigured() -> Self {
        Self {
            pool: None,
            upgrading: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Connect to `dsn` and bring the schema up to date.
    ///
    /// SQLite pools are capped at one connection so that an in-memory
    /// database is one database rather than one per pool slot.
    pub async fn connect(dsn: &str) -> Result<Self> {
        sqlx::any::install_default_drivers();
        let max_connections = if dsn.starts_with("sqlite") { 1 } else { 10 };
        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect(dsn)
            .await
            .map_err(|e| Error::connection_failed(format!("connect {dsn}: {e}")))?;
        let db = Self {
            pool: Some(pool),
            upgrading: Arc::new(AtomicBool::new(false)),
        };
        db.migrate().await?;
        Ok(db)
    }

    /// Create any missing tables and indexes.
    pub async fn migrate(&self) -> Result<()> {
        let pool = self.pool.as_ref().ok_or_else(|| {
            Error::server_configuration("database not configured").op("migrate")
        })?;
        self.upgrading.store(true, Ordering::SeqCst);
        let result = async {
            for statement in SCHEMA {
                sqlx::query(statement)
                    .execute(pool)
                    .await
                    .map_err(|e| e.into_store_error("migrate"))?;
            }
            Ok(())
        }
        .await;
        self.upgrading.store(false, Ordering::SeqCst);
        result
    }

    /// The pool, or the configuration/upgrade error every operation maps to.
    pub(crate) fn pool(&self, op: &str) -> Result<&AnyPool> {
        if self.upgrading.load(Ordering::SeqCst) {
            return Err(Error::upgrade_in_progress("database upgrade in progress").op(op));
        }
        self.pool
            .as_ref()
            .ok_or_else(|| Error::server_configuration("database not configured").op(op))
    }

    /// Count rows of a table. Test and status helper.
    pub(crate) async fn count(&self, op: &str, sql: &str) -> Result<i64> {
        let pool = self.pool(op)?;
        let row = sqlx::query(sql)
            .fetch_one(pool)
            .await
            .map_err(|e| e.into_store_error(op))?;
        row.try_get::<i64, _>(0)
            .map_err(|e| e.into_store_error(op))
    }
}

/// Current wall-clock time in unix microseconds, the storage form of every
/// timestamp in the catalog.
pub fn now_micros() -> i64 {
    chrono::Utc::now().timestamp_micros()
}

/// Fresh surrogate key.
pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_database_reports_server_configuration() {
        let db = Database::unconfigured();
        let err = db.count("count-things", "SELECT COUNT(*) FROM models").await.unwrap_err();
        assert_eq!(err.code(), "server-configuration");
    }

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        assert_eq!(
            db.count("count", "SELECT COUNT(*) FROM identities").await.unwrap(),
            0
        );
    }
}
