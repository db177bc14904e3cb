//! Append-only audit log.

use sqlx::Row;

use manifold_core::{Error, Result};

use crate::db::{new_id, Database};
use crate::error::SqlxErrorExt;

/// One request or response observed on an RPC connection.
#[derive(Clone, Debug, Default)]
pub struct AuditLogEntry {
    /// Unix microseconds.
    pub time: i64,
    /// Identifies the connection the event happened on.
    pub conversation_id: String,
    /// The request id within the conversation.
    pub message_id: i64,
    pub identity_tag: String,
    /// Model tag, when the call addressed one.
    pub model: String,
    /// `Facade.Method` of the call.
    pub facade_method: String,
    pub is_response: bool,
    /// Opaque request params or response body.
    pub params: Option<serde_json::Value>,
    /// Opaque errors carried by a response.
    pub errors: Option<serde_json::Value>,
}

/// Filter for audit reads. Zero values match everything.
#[derive(Clone, Debug, Default)]
pub struct AuditLogFilter {
    /// Inclusive lower bound, unix microseconds.
    pub start: Option<i64>,
    /// Exclusive upper bound, unix microseconds.
    pub end: Option<i64>,
    pub identity_tag: Option<String>,
    pub model: Option<String>,
    pub method: Option<String>,
    pub limit: i64,
    pub offset: i64,
    /// Most recent first when set.
    pub newest_first: bool,
}

fn entry_from_row(row: &sqlx::any::AnyRow, op: &str) -> Result<AuditLogEntry> {
    let params: String = row.try_get("params").map_err(|e| e.into_store_error(op))?;
    let errors: String = row.try_get("errors").map_err(|e| e.into_store_error(op))?;
    let decode = |s: &str| -> Result<Option<serde_json::Value>> {
        if s.is_empty() {
            Ok(None)
        } else {
            serde_json::from_str(s)
                .map(Some)
                .map_err(|e| Error::unspecified(format!("decode audit payload: {e}")).op(op))
        }
    };
    Ok(AuditLogEntry {
        time: row.try_get("time").map_err(|e| e.into_store_error(op))?,
        conversation_id: row
            .try_get("conversation_id")
            .map_err(|e| e.into_store_error(op))?,
        message_id: row.try_get("message_id").map_err(|e| e.into_store_error(op))?,
        identity_tag: row
            .try_get("identity_tag")
            .map_err(|e| e.into_store_error(op))?,
        model: row.try_get("model").map_err(|e| e.into_store_error(op))?,
        facade_method: row
            .try_get("facade_method")
            .map_err(|e| e.into_store_error(op))?,
        is_response: row.try_get("is_response").map_err(|e| e.into_store_error(op))?,
        params: decode(&params)?,
        errors: decode(&errors)?,
    })
}

impl Database {
    /// Append one audit entry.
    pub async fn append_audit_entry(&self, entry: &AuditLogEntry) -> Result<()> {
        const OP: &str = "append-audit-entry";
        let pool = self.pool(OP)?;
        let encode = |v: &Option<serde_json::Value>| -> Result<String> {
            match v {
                Some(v) => serde_json::to_string(v)
                    .map_err(|e| Error::unspecified(format!("encode audit payload: {e}")).op(OP)),
                None => Ok(String::new()),
            }
        };
        sqlx::query(
            "INSERT INTO audit_log
             (id, time, conversation_id, message_id, identity_tag, model, facade_method,
              is_response, params, errors)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(new_id())
        .bind(entry.time)
        .bind(&entry.conversation_id)
        .bind(entry.message_id)
        .bind(&entry.identity_tag)
        .bind(&entry.model)
        .bind(&entry.facade_method)
        .bind(entry.is_response)
        .bind(encode(&entry.params)?)
        .bind(encode(&entry.errors)?)
        .execute(pool)
        .await
        .map_err(|e| e.into_store_error(OP))?;
        Ok(())
    }

    /// Read audit entries matching the filter.
    pub async fn list_audit_entries(&self, filter: &AuditLogFilter) -> Result<Vec<AuditLogEntry>> {
        const OP: &str = "list-audit-entries";
        let pool = self.pool(OP)?;

        let mut sql = String::from(
            "SELECT time, conversation_id, message_id, identity_tag, model, facade_method,
             is_response, params, errors FROM audit_log WHERE 1 = 1",
        );
        let mut n = 0;
        if filter.start.is_some() {
            n += 1;
            sql.push_str(&format!(" AND time >= ${n}"));
        }
        if filter.end.is_some() {
            n += 1;
            sql.push_str(&format!(" AND time < ${n}"));
        }
        if filter.identity_tag.is_some() {
            n += 1;
            sql.push_str(&format!(" AND identity_tag = ${n}"));
        }
        if filter.model.is_some() {
            n += 1;
            sql.push_str(&format!(" AND model = ${n}"));
        }
        if filter.method.is_some() {
            n += 1;
            sql.push_str(&format!(" AND facade_method = ${n}"));
        }
        sql.push_str(if filter.newest_first {
            " ORDER BY time DESC"
        } else {
            " ORDER BY time ASC"
        });
        sql.push_str(&format!(" LIMIT ${} OFFSET ${}", n + 1, n + 2));

        let mut query = sqlx::query(&sql);
        if let Some(start) = filter.start {
            query = query.bind(start);
        }
        if let Some(end) = filter.end {
            query = query.bind(end);
        }
        if let Some(identity_tag) = &filter.identity_tag {
            query = query.bind(identity_tag);
        }
        if let Some(model) = &filter.model {
            query = query.bind(model);
        }
        if let Some(method) = &filter.method {
            query = query.bind(method);
        }
        let limit = if filter.limit > 0 { filter.limit } else { 50 };
        query = query.bind(limit).bind(filter.offset);

        let rows = query
            .fetch_all(pool)
            .await
            .map_err(|e| e.into_store_error(OP))?;
        rows.iter().map(|row| entry_from_row(row, OP)).collect()
    }

    /// Hard-delete audit entries older than `cutoff` (unix microseconds),
    /// returning how many were removed.
    pub async fn purge_audit_entries_before(&self, cutoff: i64) -> Result<u64> {
        const OP: &str = "purge-audit-entries";
        let pool = self.pool(OP)?;
        let result = sqlx::query("DELETE FROM audit_log WHERE time < $1")
            .bind(cutoff)
            .execute(pool)
            .await
            .map_err(|e| e.into_store_error(OP))?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(time: i64, method: &str, is_response: bool) -> AuditLogEntry {
        AuditLogEntry {
            time,
            conversation_id: "c1".to_string(),
            message_id: 1,
            identity_tag: "user-alice@example.com".to_string(),
            facade_method: method.to_string(),
            is_response,
            params: Some(serde_json::json!({"name": "m"})),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn entries_filter_by_method_and_time() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        db.append_audit_entry(&entry(100, "Manifold.AddModel", false)).await.unwrap();
        db.append_audit_entry(&entry(200, "Manifold.AddModel", true)).await.unwrap();
        db.append_audit_entry(&entry(300, "Manifold.DestroyModel", false)).await.unwrap();

        let filter = AuditLogFilter {
            method: Some("Manifold.AddModel".to_string()),
            ..Default::default()
        };
        let got = db.list_audit_entries(&filter).await.unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].time, 100);

        let filter = AuditLogFilter {
            start: Some(150),
            end: Some(250),
            ..Default::default()
        };
        let got = db.list_audit_entries(&filter).await.unwrap();
        assert_eq!(got.len(), 1);
        assert!(got[0].is_response);
        assert_eq!(got[0].params, Some(serde_json::json!({"name": "m"})));
    }

    #[tokio::test]
    async fn newest_first_reverses_ordering() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        for t in [100, 300, 200] {
            db.append_audit_entry(&entry(t, "Manifold.Ping", false)).await.unwrap();
        }
        let filter = AuditLogFilter {
            newest_first: true,
            ..Default::default()
        };
        let got = db.list_audit_entries(&filter).await.unwrap();
        let times: Vec<_> = got.iter().map(|e| e.time).collect();
        assert_eq!(times, [300, 200, 100]);
    }

    #[tokio::test]
    async fn purge_returns_the_deleted_count() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        for t in [100, 200, 300] {
            db.append_audit_entry(&entry(t, "Manifold.Ping", false)).await.unwrap();
        }
        let removed = db.purge_audit_entries_before(250).await.unwrap();
        assert_eq!(removed, 2);
        let rest = db.list_audit_entries(&AuditLogFilter::default()).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].time, 300);
    }
}
