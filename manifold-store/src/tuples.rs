//! SQL implementation of the policy tuple store.
//!
//! Keeps relationship tuples in the same relational database as the
//! catalog, in their own table, so grants survive restarts. Rows are keyed
//! by the tuple's canonical string, which also fixes the pagination order.

use std::future::Future;
use std::pin::Pin;

use sqlx::Row;

use manifold_core::{Error, ErrorKind, Result};
use manifold_policy::{RelationTuple, TupleFilter, TuplePage, TupleStore};

use crate::db::Database;
use crate::error::SqlxErrorExt;

/// Tuple store backed by the catalog database.
#[derive(Clone)]
pub struct SqlTupleStore {
    db: Database,
}

impl SqlTupleStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    async fn add_inner(&self, tuples: Vec<RelationTuple>) -> Result<()> {
        const OP: &str = "add-relation";
        let pool = self.db.pool(OP).map_err(as_policy_error)?;
        for tuple in tuples {
            let result = sqlx::query(
                "INSERT INTO relation_tuples (tuple_key, object, relation, target)
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(tuple.key())
            .bind(tuple.object.to_string())
            .bind(tuple.relation.as_str())
            .bind(tuple.target.to_string())
            .execute(pool)
            .await;
            if let Err(e) = result {
                let err = e.into_store_error(OP);
                // An existing tuple is not an error.
                if !err.is_already_exists() {
                    return Err(as_policy_error(err));
                }
            }
        }
        Ok(())
    }

    async fn remove_inner(&self, tuples: Vec<RelationTuple>) -> Result<()> {
        const OP: &str = "remove-relation";
        let pool = self.db.pool(OP).map_err(as_policy_error)?;
        for tuple in tuples {
            sqlx::query("DELETE FROM relation_tuples WHERE tuple_key = $1")
                .bind(tuple.key())
                .execute(pool)
                .await
                .map_err(|e| as_policy_error(e.into_store_error(OP)))?;
        }
        Ok(())
    }

    async fn read_inner(
        &self,
        filter: TupleFilter,
        page_size: usize,
        token: Option<String>,
    ) -> Result<TuplePage> {
        const OP: &str = "read-relations";
        let pool = self.db.pool(OP).map_err(as_policy_error)?;

        let mut sql = String::from(
            "SELECT tuple_key, object, relation, target FROM relation_tuples WHERE 1 = 1",
        );
        let mut n = 0;
        if filter.object.is_some() {
            n += 1;
            sql.push_str(&format!(" AND object = ${n}"));
        }
        if filter.relation.is_some() {
            n += 1;
            sql.push_str(&format!(" AND relation = ${n}"));
        }
        if filter.target.is_some() {
            n += 1;
            sql.push_str(&format!(" AND target = ${n}"));
        }
        if token.is_some() {
            n += 1;
            sql.push_str(&format!(" AND tuple_key > ${n}"));
        }
        sql.push_str(&format!(" ORDER BY tuple_key ASC LIMIT ${}", n + 1));

        let mut query = sqlx::query(&sql);
        if let Some(object) = &filter.object {
            query = query.bind(object.to_string());
        }
        if let Some(relation) = filter.relation {
            query = query.bind(relation.as_str());
        }
        if let Some(target) = &filter.target {
            query = query.bind(target.to_string());
        }
        if let Some(token) = &token {
            query = query.bind(token.clone());
        }
        // Fetch one extra row to learn whether a next page exists.
        let limit = i64::try_from(page_size).unwrap_or(i64::MAX).saturating_add(1);
        query = query.bind(limit);

        let rows = query
            .fetch_all(pool)
            .await
            .map_err(|e| as_policy_error(e.into_store_error(OP)))?;

        let mut tuples = Vec::with_capacity(rows.len().min(page_size));
        let has_more = rows.len() > page_size;
        for row in rows.iter().take(page_size) {
            let object: String = row.try_get("object").map_err(|e| e.into_store_error(OP))?;
            let relation: String = row.try_get("relation").map_err(|e| e.into_store_error(OP))?;
            let target: String = row.try_get("target").map_err(|e| e.into_store_error(OP))?;
            tuples.push(
                RelationTuple::parse(&object, &relation, &target).map_err(|e| {
                    Error::new(
                        ErrorKind::FailedToParseTupleKey,
                        format!("stored tuple is malformed: {e}"),
                    )
                })?,
            );
        }
        let next = if has_more {
            tuples.last().map(RelationTuple::key)
        } else {
            None
        };
        Ok((tuples, next))
    }
}

/// Policy-store failures surface under the policy error kind, keeping the
/// catalog kinds for catalog operations.
fn as_policy_error(err: Error) -> Error {
    match err.kind() {
        ErrorKind::ServerConfiguration | ErrorKind::UpgradeInProgress => err,
        _ => Error::new(ErrorKind::OpenFgaRequestFailed, err.message().to_string()),
    }
}

impl TupleStore for SqlTupleStore {
    fn add(
        &self,
        tuples: &[RelationTuple],
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tuples = tuples.to_vec();
        Box::pin(self.add_inner(tuples))
    }

    fn remove(
        &self,
        tuples: &[RelationTuple],
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tuples = tuples.to_vec();
        Box::pin(self.remove_inner(tuples))
    }

    fn read(
        &self,
        filter: &TupleFilter,
        page_size: usize,
        token: Option<&str>,
    ) -> Pin<Box<dyn Future<Output = Result<TuplePage>> + Send + '_>> {
        let filter = filter.clone();
        let token = token.map(str::to_string);
        Box::pin(self.read_inner(filter, page_size, token))
    }
}
