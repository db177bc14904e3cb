//! Driver error mapping.
//!
//! sqlx errors are mapped to catalog error kinds exactly once, here, at the
//! edge. Outer layers add operation tags without remapping.

use manifold_core::{Error, ErrorKind};

/// Extension trait converting `sqlx::Error` into the shared [`Error`].
///
/// Orphan rules keep us from a `From` impl in this crate, so conversions go
/// through `.into_store_error(op)` at every call site.
pub(crate) trait SqlxErrorExt {
    fn into_store_error(self, op: &str) -> Error;
}

impl SqlxErrorExt for sqlx::Error {
    fn into_store_error(self, op: &str) -> Error {
        match &self {
            sqlx::Error::RowNotFound => Error::not_found("record not found").op(op),
            sqlx::Error::Database(db) => {
                if db.is_unique_violation() {
                    Error::already_exists("record already exists").op(op)
                } else if db.message().contains("database is locked") {
                    Error::new(ErrorKind::DatabaseLocked, db.message().to_string()).op(op)
                } else {
                    Error::unspecified(format!("database error: {db}")).op(op)
                }
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                Error::server_configuration(self.to_string()).op(op)
            }
            other => Error::unspecified(format!("database error: {other}")).op(op),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_not_found_maps_to_not_found() {
        let err = sqlx::Error::RowNotFound.into_store_error("get-model");
        assert_eq!(err.code(), "not-found");
        assert!(err.message().starts_with("get-model:"));
    }
}
