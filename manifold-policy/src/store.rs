//! Tuple-store trait and the in-memory implementation.
//!
//! [`TupleStore`] is the persistence seam — implement it to keep tuples in
//! a database. [`MemoryStore`] keeps them in a sorted map and backs the
//! unit tests; the server wires a SQL-backed implementation.

use std::collections::BTreeMap;
use std::future::Future;
use std::ops::Bound;
use std::pin::Pin;
use std::sync::RwLock;

use manifold_core::{Error, Result};

use crate::tuple::{RelationTuple, TupleFilter};

/// A page of tuples plus the token to continue from, if any.
pub type TuplePage = (Vec<RelationTuple>, Option<String>);

/// Storage backend for relationship tuples.
///
/// All three operations are safe to issue concurrently. `add` and `remove`
/// are idempotent: adding a present tuple and removing an absent one both
/// succeed silently.
pub trait TupleStore: Send + Sync + 'static {
    fn add(
        &self,
        tuples: &[RelationTuple],
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    fn remove(
        &self,
        tuples: &[RelationTuple],
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Read tuples matching `filter`, ordered by their canonical key,
    /// starting after `token`.
    fn read(
        &self,
        filter: &TupleFilter,
        page_size: usize,
        token: Option<&str>,
    ) -> Pin<Box<dyn Future<Output = Result<TuplePage>> + Send + '_>>;
}

// ── MemoryStore ──────────────────────────────────────────────────────────

/// In-memory tuple store.
///
/// Tuples are kept in a `BTreeMap` keyed by [`RelationTuple::key`], which
/// makes pagination ordering deterministic. Continuation tokens are the
/// last key of the previous page.
#[derive(Default)]
pub struct MemoryStore {
    tuples: RwLock<BTreeMap<String, RelationTuple>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tuples; used by tests.
    pub fn len(&self) -> usize {
        self.tuples.read().expect("tuple store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_err() -> Error {
        Error::new(
            manifold_core::ErrorKind::OpenFgaRequestFailed,
            "tuple store lock poisoned",
        )
    }
}

impl TupleStore for MemoryStore {
    fn add(
        &self,
        tuples: &[RelationTuple],
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let result = (|| {
            let mut map = self.tuples.write().map_err(|_| Self::lock_err())?;
            for tuple in tuples {
                map.insert(tuple.key(), tuple.clone());
            }
            Ok(())
        })();
        Box::pin(async move { result })
    }

    fn remove(
        &self,
        tuples: &[RelationTuple],
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let result = (|| {
            let mut map = self.tuples.write().map_err(|_| Self::lock_err())?;
            for tuple in tuples {
                map.remove(&tuple.key());
            }
            Ok(())
        })();
        Box::pin(async move { result })
    }

    fn read(
        &self,
        filter: &TupleFilter,
        page_size: usize,
        token: Option<&str>,
    ) -> Pin<Box<dyn Future<Output = Result<TuplePage>> + Send + '_>> {
        let result = (|| {
            let map = self.tuples.read().map_err(|_| Self::lock_err())?;
            let start = match token {
                Some(token) => Bound::Excluded(token.to_string()),
                None => Bound::Unbounded,
            };
            let mut page = Vec::new();
            let mut next = None;
            for (key, tuple) in map.range((start, Bound::Unbounded)) {
                if !filter.matches(tuple) {
                    continue;
                }
                if page.len() == page_size {
                    next = Some(key.clone());
                    break;
                }
                page.push(tuple.clone());
            }
            // The continuation token is the key of the last returned tuple,
            // not the first unreturned one, so pages stay contiguous when
            // tuples are removed between reads.
            let next = next.and_then(|_| page.last().map(RelationTuple::key));
            Ok((page, next))
        })();
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use manifold_core::{Relation, Tag};

    fn tuple(user: &str, relation: Relation, target: &str) -> RelationTuple {
        RelationTuple::new(
            Tag::parse(user).unwrap(),
            relation,
            Tag::parse(target).unwrap(),
        )
    }

    #[tokio::test]
    async fn add_is_idempotent() {
        let store = MemoryStore::new();
        let t = tuple("user:alice@example.com", Relation::Reader, "model:m1");
        store.add(&[t.clone()]).await.unwrap();
        store.add(&[t]).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn remove_missing_is_silent() {
        let store = MemoryStore::new();
        let t = tuple("user:alice@example.com", Relation::Reader, "model:m1");
        store.remove(&[t]).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn pagination_walks_every_tuple_once() {
        let store = MemoryStore::new();
        let mut tuples = Vec::new();
        for i in 0..25 {
            tuples.push(tuple(
                &format!("user:u{i:02}@example.com"),
                Relation::Reader,
                "model:m1",
            ));
        }
        store.add(&tuples).await.unwrap();

        let mut seen = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let (page, next) = store
                .read(&TupleFilter::default(), 10, token.as_deref())
                .await
                .unwrap();
            seen.extend(page);
            match next {
                Some(t) => token = Some(t),
                None => break,
            }
        }
        assert_eq!(seen.len(), 25);
    }

    #[tokio::test]
    async fn filter_narrows_reads() {
        let store = MemoryStore::new();
        store
            .add(&[
                tuple("user:alice@example.com", Relation::Reader, "model:m1"),
                tuple("user:alice@example.com", Relation::Writer, "model:m1"),
                tuple("user:bob@example.com", Relation::Reader, "model:m2"),
            ])
            .await
            .unwrap();

        let filter = TupleFilter {
            relation: Some(Relation::Reader),
            ..Default::default()
        };
        let (page, _) = store.read(&filter, 10, None).await.unwrap();
        assert_eq!(page.len(), 2);
    }
}
