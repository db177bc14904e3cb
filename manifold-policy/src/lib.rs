//! # manifold-policy — relationship-based access control
//!
//! A Zanzibar-style tuple store and decision engine. Facts are
//! `(object, relation, target)` edges ([`RelationTuple`]); the
//! authorization model ([`schema`]) declares, per entity kind, which
//! subject types may be assigned directly, which stronger relations imply
//! weaker ones, and which relations pull authority in from linked entities
//! (controller → model → offer).
//!
//! # Usage
//!
//! ```ignore
//! use manifold_policy::{PolicyEngine, RelationTuple};
//!
//! let engine = PolicyEngine::in_memory();
//! engine.add_relations(&[RelationTuple::parse(
//!     "user:alice@example.com",
//!     "writer",
//!     "model:0f9e6f1c-...",
//! )?]).await?;
//!
//! // writer implies reader
//! let ok = engine.check(&RelationTuple::parse(
//!     "user:alice@example.com",
//!     "reader",
//!     "model:0f9e6f1c-...",
//! )?).await?;
//! assert!(ok);
//! ```
//!
//! Persistence is behind the [`TupleStore`] trait: [`MemoryStore`] backs
//! tests, and the catalog crate provides a SQL implementation so grants
//! survive restarts.

pub mod engine;
pub mod schema;
pub mod store;
pub mod tuple;

pub use engine::PolicyEngine;
pub use store::{MemoryStore, TuplePage, TupleStore};
pub use tuple::{RelationTuple, TupleFilter};
