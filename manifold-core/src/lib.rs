//! # manifold-core — shared vocabulary of the Manifold management plane
//!
//! Everything the other crates agree on lives here:
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`error`] | [`Error`]/[`ErrorKind`] with the stable string codes the RPC surface exposes |
//! | [`tag`] | Entity [`Kind`]s, policy [`Relation`]s and the [`Tag`] reference type |
//! | [`names`] | Principal grammar, email sanitisation, reserved cloud names |

pub mod error;
pub mod names;
pub mod tag;

pub use error::{Error, ErrorKind, Result};
pub use tag::{Kind, Relation, Tag, EVERYONE_USER, WILDCARD_USER};
