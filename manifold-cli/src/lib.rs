//! Library surface of the Manifold CLI, split out so the document and
//! formatting code is testable without a terminal.

pub mod client;
pub mod docs;
pub mod output;
