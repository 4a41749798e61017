//! Domain model for library items and folder/tag forests.
//!
//! # Invariants
//! - Items are identified by their content hash, never by a generated id.
//! - Folders and tags share one node shape, distinguished by `NodeKind`.

pub mod item;
pub mod node;
