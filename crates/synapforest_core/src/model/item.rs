//! Library item model.
//!
//! # Invariants
//! - `id` is the SHA-256 of the stored file's bytes.
//! - At most one row exists per `id`, soft-deleted rows included.
//! - `deleted_at` is the source of truth for trash state.

use crate::hash::ContentId;
use crate::model::node::NodeId;
use serde::{Deserialize, Serialize};

/// Highest accepted star rating.
pub const MAX_STAR: u8 = 5;

/// Canonical item record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ContentId,
    /// Display name, also the stored file stem.
    pub name: String,
    /// Extension without the leading dot. May be empty.
    pub ext: String,
    /// Zero for non-raster content or when decoding failed.
    pub width: u32,
    pub height: u32,
    /// File size in bytes.
    pub size: u64,
    pub url: String,
    pub annotation: String,
    pub star: u8,
    /// Epoch ms. Caller-overridable on ingestion.
    pub created_at: i64,
    /// Epoch ms of first ingestion.
    pub imported_at: i64,
    pub modified_at: i64,
    /// Soft-delete tombstone (epoch ms).
    pub deleted_at: Option<i64>,
    pub have_thumbnail: bool,
    pub have_preview: bool,
}

impl Item {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// File name under `raw_files/<id>/`.
    pub fn file_name(&self) -> String {
        stored_file_name(&self.name, &self.ext)
    }
}

/// Item with both association sets resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDetails {
    pub item: Item,
    pub folder_ids: Vec<NodeId>,
    pub tag_ids: Vec<NodeId>,
}

/// Partial item update used by explicit edits.
///
/// `tags`/`folders` set to `Some` replace the whole association set of that
/// kind, an empty vector included.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemPatch {
    pub name: Option<String>,
    pub ext: Option<String>,
    pub url: Option<String>,
    pub annotation: Option<String>,
    pub star: Option<u8>,
    pub created_at: Option<i64>,
    pub tags: Option<Vec<NodeId>>,
    pub folders: Option<Vec<NodeId>>,
}

/// Builds `<name>.<ext>`, or bare `<name>` when `ext` is empty.
pub fn stored_file_name(name: &str, ext: &str) -> String {
    if ext.is_empty() {
        name.to_string()
    } else {
        format!("{name}.{ext}")
    }
}

#[cfg(test)]
mod tests {
    use super::stored_file_name;

    #[test]
    fn stored_file_name_omits_dot_for_empty_ext() {
        assert_eq!(stored_file_name("cat", "png"), "cat.png");
        assert_eq!(stored_file_name("README", ""), "README");
    }
}
