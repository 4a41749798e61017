//! Forest node model shared by folders and tags.
//!
//! # Invariants
//! - Every kind has exactly one root node with id `ROOT_NODE_ID`.
//! - The root is the only node with `parent_id = None`.
//! - Parent/child links are id references resolved through the store.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable forest node identifier.
pub type NodeId = Uuid;

/// Well-known id of the root node of every kind.
pub const ROOT_NODE_ID: NodeId = Uuid::nil();

/// Display name given to seeded root nodes.
pub const ROOT_NODE_NAME: &str = "Root";

/// Which forest a node belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Folder,
    Tag,
}

impl NodeKind {
    pub const ALL: [NodeKind; 2] = [NodeKind::Folder, NodeKind::Tag];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Folder => "folder",
            Self::Tag => "tag",
        }
    }

    /// Node table of this kind.
    pub fn table(self) -> &'static str {
        match self {
            Self::Folder => "folders",
            Self::Tag => "tags",
        }
    }

    /// Bridge table linking items to nodes of this kind.
    pub fn link_table(self) -> &'static str {
        match self {
            Self::Folder => "item_folders",
            Self::Tag => "item_tags",
        }
    }

    /// Node column of `link_table`.
    pub fn link_column(self) -> &'static str {
        match self {
            Self::Folder => "folder_id",
            Self::Tag => "tag_id",
        }
    }

    /// Name used when a node is created without one.
    pub fn default_name(self) -> &'static str {
        match self {
            Self::Folder => "NewFolder",
            Self::Tag => "NewTag",
        }
    }
}

/// Folder or tag read model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    /// `None` only for the root.
    pub parent_id: Option<NodeId>,
    pub name: String,
    pub description: String,
    pub icon: u32,
    pub icon_color: u32,
    /// UI expand state, persisted verbatim.
    pub is_expand: bool,
    /// Epoch ms.
    pub created_at: i64,
    /// Epoch ms.
    pub modified_at: i64,
}

impl Node {
    pub fn is_root(&self) -> bool {
        self.id == ROOT_NODE_ID
    }

    /// Whether this node hangs directly under the root.
    pub fn is_top_level(&self) -> bool {
        self.parent_id == Some(ROOT_NODE_ID)
    }
}

/// Input for node creation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewNode {
    /// Blank or absent names fall back to `NodeKind::default_name`.
    pub name: Option<String>,
    pub description: String,
    pub icon: u32,
    pub icon_color: u32,
    /// `None` places the node under the root.
    pub parent_id: Option<NodeId>,
    pub is_expand: bool,
}

/// Partial node update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub icon: Option<u32>,
    pub icon_color: Option<u32>,
    pub parent_id: Option<NodeId>,
    pub is_expand: Option<bool>,
}
