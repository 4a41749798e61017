//! Folder/tag forest use-case service.
//!
//! # Responsibility
//! - Enforce forest invariants above the repository layer.
//! - Resolve "no parent" to the kind's root node.
//!
//! # Invariants
//! - The root node is never deleted or reparented.
//! - Parents must exist before any row is written.
//! - Moves never create parent-child cycles.

use crate::model::node::{NewNode, Node, NodeId, NodeKind, NodePatch, ROOT_NODE_ID};
use crate::repo::node_repo::{NodeRepository, SubtreeDeletion};
use crate::repo::RepoError;
use thiserror::Error;

/// Errors from forest service operations.
#[derive(Debug, Error)]
pub enum NodeServiceError {
    #[error("{} not found: {id}", kind.as_str())]
    NodeNotFound { kind: NodeKind, id: NodeId },
    #[error("{} parent not found: {id}", kind.as_str())]
    ParentNotFound { kind: NodeKind, id: NodeId },
    /// Delete or reparent attempted on the root node.
    #[error("{} root node cannot be deleted or moved", .0.as_str())]
    RootNodeProtected(NodeKind),
    #[error("moving {} {node_id} under {parent_id} would create a cycle", kind.as_str())]
    CycleDetected {
        kind: NodeKind,
        node_id: NodeId,
        parent_id: NodeId,
    },
    #[error(transparent)]
    Repo(RepoError),
}

impl From<RepoError> for NodeServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NodeNotFound { kind, id } => Self::NodeNotFound { kind, id },
            RepoError::CycleDetected {
                kind,
                node_id,
                parent_id,
            } => Self::CycleDetected {
                kind,
                node_id,
                parent_id,
            },
            other => Self::Repo(other),
        }
    }
}

pub type NodeServiceResult<T> = Result<T, NodeServiceError>;

/// Forest service facade for one `NodeKind`.
pub struct NodeService<R: NodeRepository> {
    repo: R,
}

impl<R: NodeRepository> NodeService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    pub fn kind(&self) -> NodeKind {
        self.repo.kind()
    }

    /// Creates one node. A blank name falls back to the kind's default and
    /// a missing parent means top level.
    pub fn create(&self, input: NewNode) -> NodeServiceResult<Node> {
        let parent_id = input.parent_id.unwrap_or(ROOT_NODE_ID);
        self.ensure_parent_exists(parent_id)?;
        let name = resolve_name(self.kind(), input.name.as_deref());
        self.repo
            .create_node(&name, &input, parent_id)
            .map_err(Into::into)
    }

    /// Applies a partial update and stamps `modified_at`.
    ///
    /// The root accepts cosmetic edits only.
    pub fn update(&self, id: NodeId, mut patch: NodePatch) -> NodeServiceResult<Node> {
        let node = self.get(id)?;
        if let Some(parent_id) = patch.parent_id {
            if node.is_root() {
                return Err(NodeServiceError::RootNodeProtected(self.kind()));
            }
            if parent_id == id {
                return Err(NodeServiceError::CycleDetected {
                    kind: self.kind(),
                    node_id: id,
                    parent_id,
                });
            }
            self.ensure_parent_exists(parent_id)?;
        }
        if let Some(name) = patch.name.as_deref() {
            patch.name = Some(resolve_name(self.kind(), Some(name)));
        }
        self.repo.update_node(id, &patch).map_err(Into::into)
    }

    pub fn get(&self, id: NodeId) -> NodeServiceResult<Node> {
        self.repo
            .get_node(id)?
            .ok_or(NodeServiceError::NodeNotFound {
                kind: self.kind(),
                id,
            })
    }

    /// Direct children of `parent_id`, or every non-root node for `None`.
    pub fn list_children(&self, parent_id: Option<NodeId>) -> NodeServiceResult<Vec<Node>> {
        if let Some(parent_id) = parent_id {
            self.ensure_parent_exists(parent_id)?;
        }
        self.repo.list_children(parent_id).map_err(Into::into)
    }

    /// Moves every node in `ids` under `new_parent_id` (root for `None`),
    /// all or nothing.
    pub fn batch_reparent(
        &self,
        ids: &[NodeId],
        new_parent_id: Option<NodeId>,
    ) -> NodeServiceResult<usize> {
        if ids.contains(&ROOT_NODE_ID) {
            return Err(NodeServiceError::RootNodeProtected(self.kind()));
        }
        let parent_id = new_parent_id.unwrap_or(ROOT_NODE_ID);
        self.ensure_parent_exists(parent_id)?;
        self.repo
            .reparent_nodes(ids, parent_id)
            .map_err(Into::into)
    }

    /// Deletes `id` with its whole subtree. Linked items are soft-deleted
    /// when `delete_associated_items` is set and unlinked otherwise.
    pub fn cascade_delete(
        &self,
        id: NodeId,
        delete_associated_items: bool,
    ) -> NodeServiceResult<SubtreeDeletion> {
        if id == ROOT_NODE_ID {
            return Err(NodeServiceError::RootNodeProtected(self.kind()));
        }
        self.repo
            .delete_subtree(id, delete_associated_items)
            .map_err(Into::into)
    }

    fn ensure_parent_exists(&self, parent_id: NodeId) -> NodeServiceResult<()> {
        match self.repo.get_node(parent_id)? {
            Some(_) => Ok(()),
            None => Err(NodeServiceError::ParentNotFound {
                kind: self.kind(),
                id: parent_id,
            }),
        }
    }
}

fn resolve_name(kind: NodeKind, name: Option<&str>) -> String {
    match name {
        Some(value) if !value.trim().is_empty() => value.to_string(),
        _ => kind.default_name().to_string(),
    }
}
